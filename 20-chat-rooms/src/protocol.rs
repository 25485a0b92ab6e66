//! The `{"type": ..., "data": ...}` envelope spoken on every connection.
//!
//! Decoding happens in two steps: the envelope is parsed first, leaving `data`
//! as an untyped JSON value, then the discriminator picks the payload type.
//! That split is what lets an unknown `type` surface as
//! [`ClientMessage::Unrecognized`] instead of a parse failure.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{error::ParseError, ids::RoomSessionId};

pub const JOIN: &str = "JOIN";
pub const PART: &str = "PART";
pub const TEXT: &str = "TEXT";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

/// Wraps `data` in the envelope and serializes it.
pub fn encode<T>(kind: &str, data: &T) -> serde_json::Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(&EnvelopeRef { kind, data })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub room_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub room_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Text {
    pub room_handle: String,
    pub content: String,
}

/// Every message a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join(Join),
    Part(Part),
    Text(Text),
    /// A well-formed envelope whose `type` this server does not know.
    Unrecognized { kind: String, data: Value },
}

impl ClientMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|source| ParseError::Envelope {
                raw: bytes.to_vec(),
                source,
            })?;

        let message = match envelope.kind.as_str() {
            JOIN => ClientMessage::Join(payload(&envelope, bytes)?),
            PART => ClientMessage::Part(payload(&envelope, bytes)?),
            TEXT => ClientMessage::Text(payload(&envelope, bytes)?),
            _ => ClientMessage::Unrecognized {
                kind: envelope.kind,
                data: envelope.data,
            },
        };
        Ok(message)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            ClientMessage::Join(join) => encode(JOIN, join),
            ClientMessage::Part(part) => encode(PART, part),
            ClientMessage::Text(text) => encode(TEXT, text),
            ClientMessage::Unrecognized { kind, data } => encode(kind, data),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::Join(_) => JOIN,
            ClientMessage::Part(_) => PART,
            ClientMessage::Text(_) => TEXT,
            ClientMessage::Unrecognized { kind, .. } => kind,
        }
    }
}

fn payload<T: DeserializeOwned>(envelope: &Envelope, raw: &[u8]) -> Result<T, ParseError> {
    T::deserialize(&envelope.data).map_err(|source| ParseError::Payload {
        kind: envelope.kind.clone(),
        raw: raw.to_vec(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub room_session_id: RoomSessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessJoin {
    pub room_handle: String,
    pub room_session_id: RoomSessionId,
    pub members: Vec<MemberInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessPart {
    pub room_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub room_handle: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveText {
    pub content: String,
    pub room_handle: String,
    pub room_session_id: RoomSessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEvent {
    pub room_handle: String,
    pub room_session_id: RoomSessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnableToParse {
    pub reason: String,
}

/// Every message the server sends. Serializes to the same envelope as [`encode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    SuccessJoin(SuccessJoin),
    FailJoin(Failure),
    SuccessPart(SuccessPart),
    FailPart(Failure),
    ReceiveText(ReceiveText),
    MemberJoined(MemberEvent),
    MemberLeft(MemberEvent),
    UnableToParse(UnableToParse),
}

impl ServerMessage {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(bytes).map_err(|source| ParseError::Envelope {
            raw: bytes.to_vec(),
            source,
        })
    }
}
