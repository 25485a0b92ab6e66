//! Error types shared by the codec, the registry, and delivery.

use std::{io, time::Duration};

use thiserror::Error;

use crate::ids::ClientId;

/// A message that could not be decoded. Carries the raw bytes for diagnostics.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed envelope: {source}")]
    Envelope {
        raw: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload does not match message type {kind}: {source}")]
    Payload {
        kind: String,
        raw: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },
}

impl ParseError {
    pub fn raw(&self) -> &[u8] {
        match self {
            ParseError::Envelope { raw, .. } | ParseError::Payload { raw, .. } => raw,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client is already in room {room}")]
    ClientAlreadyInRoom { room: String },

    #[error("client does not belong to room {room}")]
    ClientDoesNotBelongToAnyRoom { room: String },

    #[error("unknown client {0}")]
    UnknownClient(ClientId),
}

/// Failure to hand a payload to one recipient.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),

    #[error("delivery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_keeps_raw_bytes() {
        let raw = b"{not json".to_vec();
        let source = serde_json::from_slice::<serde_json::Value>(&raw).unwrap_err();
        let err = ParseError::Envelope {
            raw: raw.clone(),
            source,
        };
        assert_eq!(err.raw(), raw.as_slice());
        assert!(err.to_string().starts_with("malformed envelope"));
    }

    #[test]
    fn registry_error_display() {
        let err = RegistryError::ClientAlreadyInRoom {
            room: "general".into(),
        };
        assert_eq!(err.to_string(), "client is already in room general");
    }
}
