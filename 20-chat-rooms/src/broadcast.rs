//! Concurrent fan-out to a snapshot of room members.
//!
//! Every recipient gets its own delivery task. The call waits for all of them
//! before returning, and one recipient's failure or timeout is recorded for
//! that recipient only.

use std::{fmt, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    connection::MessageSink,
    error::DeliveryError,
    ids::{ClientId, RoomSessionId},
};

/// One member of a room as seen at snapshot time.
#[derive(Clone)]
pub struct Recipient {
    pub client_id: ClientId,
    pub room_session_id: RoomSessionId,
    pub sink: Arc<dyn MessageSink>,
}

impl fmt::Debug for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipient")
            .field("client_id", &self.client_id)
            .field("room_session_id", &self.room_session_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct DeliveryOutcome {
    pub client_id: ClientId,
    pub room_session_id: RoomSessionId,
    pub result: Result<(), DeliveryError>,
}

#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    delivery_timeout: Duration,
}

impl BroadcastEngine {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self { delivery_timeout }
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Writes `payload` to a single sink, bounded by the delivery timeout.
    pub async fn deliver(&self, sink: &dyn MessageSink, payload: &[u8]) -> Result<(), DeliveryError> {
        match timeout(self.delivery_timeout, sink.send(payload)).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::TimedOut(self.delivery_timeout)),
        }
    }

    /// Delivers `payload` to every recipient concurrently and waits for all of them.
    pub async fn broadcast(&self, recipients: &[Recipient], payload: &[u8]) -> BroadcastReport {
        if recipients.is_empty() {
            return BroadcastReport::default();
        }

        let payload: Arc<[u8]> = Arc::from(payload);
        let tasks = recipients.iter().map(|recipient| {
            let engine = self.clone();
            let sink = Arc::clone(&recipient.sink);
            let payload = Arc::clone(&payload);
            tokio::spawn(async move { engine.deliver(sink.as_ref(), &payload).await })
        });
        let joined = join_all(tasks).await;

        let outcomes: Vec<DeliveryOutcome> = recipients
            .iter()
            .zip(joined)
            .map(|(recipient, joined)| DeliveryOutcome {
                client_id: recipient.client_id,
                room_session_id: recipient.room_session_id,
                result: joined.unwrap_or_else(|err| Err(DeliveryError::Task(err))),
            })
            .collect();

        let report = BroadcastReport { outcomes };
        for failure in report.failures() {
            if let Err(error) = &failure.result {
                warn!(
                    client_id = failure.client_id,
                    session_id = failure.room_session_id,
                    %error,
                    "failed to deliver message"
                );
            }
        }
        debug!(
            recipients = recipients.len(),
            delivered = report.delivered(),
            "broadcast complete"
        );
        report
    }
}
