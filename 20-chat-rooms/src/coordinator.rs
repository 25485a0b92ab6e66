//! The single owner of all session state.
//!
//! Reader tasks, one per connection, turn inbound traffic into [`Event`]s on
//! a shared queue. The coordinator drains that queue one event at a time and
//! is the only code that touches the [`SessionRegistry`], so every mutation is
//! applied in a total order without locks.
//!
//! A client whose delivery fails or times out is closed once the current event
//! has been handled, exactly as if its connection had dropped.

use std::{future::Future, io};

use anyhow::{Context, Result};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::{BroadcastEngine, Recipient},
    config::CoordinatorConfig,
    connection::{Connection, MessageSink, MessageSource},
    error::RegistryError,
    ids::ClientId,
    protocol::{
        ClientMessage, Failure, Join, MemberEvent, Part, ServerMessage, SuccessJoin, SuccessPart,
        Text, UnableToParse,
    },
    registry::{Departure, RegistrySnapshot, RoomSession, SessionRegistry},
};

pub enum Event {
    Opened(Connection),
    Message {
        client_id: ClientId,
        payload: Vec<u8>,
    },
    /// End of stream, or a read error that ends the connection all the same.
    Closed {
        client_id: ClientId,
        error: Option<io::Error>,
    },
    Snapshot {
        respond_to: oneshot::Sender<RegistrySnapshot>,
    },
}

/// Cloneable entry point for acceptors and tests.
#[derive(Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<Event>,
}

impl CoordinatorHandle {
    pub async fn open(&self, connection: Connection) -> Result<()> {
        self.events
            .send(Event::Opened(connection))
            .await
            .map_err(|_| anyhow::anyhow!("coordinator has shut down"))
            .context("failed to open connection")
    }

    /// Registry state as seen between two coordinator steps.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot> {
        let (respond_to, response) = oneshot::channel();
        self.events
            .send(Event::Snapshot { respond_to })
            .await
            .map_err(|_| anyhow::anyhow!("coordinator has shut down"))
            .context("failed to request snapshot")?;
        response.await.context("snapshot response channel closed")
    }
}

pub struct Coordinator {
    registry: SessionRegistry,
    engine: BroadcastEngine,
    events: mpsc::Receiver<Event>,
    sender: mpsc::Sender<Event>,
    /// Clients whose last delivery failed, closed at the end of the step.
    failed: Vec<ClientId>,
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig) -> (Self, CoordinatorHandle) {
        let (sender, events) = mpsc::channel(config.event_capacity.max(1));
        let coordinator = Self {
            registry: SessionRegistry::new(),
            engine: BroadcastEngine::new(config.delivery_timeout),
            events,
            sender: sender.clone(),
            failed: Vec::new(),
        };
        (coordinator, CoordinatorHandle { events: sender })
    }

    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    self.shutdown().await;
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event).await;
                        self.evict_failed().await;
                    }
                    None => break,
                },
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Opened(connection) => {
                let client_id = self.registry.open_client(connection.sink);
                self.spawn_reader(client_id, connection.source);
            }
            Event::Message { client_id, payload } => self.handle_message(client_id, &payload).await,
            Event::Closed { client_id, error } => {
                if let Some(error) = error {
                    debug!(client_id, ?error, "connection read failed");
                }
                self.handle_close(client_id).await;
            }
            Event::Snapshot { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }
        }
    }

    /// Forwards every inbound message of one connection, in read order, until it closes.
    fn spawn_reader(&self, client_id: ClientId, mut source: Box<dyn MessageSource>) {
        let events = self.sender.clone();
        tokio::spawn(async move {
            loop {
                let event = match source.recv().await {
                    Ok(Some(payload)) => Event::Message { client_id, payload },
                    Ok(None) => Event::Closed {
                        client_id,
                        error: None,
                    },
                    Err(error) => Event::Closed {
                        client_id,
                        error: Some(error),
                    },
                };
                let closing = matches!(event, Event::Closed { .. });
                if events.send(event).await.is_err() || closing {
                    break;
                }
            }
        });
    }

    async fn handle_message(&mut self, client_id: ClientId, payload: &[u8]) {
        if self.registry.sink(client_id).is_none() {
            debug!(client_id, "dropping message from closed client");
            return;
        }

        let message = match ClientMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    client_id,
                    error = %err,
                    raw = %String::from_utf8_lossy(err.raw()),
                    "unable to parse client message"
                );
                let reply = ServerMessage::UnableToParse(UnableToParse {
                    reason: err.to_string(),
                });
                self.reply(client_id, &reply).await;
                return;
            }
        };

        debug!(client_id, kind = message.kind(), "message received");
        match message {
            ClientMessage::Join(join) => self.handle_join(client_id, join).await,
            ClientMessage::Part(part) => self.handle_part(client_id, part).await,
            ClientMessage::Text(text) => self.handle_text(client_id, text).await,
            ClientMessage::Unrecognized { kind, .. } => {
                debug!(client_id, kind = %kind, "ignoring unrecognized message type");
            }
        }
    }

    async fn handle_join(&mut self, client_id: ClientId, join: Join) {
        let joined = match self
            .registry
            .join_room(client_id, &join.room_handle, join.session_handle)
        {
            Ok(joined) => joined,
            Err(err @ RegistryError::ClientAlreadyInRoom { .. }) => {
                debug!(client_id, room = %join.room_handle, "duplicate join rejected");
                let reply = ServerMessage::FailJoin(Failure {
                    room_handle: join.room_handle,
                    reason: err.to_string(),
                });
                self.reply(client_id, &reply).await;
                return;
            }
            Err(err) => {
                warn!(client_id, error = %err, "join from unknown client");
                return;
            }
        };

        let reply = ServerMessage::SuccessJoin(SuccessJoin {
            room_handle: joined.session.room_handle.clone(),
            room_session_id: joined.session.id,
            members: joined.members,
        });
        self.reply(client_id, &reply).await;

        let notice = ServerMessage::MemberJoined(member_event(&joined.session));
        self.notify(&joined.others, &notice).await;
    }

    async fn handle_part(&mut self, client_id: ClientId, part: Part) {
        match self.registry.part_room(client_id, &part.room_handle) {
            Ok(departure) => {
                let reply = ServerMessage::SuccessPart(SuccessPart {
                    room_handle: part.room_handle,
                });
                self.reply(client_id, &reply).await;
                self.announce_departure(&departure).await;
            }
            Err(err @ RegistryError::ClientDoesNotBelongToAnyRoom { .. }) => {
                debug!(client_id, room = %part.room_handle, "part from non-member");
                let reply = ServerMessage::FailPart(Failure {
                    room_handle: part.room_handle,
                    reason: err.to_string(),
                });
                self.reply(client_id, &reply).await;
            }
            Err(err) => warn!(client_id, error = %err, "part from unknown client"),
        }
    }

    async fn handle_text(&mut self, client_id: ClientId, text: Text) {
        match self
            .registry
            .send_text(client_id, &text.room_handle, text.content)
        {
            Ok(delivery) => {
                let message = ServerMessage::ReceiveText(delivery.message);
                self.notify(&delivery.recipients, &message).await;
            }
            Err(err) => {
                debug!(client_id, room = %text.room_handle, error = %err, "dropping text");
            }
        }
    }

    async fn handle_close(&mut self, client_id: ClientId) {
        let Some(closed) = self.registry.close_client(client_id) else {
            return;
        };
        for departure in &closed.departures {
            self.announce_departure(departure).await;
        }
        self.close_sink(client_id, closed.sink.as_ref()).await;
    }

    async fn evict_failed(&mut self) {
        while let Some(client_id) = self.failed.pop() {
            if self.registry.sink(client_id).is_some() {
                info!(client_id, "closing client after failed delivery");
                self.handle_close(client_id).await;
            }
        }
    }

    async fn announce_departure(&mut self, departure: &Departure) {
        if departure.remaining.is_empty() {
            return;
        }
        let notice = ServerMessage::MemberLeft(member_event(&departure.session));
        self.notify(&departure.remaining, &notice).await;
    }

    async fn reply(&mut self, client_id: ClientId, message: &ServerMessage) {
        let Some(sink) = self.registry.sink(client_id) else {
            return;
        };
        let Some(payload) = encode(message) else {
            return;
        };
        if let Err(error) = self.engine.deliver(sink.as_ref(), &payload).await {
            warn!(client_id, %error, "failed to reply to client");
            self.failed.push(client_id);
        }
    }

    async fn notify(&mut self, recipients: &[Recipient], message: &ServerMessage) {
        let Some(payload) = encode(message) else {
            return;
        };
        let report = self.engine.broadcast(recipients, &payload).await;
        self.failed
            .extend(report.failures().map(|outcome| outcome.client_id));
    }

    async fn close_sink(&self, client_id: ClientId, sink: &dyn MessageSink) {
        match timeout(self.engine.delivery_timeout(), sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!(client_id, ?error, "error closing connection"),
            Err(_) => debug!(client_id, "timed out closing connection"),
        }
    }

    async fn shutdown(&mut self) {
        info!(clients = self.registry.client_count(), "coordinator shutting down");
        for client_id in self.registry.client_ids() {
            if let Some(closed) = self.registry.close_client(client_id) {
                self.close_sink(client_id, closed.sink.as_ref()).await;
            }
        }
    }
}

fn member_event(session: &RoomSession) -> MemberEvent {
    MemberEvent {
        room_handle: session.room_handle.clone(),
        room_session_id: session.id,
        session_handle: session.session_handle.clone(),
    }
}

fn encode(message: &ServerMessage) -> Option<Vec<u8>> {
    match message.encode() {
        Ok(payload) => Some(payload),
        Err(error) => {
            warn!(?error, "failed to encode server message");
            None
        }
    }
}
