//! WebSocket transport: the HTTP upgrade lives here, the coordinator only sees
//! the split socket.

use std::io;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    connection::{Connection, MessageSink, MessageSource},
    coordinator::CoordinatorHandle,
};

pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        while let Some(frame) = self.stream.next().await {
            match frame.map_err(io::Error::other)? {
                Message::Text(text) => return Ok(Some(text.into_bytes())),
                Message::Binary(bytes) => return Ok(Some(bytes)),
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

/// Send half of the socket. A send that fails or is cancelled partway marks the
/// socket unusable, as with [`crate::transport::lines::LineSink`].
pub struct WsSink {
    state: Mutex<WsSinkState>,
}

struct WsSinkState {
    sink: SplitSink<WebSocket, Message>,
    torn: bool,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let text = String::from_utf8(payload.to_vec())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mut state = self.state.lock().await;
        if state.torn {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "websocket send was interrupted earlier",
            ));
        }

        state.torn = true;
        state
            .sink
            .send(Message::Text(text))
            .await
            .map_err(io::Error::other)?;
        state.torn = false;
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        state.sink.close().await.map_err(io::Error::other)
    }
}

pub fn connection(socket: WebSocket) -> Connection {
    let (sink, stream) = socket.split();
    Connection::new(
        WsSource { stream },
        WsSink {
            state: Mutex::new(WsSinkState { sink, torn: false }),
        },
    )
}

/// Routes `GET path` to the upgrade handler; every upgraded socket is opened on the coordinator.
pub fn router(handle: CoordinatorHandle, path: &str) -> Router {
    Router::new()
        .route(path, get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

async fn upgrade(ws: WebSocketUpgrade, State(handle): State<CoordinatorHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = handle.open(connection(socket)).await {
            warn!(error = ?err, "coordinator unavailable; dropping websocket");
        }
    })
}
