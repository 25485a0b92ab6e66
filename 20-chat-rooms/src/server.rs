//! Acceptors that turn listening sockets into connections on the coordinator.

use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    coordinator::CoordinatorHandle,
    transport::{lines, ws},
};

/// Accepts raw TCP clients speaking newline-delimited JSON until `shutdown` resolves.
pub async fn serve_tcp<F>(listener: TcpListener, handle: CoordinatorHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);

    loop {
        select! {
            _ = &mut shutdown => {
                info!("tcp acceptor shutting down");
                break;
            }
            accept_result = listener.accept() => {
                handle_accept_result(accept_result, &handle).await?;
            }
        }
    }

    Ok(())
}

async fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    handle: &CoordinatorHandle,
) -> Result<()> {
    match result {
        Ok((stream, peer)) => {
            debug!(%peer, "accepted connection");
            handle
                .open(lines::tcp_connection(stream))
                .await
                .with_context(|| format!("failed to hand {peer} to the coordinator"))
        }
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            Ok(())
        }
    }
}

/// Serves WebSocket upgrades on `path` until `shutdown` resolves.
pub async fn serve_ws<F>(
    listener: TcpListener,
    handle: CoordinatorHandle,
    path: &str,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, ws::router(handle, path))
        .with_graceful_shutdown(shutdown)
        .await
        .context("websocket server failed")
}
