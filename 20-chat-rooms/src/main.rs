use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{info, warn};

use chat_rooms::{
    cli::{Cli, Command, ServeArgs, Transport},
    client,
    coordinator::Coordinator,
    server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let addr = listener.local_addr()?;
    info!(transport = ?args.transport, "chat server listening on {}", addr);

    let (coordinator, handle) = Coordinator::new(&args.coordinator_config());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let coordinator = tokio::spawn(coordinator.run_until(async move {
        let _ = stop_rx.await;
    }));

    let served = match args.transport {
        Transport::Tcp => server::serve_tcp(listener, handle, ctrl_c()).await,
        Transport::Ws => server::serve_ws(listener, handle, &args.path, ctrl_c()).await,
    };
    if let Err(err) = &served {
        warn!("server exited with error: {err:?}");
    }

    let _ = stop_tx.send(());
    coordinator.await.context("coordinator task failed")??;
    served
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}
