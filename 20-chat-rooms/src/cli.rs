use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{CoordinatorConfig, DEFAULT_EVENT_CAPACITY};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server.
    Serve(ServeArgs),
    /// Connect to a server over the line transport and chat from the terminal.
    Client(ClientArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// WebSocket upgrades over HTTP.
    Ws,
    /// Newline-delimited JSON over plain TCP.
    Tcp,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    #[arg(long, value_enum, default_value_t = Transport::Ws)]
    pub transport: Transport,

    /// HTTP path that accepts WebSocket upgrades.
    #[arg(long, default_value = "/chat")]
    pub path: String,

    /// Milliseconds a single write may take before that recipient is skipped.
    #[arg(long, default_value_t = 5000)]
    pub delivery_timeout_ms: u64,

    /// Inbound events buffered ahead of the coordinator.
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,
}

impl ServeArgs {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            event_capacity: self.event_capacity,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of a server started with `--transport tcp`.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}
