//! Room-based chat server built around a single state-owning coordinator.
//!
//! Clients connect over WebSocket or newline-delimited TCP, join named rooms,
//! and exchange text with everyone currently in those rooms. Each module has
//! one job:
//!
//! - [`coordinator`] drains the event queue fed by per-connection reader tasks
//!   and is the only code that mutates session state.
//! - [`registry`] owns clients, rooms, and room sessions.
//! - [`broadcast`] fans a payload out to a room snapshot concurrently, with a
//!   per-recipient timeout.
//! - [`protocol`] encodes and decodes the `{type, data}` envelope.
//! - [`ids`] allocates identifiers.
//! - [`connection`] and [`transport`] define and implement the byte-stream
//!   boundary; [`server`] accepts connections for either transport.
//! - [`cli`] and [`client`] back the binary: server mode and a terminal client.
//!
//! Integration tests drive the coordinator over in-memory streams and the TCP
//! acceptor end to end.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
