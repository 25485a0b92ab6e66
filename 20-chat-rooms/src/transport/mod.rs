//! Concrete [`crate::connection`] implementations.

pub mod lines;
pub mod ws;
