use std::sync::atomic::{AtomicU64, Ordering};

pub type ClientId = u64;
pub type RoomSessionId = u64;

/// Hands out strictly ascending identifiers starting at 1.
///
/// Backed by an atomic so a generator shared between tasks still never repeats a value.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
