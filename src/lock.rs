//! Per-channel access serialization.

use tokio::sync::{Mutex, MutexGuard};

use crate::clock::ClockEdge;
use crate::error::BfmResult;

/// Ensures at most one transfer drives a channel at a time.
#[derive(Debug, Default)]
pub struct AccessSerializer {
    lock: Mutex<()>,
}

/// Exclusive right to drive a channel. Dropping it releases the channel.
#[derive(Debug)]
pub struct ChannelGuard<'a> {
    _held: MutexGuard<'a, ()>,
}

impl AccessSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<ChannelGuard<'_>> {
        self.lock
            .try_lock()
            .ok()
            .map(|held| ChannelGuard { _held: held })
    }

    /// Takes the channel, checking once per rising edge while it is busy.
    pub async fn acquire(&self, edge: &ClockEdge) -> BfmResult<ChannelGuard<'_>> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return Ok(guard);
            }
            edge.rising().await?;
        }
    }

    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
