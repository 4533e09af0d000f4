//! Rising clock edges, the only suspension point of every model.
//!
//! [`Clock`] owns the cycle counter and publishes it through a
//! `tokio::sync::watch` channel; [`ClockEdge`] handles wait for the next
//! publication. `Clock::run` ticks on `tokio::time::sleep`, so with paused
//! tokio time the runtime only advances the clock once every task reacting to
//! the previous edge has parked again.

use std::sync::Arc;
use std::time::Duration;

use log::trace;
use tokio::sync::watch;

use crate::error::{BfmError, BfmResult};

/// Work performed right before each rising edge is published.
pub trait EdgeHook: Send + Sync {
    fn before_edge(&self);
}

#[derive(Debug, Clone)]
pub struct ClockConfig {
    pub period: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1),
        }
    }
}

impl ClockConfig {
    pub fn period(mut self, period: Duration) -> Self {
        assert!(!period.is_zero(), "clock period must be non-zero");
        self.period = period;
        self
    }
}

/// Source of rising edges.
pub struct Clock {
    config: ClockConfig,
    cycle: watch::Sender<u64>,
    hooks: Vec<Arc<dyn EdgeHook>>,
}

impl Clock {
    pub fn new(config: ClockConfig) -> Self {
        let (cycle, _) = watch::channel(0);
        Self {
            config,
            cycle,
            hooks: Vec::new(),
        }
    }

    /// Registers a hook, typically a [`crate::signal::SimBus`] to commit.
    pub fn attach(&mut self, hook: Arc<dyn EdgeHook>) {
        self.hooks.push(hook);
    }

    pub fn edge(&self) -> ClockEdge {
        ClockEdge {
            cycle: self.cycle.subscribe(),
        }
    }

    /// Number of rising edges produced so far.
    pub fn cycle(&self) -> u64 {
        *self.cycle.borrow()
    }

    /// Produces one rising edge.
    pub fn tick(&self) {
        for hook in &self.hooks {
            hook.before_edge();
        }
        self.cycle.send_modify(|cycle| *cycle += 1);
        trace!("rising edge {}", self.cycle());
    }

    /// Ticks once per period, forever.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.config.period).await;
            self.tick();
        }
    }
}

/// Handle for waiting on rising edges. Cheap to clone.
#[derive(Clone)]
pub struct ClockEdge {
    cycle: watch::Receiver<u64>,
}

impl ClockEdge {
    /// Cycle number of the most recent edge.
    pub fn cycle(&self) -> u64 {
        *self.cycle.borrow()
    }

    /// Waits for the next rising edge and returns its cycle number.
    pub async fn rising(&self) -> BfmResult<u64> {
        let mut cycle = self.cycle.clone();
        cycle.borrow_and_update();
        cycle.changed().await.map_err(|_| BfmError::ClockStopped)?;
        let now = *cycle.borrow();
        Ok(now)
    }

    /// Waits for `n` rising edges.
    pub async fn cycles(&self, n: u32) -> BfmResult<()> {
        for _ in 0..n {
            self.rising().await?;
        }
        Ok(())
    }

    /// Waits for the first rising edge at which `condition` holds.
    pub async fn until<F>(&self, mut condition: F) -> BfmResult<u64>
    where
        F: FnMut() -> bool,
    {
        loop {
            let cycle = self.rising().await?;
            if condition() {
                return Ok(cycle);
            }
        }
    }
}
