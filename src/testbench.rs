//! Small helpers needed by most benches.

use log::info;

use crate::clock::ClockEdge;
use crate::error::{BfmError, BfmResult};
use crate::signal::Binding;
use crate::stimulus::StimulusPolicy;

/// Number of cycles a reset is held.
pub const RESET_CYCLES: u32 = 5;

/// Waits for `n` rising edges.
pub async fn wait_cycles(edge: &ClockEdge, n: u32) -> BfmResult<()> {
    edge.cycles(n).await
}

/// Pulses an active-high reset for [`RESET_CYCLES`] cycles.
pub async fn reset(edge: &ClockEdge, rst: &Binding) -> BfmResult<()> {
    pulse(edge, rst, true).await
}

/// Pulses an active-low reset for [`RESET_CYCLES`] cycles.
pub async fn reset_n(edge: &ClockEdge, rstn: &Binding) -> BfmResult<()> {
    pulse(edge, rstn, false).await
}

async fn pulse(edge: &ClockEdge, sig: &Binding, active: bool) -> BfmResult<()> {
    edge.rising().await?;
    sig.set(active);
    edge.cycles(RESET_CYCLES).await?;
    sig.set(!active);
    edge.rising().await?;
    Ok(())
}

/// Toggles a one-bit signal every 1 to 25 cycles, forever.
///
/// Typically spawned on a TREADY the bench owns to exercise backpressure.
pub async fn toggle_signal(edge: ClockEdge, sig: Binding, policy: StimulusPolicy) -> BfmResult<()> {
    loop {
        edge.cycles(policy.cycles(1..=25)).await?;
        sig.set(!sig.is_high());
    }
}

/// Fails with [`BfmError::ValueMismatch`] unless `actual == expected`.
pub fn check_value(name: &str, expected: u128, actual: u128) -> BfmResult<()> {
    if expected == actual {
        return Ok(());
    }
    Err(BfmError::ValueMismatch {
        name: name.to_string(),
        expected,
        actual,
    })
}

/// Logs progress of a long run in 10 % steps.
#[derive(Debug)]
pub struct Progress {
    total: u64,
    reported: u64,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Self { total, reported: 0 }
    }

    /// Records that iteration `i` (0-based) finished. Returns the percentage
    /// if a new 10 % step was reached.
    pub fn update(&mut self, i: u64) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        let percent = (i + 1) * 100 / self.total;
        let step = percent / 10 * 10;
        if step <= self.reported {
            return None;
        }
        self.reported = step;
        if step >= 100 {
            info!("progress: done!");
        } else {
            info!("progress: {}% ...", step);
        }
        Some(step)
    }
}
