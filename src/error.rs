use thiserror::Error;

/// Failures surfaced by the bus functional models.
///
/// Configuration errors are raised once at connect time. Protocol violations
/// abort the transfer that observed them; nothing here is retried.
#[derive(Debug, Error)]
pub enum BfmError {
    #[error("required signal '{name}' is not bound")]
    MissingSignal { name: String },
    #[error("signal '{name}' is {width} bits wide, at most 128 bits are supported")]
    UnsupportedWidth { name: String, width: u32 },
    #[error("data path width {bit_width} is not a multiple of 8 bits between 8 and 128")]
    InvalidWidth { bit_width: u32 },
    #[error("invalid AXI4-Stream TKEEP {keep:#x} on non-final beat {beat} (expected {expected:#x})")]
    InvalidKeep { beat: usize, keep: u128, expected: u128 },
    #[error("WLAST is {observed} on beat {beat} but the burst expects {expected}")]
    WriteLastMismatch {
        beat: usize,
        expected: bool,
        observed: bool,
    },
    #[error("RLAST is {observed} on beat {beat} but the burst expects {expected}")]
    ReadLastMismatch {
        beat: usize,
        expected: bool,
        observed: bool,
    },
    #[error("burst beat size 2^{size} bytes exceeds the {data_width}-bit data bus")]
    UnsupportedBurstSize { size: u32, data_width: u32 },
    #[error("incorrect value '{name}': {actual:#x} != {expected:#x}")]
    ValueMismatch {
        name: String,
        expected: u128,
        actual: u128,
    },
    #[error("clock stopped while waiting for a rising edge")]
    ClockStopped,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BfmResult<T> = Result<T, BfmError>;
