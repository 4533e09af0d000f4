//! Cycle-synchronous bus functional models for AXI4-Lite, AXI4-Stream and
//! AXI4 memory-mapped interfaces.
//!
//! Every model is an async state machine that only suspends on
//! [`clock::ClockEdge::rising`]. Benches bind the models to a
//! [`signal::SignalBus`], spawn a [`clock::Clock`] and run on a current-thread
//! tokio runtime with paused time, which lets the clock advance only once all
//! models have settled.

pub mod axi_lite;
pub mod axi_mem;
pub mod axis;
pub mod bench;
pub mod clock;
pub mod codec;
pub mod crc;
pub mod error;
pub mod lock;
pub mod net;
pub mod signal;
pub mod stimulus;
pub mod store;
pub mod testbench;

pub use axi_lite::{LiteReader, LiteResponder, LiteWriter};
pub use axi_mem::{BurstMaster, BurstRequest, MemoryConfig, MemoryResponder};
pub use axis::{Beat, StreamConfig, StreamReader, StreamTransfer, StreamWriter};
pub use bench::{create_bench_runtime, run_self_check, Bench, Responders, SelfCheckReport};
pub use clock::{Clock, ClockConfig, ClockEdge, EdgeHook};
pub use error::{BfmError, BfmResult};
pub use signal::{Binding, ChannelCapabilities, Signal, SignalBus, SimBus};
pub use stimulus::StimulusPolicy;
pub use store::{ArrayStore, BackingStore, FileStore};
