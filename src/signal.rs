//! Named signal handles and the in-process signal bus.
//!
//! A [`SignalBus`] resolves logical names such as `s_axi_awaddr` to handles
//! implementing [`Signal`]. Channel models resolve their roles once at connect
//! time through a [`Binder`] and keep the resulting [`Binding`]s for their
//! whole lifetime.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::trace;

use crate::clock::EdgeHook;
use crate::codec::value_mask;
use crate::error::{BfmError, BfmResult};

/// Widest value a signal can carry.
pub const MAX_SIGNAL_WIDTH: u32 = 128;

/// One driven or observed wire (or vector of wires).
///
/// Reads return the value sampled at the most recent clock edge. Writes take
/// effect at the next edge, so every model reacting to one edge observes the
/// same values regardless of evaluation order.
pub trait Signal: Send + Sync {
    fn name(&self) -> &str;
    fn width(&self) -> u32;
    fn read(&self) -> u128;
    fn write(&self, value: u128);
}

/// Lookup of signals by name. Missing names return `None`.
pub trait SignalBus: Send + Sync {
    fn signal(&self, name: &str) -> Option<Arc<dyn Signal>>;
}

#[derive(Debug, Default)]
struct SignalState {
    current: u128,
    pending: Option<u128>,
}

/// Signal with register semantics, owned by a [`SimBus`].
pub struct SimSignal {
    name: String,
    width: u32,
    state: Mutex<SignalState>,
}

impl SimSignal {
    fn new(name: &str, width: u32) -> Self {
        assert!(
            width > 0 && width <= MAX_SIGNAL_WIDTH,
            "signal '{}' width {} out of range",
            name,
            width
        );
        Self {
            name: name.to_string(),
            width,
            state: Mutex::new(SignalState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies the pending write, if any.
    fn commit(&self) {
        let mut state = self.state();
        if let Some(value) = state.pending.take() {
            state.current = value;
        }
    }

    /// Value that will be visible after the next edge.
    pub fn next_value(&self) -> u128 {
        let state = self.state();
        state.pending.unwrap_or(state.current)
    }
}

impl Signal for SimSignal {
    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn read(&self) -> u128 {
        self.state().current
    }

    fn write(&self, value: u128) {
        assert!(
            value <= value_mask(self.width),
            "value {:#x} does not fit signal '{}' ({} bits)",
            value,
            self.name,
            self.width
        );
        self.state().pending = Some(value);
    }
}

impl fmt::Debug for SimSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("SimSignal")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("current", &state.current)
            .field("pending", &state.pending)
            .finish()
    }
}

/// In-process signal bus used when the models talk to each other directly
/// (loopback benches) instead of to an external simulator.
///
/// The clock commits all pending writes right before each rising edge; attach
/// the bus to the clock with [`crate::clock::Clock::attach`].
#[derive(Clone, Default)]
pub struct SimBus {
    signals: Arc<Mutex<HashMap<String, Arc<SimSignal>>>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SimSignal>>> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declares a signal. Declaring an existing name returns the existing one.
    pub fn add(&self, name: &str, width: u32) -> Arc<SimSignal> {
        self.table()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SimSignal::new(name, width)))
            .clone()
    }

    /// Makes `alias` refer to the same wire as `target`.
    pub fn alias(&self, alias: &str, target: &str) -> BfmResult<()> {
        let mut table = self.table();
        let signal = table
            .get(target)
            .cloned()
            .ok_or_else(|| BfmError::MissingSignal {
                name: target.to_string(),
            })?;
        table.insert(alias.to_string(), signal);
        Ok(())
    }

    /// Aliases every `<target_base>_<role>` signal as `<alias_base>_<role>`.
    ///
    /// Connects e.g. a stream writer on `s_axis` to a stream reader on
    /// `m_axis` without a design in between.
    pub fn alias_interface(&self, alias_base: &str, target_base: &str) {
        let mut table = self.table();
        let prefix = format!("{}_", target_base);
        let roles: Vec<(String, Arc<SimSignal>)> = table
            .iter()
            .filter_map(|(name, signal)| {
                let role = name.strip_prefix(&prefix)?;
                (!role.contains('_')).then(|| (role.to_string(), signal.clone()))
            })
            .collect();
        for (role, signal) in roles {
            table.insert(format!("{}_{}", alias_base, role), signal);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<SimSignal>> {
        self.table().get(name).cloned()
    }

    /// Applies every pending write.
    pub fn commit(&self) {
        let signals: Vec<Arc<SimSignal>> = self.table().values().cloned().collect();
        for signal in signals {
            signal.commit();
        }
    }

    /// Declares the AXI4-Lite write and read channel signals of `base`.
    pub fn add_lite_interface(&self, base: &str, addr_width: u32, data_width: u32) {
        let strb_width = data_width / 8;
        for (role, width) in [
            ("awaddr", addr_width),
            ("awvalid", 1),
            ("awready", 1),
            ("wdata", data_width),
            ("wstrb", strb_width),
            ("wvalid", 1),
            ("wready", 1),
            ("bresp", 2),
            ("bvalid", 1),
            ("bready", 1),
            ("araddr", addr_width),
            ("arvalid", 1),
            ("arready", 1),
            ("rdata", data_width),
            ("rvalid", 1),
            ("rready", 1),
        ] {
            self.add(&format!("{}_{}", base, role), width);
        }
    }

    /// Declares an AXI4-Stream interface. `tready` and `tuser` are optional.
    pub fn add_stream_interface(
        &self,
        base: &str,
        data_width: u32,
        with_ready: bool,
        user_width: Option<u32>,
    ) {
        self.add(&format!("{}_tdata", base), data_width);
        self.add(&format!("{}_tkeep", base), data_width / 8);
        self.add(&format!("{}_tvalid", base), 1);
        self.add(&format!("{}_tlast", base), 1);
        if with_ready {
            self.add(&format!("{}_tready", base), 1);
        }
        if let Some(width) = user_width {
            self.add(&format!("{}_tuser", base), width);
        }
    }

    /// Declares the AXI4 memory-mapped read and write channels of `base`.
    pub fn add_axi4_interface(&self, base: &str, addr_width: u32, data_width: u32) {
        for (role, width) in [
            ("araddr", addr_width),
            ("arlen", 8),
            ("arsize", 3),
            ("arvalid", 1),
            ("arready", 1),
            ("rdata", data_width),
            ("rlast", 1),
            ("rvalid", 1),
            ("rready", 1),
            ("awaddr", addr_width),
            ("awlen", 8),
            ("awsize", 3),
            ("awvalid", 1),
            ("awready", 1),
            ("wdata", data_width),
            ("wlast", 1),
            ("wvalid", 1),
            ("wready", 1),
            ("bresp", 2),
            ("bvalid", 1),
            ("bready", 1),
        ] {
            self.add(&format!("{}_{}", base, role), width);
        }
    }
}

impl SignalBus for SimBus {
    fn signal(&self, name: &str) -> Option<Arc<dyn Signal>> {
        self.get(name).map(|s| s as Arc<dyn Signal>)
    }
}

impl EdgeHook for SimBus {
    fn before_edge(&self) {
        self.commit();
    }
}

/// A resolved signal owned by one channel model.
#[derive(Clone)]
pub struct Binding {
    signal: Arc<dyn Signal>,
}

impl Binding {
    /// Resolves `name` on `bus`, failing if it does not exist.
    pub fn lookup(bus: &dyn SignalBus, name: &str) -> BfmResult<Self> {
        let signal = bus.signal(name).ok_or_else(|| BfmError::MissingSignal {
            name: name.to_string(),
        })?;
        if signal.width() > MAX_SIGNAL_WIDTH {
            return Err(BfmError::UnsupportedWidth {
                name: name.to_string(),
                width: signal.width(),
            });
        }
        Ok(Self { signal })
    }

    pub fn name(&self) -> &str {
        self.signal.name()
    }

    pub fn width(&self) -> u32 {
        self.signal.width()
    }

    pub fn read(&self) -> u128 {
        self.signal.read()
    }

    pub fn write(&self, value: u128) {
        self.signal.write(value)
    }

    pub fn is_high(&self) -> bool {
        self.signal.read() != 0
    }

    pub fn set(&self, high: bool) {
        self.signal.write(high as u128)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.signal.name())
            .field("width", &self.signal.width())
            .finish()
    }
}

/// Resolves `<base>_<role>` names for one interface.
///
/// `base` is the default interface name (`s_axi`, `m_axis`, ...) optionally
/// extended with a user prefix: `s_axi` + `ctrl` resolves `s_axi_ctrl_awaddr`.
pub struct Binder<'a> {
    bus: &'a dyn SignalBus,
    base: String,
}

impl<'a> Binder<'a> {
    pub fn new(bus: &'a dyn SignalBus, default_base: &str, prefix: Option<&str>) -> Self {
        let base = match prefix {
            Some(prefix) => format!("{}_{}", default_base, prefix),
            None => default_base.to_string(),
        };
        Self { bus, base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn name(&self, role: &str) -> String {
        format!("{}_{}", self.base, role)
    }

    pub fn required(&self, role: &str) -> BfmResult<Binding> {
        Binding::lookup(self.bus, &self.name(role))
    }

    /// Looks up an optional role; absence is not an error.
    pub fn optional(&self, role: &str) -> BfmResult<Option<Binding>> {
        let name = self.name(role);
        if self.bus.signal(&name).is_none() {
            trace!("optional signal {} not present", name);
            return Ok(None);
        }
        Binding::lookup(self.bus, &name).map(Some)
    }
}

/// Optional stream roles detected once at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelCapabilities {
    pub has_ready: bool,
    pub has_sideband: bool,
}

impl ChannelCapabilities {
    pub fn detect(ready: &Option<Binding>, sideband: &Option<Binding>) -> Self {
        Self {
            has_ready: ready.is_some(),
            has_sideband: sideband.is_some(),
        }
    }
}
