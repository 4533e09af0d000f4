//! AXI4-Lite register access.
//!
//! [`LiteWriter`] and [`LiteReader`] drive the write and read channels of an
//! AXI4-Lite slave (`s_axi_*` signals of the design). Each call performs one
//! fully handshaked access; concurrent callers on one instance are serialized.
//! [`LiteResponder`] is the slave side, backed by a [`BackingStore`], for
//! benches that have no design behind the channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};

use crate::clock::ClockEdge;
use crate::codec::{full_keep, to_bytes, validate_width, Endian};
use crate::error::BfmResult;
use crate::lock::AccessSerializer;
use crate::signal::{Binder, Binding, SignalBus};
use crate::store::BackingStore;

const DEFAULT_BASE: &str = "s_axi";

/// OKAY response on BRESP/RRESP.
pub const RESP_OKAY: u128 = 0;

/// Write-channel driver.
pub struct LiteWriter {
    edge: ClockEdge,
    bit_width: u32,
    access: AccessSerializer,
    awaddr: Binding,
    awvalid: Binding,
    awready: Binding,
    wdata: Binding,
    wstrb: Binding,
    wvalid: Binding,
    wready: Binding,
    bvalid: Binding,
    bready: Binding,
    bresp: Option<Binding>,
}

impl LiteWriter {
    /// Binds `s_axi_<role>` (or `s_axi_<prefix>_<role>`) signals.
    pub fn connect(
        bus: &dyn SignalBus,
        edge: ClockEdge,
        bit_width: u32,
        prefix: Option<&str>,
    ) -> BfmResult<Self> {
        validate_width(bit_width)?;
        let binder = Binder::new(bus, DEFAULT_BASE, prefix);
        Ok(Self {
            edge,
            bit_width,
            access: AccessSerializer::new(),
            awaddr: binder.required("awaddr")?,
            awvalid: binder.required("awvalid")?,
            awready: binder.required("awready")?,
            wdata: binder.required("wdata")?,
            wstrb: binder.required("wstrb")?,
            wvalid: binder.required("wvalid")?,
            wready: binder.required("wready")?,
            bvalid: binder.required("bvalid")?,
            bready: binder.required("bready")?,
            bresp: binder.optional("bresp")?,
        })
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    /// Deasserts all valid/ready outputs and enables every write strobe.
    pub async fn reset(&self) -> BfmResult<()> {
        self.awvalid.set(false);
        self.wvalid.set(false);
        self.bready.set(false);
        self.wstrb.write(full_keep(self.bit_width));
        self.edge.rising().await?;
        Ok(())
    }

    /// Writes `data` to the register at `address`.
    pub async fn write(&self, address: u64, data: u128) -> BfmResult<()> {
        let _channel = self.access.acquire(&self.edge).await?;

        self.awaddr.write(address as u128);
        self.awvalid.set(true);
        self.wdata.write(data);
        self.wvalid.set(true);
        self.bready.set(true);

        // Address and data may be accepted on different edges.
        let aw_cycle = self.edge.until(|| self.awready.is_high()).await?;
        trace!("AXI4-Lite AW accepted at cycle {}", aw_cycle);
        while !self.wready.is_high() {
            self.edge.rising().await?;
        }

        self.awvalid.set(false);
        self.wvalid.set(false);

        let b_cycle = self.edge.until(|| self.bvalid.is_high()).await?;
        if let Some(bresp) = &self.bresp {
            let resp = bresp.read();
            if resp != RESP_OKAY {
                warn!("AXI4-Lite write to {:#x} answered with BRESP {}", address, resp);
            }
        }
        trace!("AXI4-Lite B accepted at cycle {}", b_cycle);

        self.bready.set(false);
        self.edge.rising().await?;

        debug!("AXI4-Lite write {:#x} <- {:#x}", address, data);
        Ok(())
    }
}

/// Read-channel driver.
pub struct LiteReader {
    edge: ClockEdge,
    bit_width: u32,
    access: AccessSerializer,
    araddr: Binding,
    arvalid: Binding,
    arready: Binding,
    rdata: Binding,
    rvalid: Binding,
    rready: Binding,
}

impl LiteReader {
    pub fn connect(
        bus: &dyn SignalBus,
        edge: ClockEdge,
        bit_width: u32,
        prefix: Option<&str>,
    ) -> BfmResult<Self> {
        validate_width(bit_width)?;
        let binder = Binder::new(bus, DEFAULT_BASE, prefix);
        Ok(Self {
            edge,
            bit_width,
            access: AccessSerializer::new(),
            araddr: binder.required("araddr")?,
            arvalid: binder.required("arvalid")?,
            arready: binder.required("arready")?,
            rdata: binder.required("rdata")?,
            rvalid: binder.required("rvalid")?,
            rready: binder.required("rready")?,
        })
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub async fn reset(&self) -> BfmResult<()> {
        self.arvalid.set(false);
        self.rready.set(false);
        self.edge.rising().await?;
        Ok(())
    }

    /// Reads the register at `address`.
    pub async fn read(&self, address: u64) -> BfmResult<u128> {
        let _channel = self.access.acquire(&self.edge).await?;

        self.araddr.write(address as u128);
        self.arvalid.set(true);
        self.rready.set(true);

        self.edge.until(|| self.arready.is_high()).await?;
        self.arvalid.set(false);

        self.edge.until(|| self.rvalid.is_high()).await?;
        self.rready.set(false);
        let data = self.rdata.read();

        self.edge.rising().await?;

        debug!("AXI4-Lite read {:#x} -> {:#x}", address, data);
        Ok(data)
    }
}

/// AXI4-Lite slave serving register accesses from a backing store.
///
/// Data is stored with the lowest address in the least significant byte of
/// the bus word. Write strobes select the bytes that are updated.
pub struct LiteResponder<S> {
    edge: ClockEdge,
    bit_width: u32,
    store: Arc<Mutex<S>>,
    awaddr: Binding,
    awvalid: Binding,
    awready: Binding,
    wdata: Binding,
    wstrb: Binding,
    wvalid: Binding,
    wready: Binding,
    bresp: Binding,
    bvalid: Binding,
    bready: Binding,
    araddr: Binding,
    arvalid: Binding,
    arready: Binding,
    rdata: Binding,
    rvalid: Binding,
    rready: Binding,
}

impl<S: BackingStore> LiteResponder<S> {
    pub fn connect(
        bus: &dyn SignalBus,
        edge: ClockEdge,
        bit_width: u32,
        prefix: Option<&str>,
        store: Arc<Mutex<S>>,
    ) -> BfmResult<Self> {
        validate_width(bit_width)?;
        let binder = Binder::new(bus, DEFAULT_BASE, prefix);
        Ok(Self {
            edge,
            bit_width,
            store,
            awaddr: binder.required("awaddr")?,
            awvalid: binder.required("awvalid")?,
            awready: binder.required("awready")?,
            wdata: binder.required("wdata")?,
            wstrb: binder.required("wstrb")?,
            wvalid: binder.required("wvalid")?,
            wready: binder.required("wready")?,
            bresp: binder.required("bresp")?,
            bvalid: binder.required("bvalid")?,
            bready: binder.required("bready")?,
            araddr: binder.required("araddr")?,
            arvalid: binder.required("arvalid")?,
            arready: binder.required("arready")?,
            rdata: binder.required("rdata")?,
            rvalid: binder.required("rvalid")?,
            rready: binder.required("rready")?,
        })
    }

    pub fn store(&self) -> Arc<Mutex<S>> {
        self.store.clone()
    }

    fn lock_store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn word_bytes(&self) -> usize {
        (self.bit_width / 8) as usize
    }

    fn commit_write(&self, address: u64, data: u128, strobe: u128) {
        let bytes = to_bytes(data, self.word_bytes(), Endian::Little);
        let mut store = self.lock_store();
        for (lane, byte) in bytes.iter().enumerate() {
            if strobe & (1 << lane) != 0 {
                store.write_bytes(address + lane as u64, &[*byte]);
            }
        }
    }

    /// Serves accesses until the clock stops.
    pub async fn run(&self) -> BfmResult<()> {
        let mut addr: Option<u64> = None;
        let mut data: Option<(u128, u128)> = None;

        self.awready.set(true);
        self.wready.set(true);
        self.bvalid.set(false);
        self.bresp.write(RESP_OKAY);
        self.arready.set(true);
        self.rvalid.set(false);

        loop {
            self.edge.rising().await?;

            if self.bvalid.is_high() && self.bready.is_high() {
                self.bvalid.set(false);
                self.awready.set(true);
                self.wready.set(true);
            }
            if self.awvalid.is_high() && self.awready.is_high() {
                addr = Some(self.awaddr.read() as u64);
                self.awready.set(false);
            }
            if self.wvalid.is_high() && self.wready.is_high() {
                data = Some((self.wdata.read(), self.wstrb.read()));
                self.wready.set(false);
            }
            if let (Some(address), Some((value, strobe))) = (addr, data) {
                self.commit_write(address, value, strobe);
                trace!("AXI4-Lite slave stored {:#x} at {:#x}", value, address);
                self.bresp.write(RESP_OKAY);
                self.bvalid.set(true);
                addr = None;
                data = None;
            }

            if self.rvalid.is_high() && self.rready.is_high() {
                self.rvalid.set(false);
                self.arready.set(true);
            }
            if self.arvalid.is_high() && self.arready.is_high() {
                let address = self.araddr.read() as u64;
                let value = self.lock_store().read_reverse(address, self.word_bytes());
                self.rdata.write(value);
                self.rvalid.set(true);
                self.arready.set(false);
            }
        }
    }
}
