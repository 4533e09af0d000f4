//! AXI4 memory-mapped slave with burst support.
//!
//! [`MemoryResponder`] answers the read and write bursts a design issues on
//! its `m_axi_*` master port from a [`BackingStore`]. Acceptance, beat gaps and
//! write-data stalls are randomized through a [`StimulusPolicy`] so the design
//! sees varied timing; data correctness never depends on it.
//!
//! [`BurstMaster`] is the opposite side, used to exercise the responder (or
//! any AXI4 slave) from a bench.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::clock::ClockEdge;
use crate::codec::{validate_width, value_mask};
use crate::error::{BfmError, BfmResult};
use crate::lock::AccessSerializer;
use crate::signal::{Binder, Binding, SignalBus};
use crate::stimulus::StimulusPolicy;
use crate::store::BackingStore;

/// Address and burst information of one AR or AW handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstRequest {
    pub address: u64,
    /// Number of beats minus one (AxLEN).
    pub length: u32,
    /// Log2 of the bytes per beat (AxSIZE).
    pub size: u32,
}

impl BurstRequest {
    pub fn new(address: u64, length: u32, size: u32) -> Self {
        Self {
            address,
            length,
            size,
        }
    }

    pub fn beats(&self) -> usize {
        self.length as usize + 1
    }

    pub fn beat_bytes(&self) -> usize {
        1 << self.size
    }

    /// Total bytes covered by the burst.
    pub fn span(&self) -> usize {
        self.beats() * self.beat_bytes()
    }

    /// Address of beat `index`.
    pub fn beat_address(&self, index: usize) -> u64 {
        self.address + (index * self.beat_bytes()) as u64
    }

    fn check_bus(&self, data_width: u32) -> BfmResult<()> {
        if self.beat_bytes() * 8 > data_width as usize {
            return Err(BfmError::UnsupportedBurstSize {
                size: self.size,
                data_width,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Upper bound of the random delay before an address is accepted and
    /// again before the first beat is served.
    pub addr_delay_max: u32,
    /// Upper bound of the random gap between read beats.
    pub beat_gap_max: u32,
    /// Probability of holding WREADY low after a write beat.
    pub stall_probability: f64,
    /// Upper bound of such a stall.
    pub stall_max: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            addr_delay_max: 10,
            beat_gap_max: 5,
            stall_probability: 0.1,
            stall_max: 5,
        }
    }
}

impl MemoryConfig {
    /// No random delays at all.
    pub fn immediate() -> Self {
        Self {
            addr_delay_max: 0,
            beat_gap_max: 0,
            stall_probability: 0.0,
            stall_max: 0,
        }
    }

    pub fn addr_delay_max(mut self, cycles: u32) -> Self {
        self.addr_delay_max = cycles;
        self
    }

    pub fn beat_gap_max(mut self, cycles: u32) -> Self {
        self.beat_gap_max = cycles;
        self
    }

    pub fn stall(mut self, probability: f64, max_cycles: u32) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "stall probability {} outside 0.0..=1.0",
            probability
        );
        self.stall_probability = probability;
        self.stall_max = max_cycles;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Read,
    Write,
}

struct ReadChannel {
    araddr: Binding,
    arlen: Binding,
    arsize: Binding,
    arvalid: Binding,
    arready: Binding,
    rdata: Binding,
    rlast: Binding,
    rvalid: Binding,
    rready: Binding,
}

struct WriteChannel {
    awaddr: Binding,
    awlen: Binding,
    awsize: Binding,
    awvalid: Binding,
    awready: Binding,
    wdata: Binding,
    wlast: Binding,
    wvalid: Binding,
    wready: Binding,
    bresp: Binding,
    bvalid: Binding,
    bready: Binding,
}

fn bind_channels(binder: &Binder<'_>) -> BfmResult<(ReadChannel, WriteChannel)> {
    let read = ReadChannel {
        araddr: binder.required("araddr")?,
        arlen: binder.required("arlen")?,
        arsize: binder.required("arsize")?,
        arvalid: binder.required("arvalid")?,
        arready: binder.required("arready")?,
        rdata: binder.required("rdata")?,
        rlast: binder.required("rlast")?,
        rvalid: binder.required("rvalid")?,
        rready: binder.required("rready")?,
    };
    let write = WriteChannel {
        awaddr: binder.required("awaddr")?,
        awlen: binder.required("awlen")?,
        awsize: binder.required("awsize")?,
        awvalid: binder.required("awvalid")?,
        awready: binder.required("awready")?,
        wdata: binder.required("wdata")?,
        wlast: binder.required("wlast")?,
        wvalid: binder.required("wvalid")?,
        wready: binder.required("wready")?,
        bresp: binder.required("bresp")?,
        bvalid: binder.required("bvalid")?,
        bready: binder.required("bready")?,
    };
    Ok((read, write))
}

/// Burst-capable AXI4 slave backed by a store.
pub struct MemoryResponder<S> {
    edge: ClockEdge,
    store: Arc<Mutex<S>>,
    config: MemoryConfig,
    policy: StimulusPolicy,
    read: ReadChannel,
    write: WriteChannel,
}

impl<S: BackingStore> MemoryResponder<S> {
    /// Binds `m_axi_<role>` (or `m_axi_<prefix>_<role>`) signals.
    pub fn connect(
        bus: &dyn SignalBus,
        edge: ClockEdge,
        store: Arc<Mutex<S>>,
        prefix: Option<&str>,
        config: MemoryConfig,
        policy: StimulusPolicy,
    ) -> BfmResult<Self> {
        let binder = Binder::new(bus, "m_axi", prefix);
        let (read, write) = bind_channels(&binder)?;
        validate_width(read.rdata.width())?;
        debug!(
            "AXI4 memory {} connected, {}-bit data, seed {}",
            binder.base(),
            read.rdata.width(),
            policy.seed()
        );
        Ok(Self {
            edge,
            store,
            config,
            policy,
            read,
            write,
        })
    }

    pub fn store(&self) -> Arc<Mutex<S>> {
        self.store.clone()
    }

    fn lock_store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn data_width(&self) -> u32 {
        self.read.rdata.width()
    }

    async fn random_delay(&self, max: u32) -> BfmResult<()> {
        let cycles = self.policy.cycles(0..=max);
        self.edge.cycles(cycles).await
    }

    /// Serves bursts forever. Returns only when a protocol violation is
    /// detected or the clock stops.
    pub async fn run(&self) -> BfmResult<()> {
        self.read.arready.set(false);
        self.write.awready.set(false);
        self.read.rvalid.set(false);
        self.read.rlast.set(false);
        self.write.wready.set(false);
        self.write.bvalid.set(false);

        loop {
            let request = self.wait_request().await?;
            self.random_delay(self.config.addr_delay_max).await?;
            match request {
                Request::Read => self.serve_read().await?,
                Request::Write => self.serve_write().await?,
            }
        }
    }

    /// Idle: waits for a pending request, preferring reads over writes.
    async fn wait_request(&self) -> BfmResult<Request> {
        loop {
            self.edge.rising().await?;
            if self.read.arvalid.is_high() {
                return Ok(Request::Read);
            }
            if self.write.awvalid.is_high() {
                return Ok(Request::Write);
            }
        }
    }

    async fn serve_read(&self) -> BfmResult<()> {
        let ch = &self.read;

        ch.arready.set(true);
        self.edge.until(|| ch.arvalid.is_high()).await?;
        let burst = BurstRequest::new(
            ch.araddr.read() as u64,
            ch.arlen.read() as u32,
            ch.arsize.read() as u32,
        );
        ch.arready.set(false);
        burst.check_bus(self.data_width())?;
        trace!("AXI4 read burst accepted: {:?}", burst);

        self.random_delay(self.config.addr_delay_max).await?;

        for i in 0..burst.beats() {
            let data = self
                .lock_store()
                .read_reverse(burst.beat_address(i), burst.beat_bytes());
            ch.rdata.write(data);
            ch.rvalid.set(true);
            ch.rlast.set(i == burst.length as usize);

            self.edge.until(|| ch.rready.is_high()).await?;
            ch.rvalid.set(false);
            ch.rlast.set(false);

            if i != burst.length as usize {
                self.random_delay(self.config.beat_gap_max).await?;
            }
        }

        debug!(
            "AXI4 read burst {:#x} served ({} x {} bytes)",
            burst.address,
            burst.beats(),
            burst.beat_bytes()
        );
        Ok(())
    }

    async fn serve_write(&self) -> BfmResult<()> {
        let ch = &self.write;

        ch.awready.set(true);
        self.edge.until(|| ch.awvalid.is_high()).await?;
        let burst = BurstRequest::new(
            ch.awaddr.read() as u64,
            ch.awlen.read() as u32,
            ch.awsize.read() as u32,
        );
        ch.awready.set(false);
        burst.check_bus(self.data_width())?;
        trace!("AXI4 write burst accepted: {:?}", burst);

        self.random_delay(self.config.addr_delay_max).await?;

        let lane_mask = value_mask(burst.beat_bytes() as u32 * 8);
        for i in 0..burst.beats() {
            ch.wready.set(true);
            self.edge.until(|| ch.wvalid.is_high()).await?;

            let data = ch.wdata.read() & lane_mask;
            self.lock_store()
                .write_reverse(burst.beat_address(i), data, burst.beat_bytes());

            let expected = i == burst.length as usize;
            let observed = ch.wlast.is_high();
            if observed != expected {
                ch.wready.set(false);
                return Err(BfmError::WriteLastMismatch {
                    beat: i,
                    expected,
                    observed,
                });
            }

            ch.wready.set(false);

            if i != burst.length as usize && self.policy.chance(self.config.stall_probability) {
                let stall = self.policy.cycles(1..=self.config.stall_max.max(1));
                self.edge.cycles(stall).await?;
            }
        }

        ch.bresp.write(0);
        ch.bvalid.set(true);
        self.edge.until(|| ch.bready.is_high()).await?;
        ch.bvalid.set(false);

        debug!(
            "AXI4 write burst {:#x} stored ({} x {} bytes)",
            burst.address,
            burst.beats(),
            burst.beat_bytes()
        );
        Ok(())
    }
}

/// AXI4 master issuing one burst at a time on `m_axi_*` signals.
pub struct BurstMaster {
    edge: ClockEdge,
    access: AccessSerializer,
    read: ReadChannel,
    write: WriteChannel,
}

impl BurstMaster {
    pub fn connect(bus: &dyn SignalBus, edge: ClockEdge, prefix: Option<&str>) -> BfmResult<Self> {
        let binder = Binder::new(bus, "m_axi", prefix);
        let (read, write) = bind_channels(&binder)?;
        validate_width(read.rdata.width())?;
        Ok(Self {
            edge,
            access: AccessSerializer::new(),
            read,
            write,
        })
    }

    pub async fn reset(&self) -> BfmResult<()> {
        self.read.arvalid.set(false);
        self.read.rready.set(false);
        self.write.awvalid.set(false);
        self.write.wvalid.set(false);
        self.write.wlast.set(false);
        self.write.bready.set(false);
        self.edge.rising().await?;
        Ok(())
    }

    /// Writes `beats` (one bus word each, lowest address in the least
    /// significant byte) and returns BRESP.
    pub async fn write_burst(&self, burst: BurstRequest, beats: &[u128]) -> BfmResult<u128> {
        assert_eq!(
            beats.len(),
            burst.beats(),
            "burst length does not match the supplied beats"
        );
        burst.check_bus(self.write.wdata.width())?;
        let _channel = self.access.acquire(&self.edge).await?;
        let ch = &self.write;

        ch.awaddr.write(burst.address as u128);
        ch.awlen.write(burst.length as u128);
        ch.awsize.write(burst.size as u128);
        ch.awvalid.set(true);
        self.edge.until(|| ch.awready.is_high()).await?;
        ch.awvalid.set(false);

        for (i, &word) in beats.iter().enumerate() {
            ch.wdata.write(word);
            ch.wlast.set(i == burst.length as usize);
            ch.wvalid.set(true);
            self.edge.until(|| ch.wready.is_high()).await?;
        }
        ch.wvalid.set(false);
        ch.wlast.set(false);

        ch.bready.set(true);
        self.edge.until(|| ch.bvalid.is_high()).await?;
        let resp = ch.bresp.read();
        ch.bready.set(false);
        Ok(resp)
    }

    /// Reads one burst and returns its beats.
    pub async fn read_burst(&self, burst: BurstRequest) -> BfmResult<Vec<u128>> {
        burst.check_bus(self.read.rdata.width())?;
        let _channel = self.access.acquire(&self.edge).await?;
        let ch = &self.read;

        ch.araddr.write(burst.address as u128);
        ch.arlen.write(burst.length as u128);
        ch.arsize.write(burst.size as u128);
        ch.arvalid.set(true);
        ch.rready.set(true);
        self.edge.until(|| ch.arready.is_high()).await?;
        ch.arvalid.set(false);

        let mut beats = Vec::with_capacity(burst.beats());
        for i in 0..burst.beats() {
            self.edge.until(|| ch.rvalid.is_high()).await?;
            beats.push(ch.rdata.read());

            let expected = i == burst.length as usize;
            let observed = ch.rlast.is_high();
            if observed != expected {
                ch.rready.set(false);
                return Err(BfmError::ReadLastMismatch {
                    beat: i,
                    expected,
                    observed,
                });
            }
        }
        ch.rready.set(false);
        Ok(beats)
    }
}
