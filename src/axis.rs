//! AXI4-Stream transfer drivers.
//!
//! A transfer is a sequence of TDATA words closed by TLAST. Every beat but the
//! last carries the full TKEEP mask; only the last beat may be partial. TREADY
//! and TUSER are optional and detected once when the channel is connected.

use log::{debug, trace};

use crate::clock::ClockEdge;
use crate::codec::{full_keep, validate_width};
use crate::error::{BfmError, BfmResult};
use crate::lock::AccessSerializer;
use crate::signal::{Binder, Binding, ChannelCapabilities, SignalBus};
use crate::stimulus::StimulusPolicy;

/// One stream transfer as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTransfer {
    /// TDATA words, first beat first.
    pub data: Vec<u128>,
    /// TKEEP of the last beat.
    pub keep: u128,
    /// TUSER words. The writer pads a short list with zeros; the reader
    /// returns one entry per beat when TUSER is bound.
    pub user: Option<Vec<u128>>,
}

/// One beat of a [`StreamTransfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat {
    pub data: u128,
    pub keep: u128,
    pub user: Option<u128>,
    pub last: bool,
}

impl StreamTransfer {
    pub fn new(data: Vec<u128>, keep: u128) -> Self {
        assert!(!data.is_empty(), "stream transfer needs at least one beat");
        Self {
            data,
            keep,
            user: None,
        }
    }

    pub fn with_user(mut self, user: Vec<u128>) -> Self {
        self.user = Some(user);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// TUSER for beat `index`, zero past the end of the supplied list.
    pub fn user_at(&self, index: usize) -> u128 {
        self.user
            .as_ref()
            .and_then(|user| user.get(index).copied())
            .unwrap_or(0)
    }

    /// Per-beat view with the keep mask each beat carries on a
    /// `bit_width`-bit channel.
    pub fn beats(&self, bit_width: u32) -> Vec<Beat> {
        assert!(!self.is_empty(), "stream transfer needs at least one beat");
        let last = self.data.len() - 1;
        self.data
            .iter()
            .enumerate()
            .map(|(i, &data)| Beat {
                data,
                keep: if i == last { self.keep } else { full_keep(bit_width) },
                user: self.user.as_ref().map(|_| self.user_at(i)),
                last: i == last,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Drop TVALID for one cycle between beats at random.
    pub insert_random_gaps: bool,
    pub gap_probability: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            insert_random_gaps: true,
            gap_probability: 0.2,
        }
    }
}

impl StreamConfig {
    pub fn insert_random_gaps(mut self, enabled: bool) -> Self {
        self.insert_random_gaps = enabled;
        self
    }

    pub fn gap_probability(mut self, probability: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "gap probability {} outside 0.0..=1.0",
            probability
        );
        self.gap_probability = probability;
        self
    }
}

/// Drives transfers into a design's AXI4-Stream slave port (`s_axis_*`).
pub struct StreamWriter {
    edge: ClockEdge,
    bit_width: u32,
    caps: ChannelCapabilities,
    config: StreamConfig,
    policy: StimulusPolicy,
    access: AccessSerializer,
    tdata: Binding,
    tvalid: Binding,
    tlast: Binding,
    tkeep: Binding,
    tready: Option<Binding>,
    tuser: Option<Binding>,
}

impl StreamWriter {
    pub fn connect(
        bus: &dyn SignalBus,
        edge: ClockEdge,
        bit_width: u32,
        prefix: Option<&str>,
        policy: StimulusPolicy,
    ) -> BfmResult<Self> {
        validate_width(bit_width)?;
        let binder = Binder::new(bus, "s_axis", prefix);
        let tready = binder.optional("tready")?;
        let tuser = binder.optional("tuser")?;
        let caps = ChannelCapabilities::detect(&tready, &tuser);
        debug!("AXI4-Stream writer {} connected ({:?})", binder.base(), caps);
        Ok(Self {
            edge,
            bit_width,
            caps,
            config: StreamConfig::default(),
            policy,
            access: AccessSerializer::new(),
            tdata: binder.required("tdata")?,
            tvalid: binder.required("tvalid")?,
            tlast: binder.required("tlast")?,
            tkeep: binder.required("tkeep")?,
            tready,
            tuser,
        })
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capabilities(&self) -> ChannelCapabilities {
        self.caps
    }

    pub async fn reset(&self) -> BfmResult<()> {
        self.tdata.write(0);
        self.tvalid.set(false);
        self.tlast.set(false);
        self.tkeep.write(0);
        if let Some(tuser) = &self.tuser {
            tuser.write(0);
        }
        self.edge.rising().await?;
        Ok(())
    }

    fn accepted(&self) -> bool {
        self.tready.as_ref().map_or(true, Binding::is_high)
    }

    /// Sends one complete transfer.
    pub async fn write(&self, transfer: &StreamTransfer) -> BfmResult<()> {
        assert!(!transfer.is_empty(), "stream transfer needs at least one beat");
        let _channel = self.access.acquire(&self.edge).await?;
        let last = transfer.len() - 1;
        let full = full_keep(self.bit_width);

        for (i, &word) in transfer.data.iter().enumerate() {
            self.tdata.write(word);
            self.tvalid.set(true);
            if let Some(tuser) = &self.tuser {
                tuser.write(transfer.user_at(i));
            }
            self.tlast.set(i == last);
            self.tkeep.write(if i == last { transfer.keep } else { full });

            // Without TREADY every beat is taken on the next edge.
            let cycle = self.edge.until(|| self.accepted()).await?;
            trace!("AXI4-Stream beat {} accepted at cycle {}", i, cycle);

            if self.config.insert_random_gaps
                && i != last
                && self.policy.chance(self.config.gap_probability)
            {
                self.tvalid.set(false);
                self.edge.rising().await?;
            }
        }

        self.tvalid.set(false);
        self.tlast.set(false);
        debug!("AXI4-Stream wrote {} beats", transfer.len());
        Ok(())
    }
}

/// Captures transfers from a design's AXI4-Stream master port (`m_axis_*`).
///
/// The reader samples TREADY but does not drive it; the bench decides when
/// the design may send, e.g. with [`crate::testbench::toggle_signal`].
pub struct StreamReader {
    edge: ClockEdge,
    bit_width: u32,
    caps: ChannelCapabilities,
    access: AccessSerializer,
    tdata: Binding,
    tvalid: Binding,
    tlast: Binding,
    tkeep: Binding,
    tready: Option<Binding>,
    tuser: Option<Binding>,
}

impl StreamReader {
    pub fn connect(
        bus: &dyn SignalBus,
        edge: ClockEdge,
        bit_width: u32,
        prefix: Option<&str>,
    ) -> BfmResult<Self> {
        validate_width(bit_width)?;
        let binder = Binder::new(bus, "m_axis", prefix);
        let tready = binder.optional("tready")?;
        let tuser = binder.optional("tuser")?;
        let caps = ChannelCapabilities::detect(&tready, &tuser);
        debug!("AXI4-Stream reader {} connected ({:?})", binder.base(), caps);
        Ok(Self {
            edge,
            bit_width,
            caps,
            access: AccessSerializer::new(),
            tdata: binder.required("tdata")?,
            tvalid: binder.required("tvalid")?,
            tlast: binder.required("tlast")?,
            tkeep: binder.required("tkeep")?,
            tready,
            tuser,
        })
    }

    pub fn capabilities(&self) -> ChannelCapabilities {
        self.caps
    }

    /// Deasserts TREADY if the design has one.
    pub async fn reset(&self) -> BfmResult<()> {
        if let Some(tready) = &self.tready {
            tready.set(false);
        }
        self.edge.rising().await?;
        Ok(())
    }

    fn transferring(&self) -> bool {
        self.tready.as_ref().map_or(true, Binding::is_high) && self.tvalid.is_high()
    }

    /// Receives one complete transfer.
    pub async fn read(&self) -> BfmResult<StreamTransfer> {
        let _channel = self.access.acquire(&self.edge).await?;
        let full = full_keep(self.bit_width);
        let mut data = Vec::new();
        let mut user = self.tuser.as_ref().map(|_| Vec::new());

        let keep = loop {
            self.edge.until(|| self.transferring()).await?;

            data.push(self.tdata.read());
            if let (Some(tuser), Some(user)) = (&self.tuser, user.as_mut()) {
                user.push(tuser.read());
            }

            let keep = self.tkeep.read();
            if self.tlast.is_high() {
                break keep;
            }
            if keep != full {
                return Err(BfmError::InvalidKeep {
                    beat: data.len() - 1,
                    keep,
                    expected: full,
                });
            }
        };

        debug!("AXI4-Stream read {} beats, last TKEEP {:#x}", data.len(), keep);
        Ok(StreamTransfer { data, keep, user })
    }
}
