use std::future::Future;
use std::sync::{Arc, Mutex};

use eyre::{eyre, Report, Result};
use log::{debug, info};
use tokio::runtime::{Builder, Runtime};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::axi_lite::{LiteReader, LiteResponder, LiteWriter};
use crate::axi_mem::{BurstMaster, BurstRequest, MemoryConfig, MemoryResponder};
use crate::axis::{StreamReader, StreamWriter};
use crate::clock::{Clock, ClockConfig, ClockEdge};
use crate::codec::{from_bytes, Endian};
use crate::error::BfmResult;
use crate::crc::crc16;
use crate::net::{
    beats_to_payload, parse_flow, payload_to_beats, random_frame, random_packet, toeplitz_hash,
    RSS_DEFAULT_KEY,
};
use crate::signal::{Binding, SimBus};
use crate::stimulus::StimulusPolicy;
use crate::store::{ArrayStore, BackingStore};
use crate::testbench::{check_value, toggle_signal, Progress};

pub const LITE_WIDTH: u32 = 32;
pub const STREAM_WIDTH: u32 = 64;
pub const STREAM_USER_WIDTH: u32 = 16;
pub const MEM_WIDTH: u32 = 64;

/// Current-thread runtime with paused time, so the clock only advances once
/// every model has parked.
pub fn create_bench_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|e| eyre!("Failed to create runtime: {}", e))
}

/// A simulated bus and its clock.
pub struct Bench {
    pub bus: SimBus,
    pub edge: ClockEdge,
    clock: Option<Clock>,
}

impl Default for Bench {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl Bench {
    pub fn new(config: ClockConfig) -> Self {
        let bus = SimBus::new();
        let mut clock = Clock::new(config);
        clock.attach(Arc::new(bus.clone()));
        let edge = clock.edge();
        Self {
            bus,
            edge,
            clock: Some(clock),
        }
    }

    /// Declares the loopback interfaces used by [`run_self_check`].
    pub fn with_loopback_interfaces(self) -> Self {
        self.bus.add_lite_interface("s_axi", 32, LITE_WIDTH);
        self.bus
            .add_stream_interface("s_axis", STREAM_WIDTH, true, Some(STREAM_USER_WIDTH));
        self.bus.alias_interface("m_axis", "s_axis");
        self.bus.add_axi4_interface("m_axi", 32, MEM_WIDTH);
        self
    }

    /// Spawns the clock on the current runtime. Only the first call starts it.
    pub fn start_clock(&mut self) -> Option<JoinHandle<()>> {
        self.clock.take().map(|clock| tokio::spawn(clock.run()))
    }
}

/// Background models (responders, signal togglers) racing a scenario.
///
/// A model that returns while the scenario is still running ends the
/// scenario with that model's error. Dropping the set aborts every model.
#[derive(Default)]
pub struct Responders {
    tasks: JoinSet<(&'static str, BfmResult<()>)>,
}

impl Responders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = BfmResult<()>> + Send + 'static,
    {
        self.tasks.spawn(async move { (name, task.await) });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs `scenario` to completion unless a model stops first.
    pub async fn supervise<F, T>(&mut self, scenario: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            outcome = scenario => outcome,
            Some(stopped) = self.tasks.join_next() => Err(stopped_error(stopped)),
        }
    }

    /// Aborts every model and waits for them to wind down.
    pub async fn shutdown(mut self) {
        self.tasks.shutdown().await;
        debug!("background models stopped");
    }
}

fn stopped_error(joined: std::result::Result<(&'static str, BfmResult<()>), JoinError>) -> Report {
    match joined {
        Ok((name, Err(err))) => Report::new(err).wrap_err(format!("{} failed", name)),
        Ok((name, Ok(()))) => eyre!("{} stopped before the scenario finished", name),
        Err(err) => eyre!("background model did not complete: {}", err),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SelfCheckReport {
    pub lite_accesses: usize,
    pub stream_transfers: usize,
    pub stream_bytes: usize,
    pub packets: usize,
    pub bursts: usize,
    pub cycles: u64,
}

const STREAM_TRANSFERS: usize = 8;
const BURSTS: usize = 8;

/// Runs every model against its loopback counterpart and checks the data.
///
/// `store` backs the AXI4 memory; it must be at least 4 KiB.
pub async fn run_self_check<S>(seed: u64, store: S) -> Result<SelfCheckReport>
where
    S: BackingStore + 'static,
{
    let policy = StimulusPolicy::seeded(seed);
    info!("self-check seed {}", seed);

    let mut bench = Bench::default().with_loopback_interfaces();
    let edge = bench.edge.clone();

    let lite_store = Arc::new(Mutex::new(ArrayStore::new(0x100, 0)));
    let lite_slave =
        LiteResponder::connect(&bench.bus, edge.clone(), LITE_WIDTH, None, lite_store)?;
    let lite_writer = LiteWriter::connect(&bench.bus, edge.clone(), LITE_WIDTH, None)?;
    let lite_reader = LiteReader::connect(&bench.bus, edge.clone(), LITE_WIDTH, None)?;

    let stream_writer =
        StreamWriter::connect(&bench.bus, edge.clone(), STREAM_WIDTH, None, policy.fork())?;
    let stream_reader = StreamReader::connect(&bench.bus, edge.clone(), STREAM_WIDTH, None)?;
    let tready = Binding::lookup(&bench.bus, "m_axis_tready")?;

    let mem_base = store.offset();
    let memory = MemoryResponder::connect(
        &bench.bus,
        edge.clone(),
        Arc::new(Mutex::new(store)),
        None,
        MemoryConfig::default(),
        policy.fork(),
    )?;
    let master = BurstMaster::connect(&bench.bus, edge.clone(), None)?;

    bench.start_clock();
    let mut responders = Responders::new();
    responders.spawn("AXI4-Lite responder", async move { lite_slave.run().await });
    responders.spawn("AXI4 memory responder", async move { memory.run().await });
    responders.spawn("TREADY toggler", toggle_signal(edge.clone(), tready, policy.fork()));

    let scenario = async {
        let mut report = SelfCheckReport::default();
        lite_writer.reset().await?;
        lite_reader.reset().await?;
        stream_writer.reset().await?;
        master.reset().await?;

        // AXI4-Lite register round trip
        for (address, data) in [(0x10u64, 0xDEADBEEFu128), (0x14, 0x0BADF00D), (0x10, 0x12345678)] {
            lite_writer.write(address, data).await?;
            let read = lite_reader.read(address).await?;
            check_value("AXI4-Lite read data", data, read)?;
            report.lite_accesses += 2;
        }

        // AXI4-Stream loopback of raw frames and IP packets
        let mut progress = Progress::new(STREAM_TRANSFERS as u64);
        for i in 0..STREAM_TRANSFERS {
            let (flow, frame) = if i % 2 == 1 {
                let (flow, frame) = random_packet(&policy);
                (Some(flow), frame)
            } else {
                (None, random_frame(&policy))
            };
            let transfer = payload_to_beats(&frame, STREAM_WIDTH)
                .with_user(vec![crc16(&frame) as u128]);
            let (written, received) =
                tokio::join!(stream_writer.write(&transfer), stream_reader.read());
            written?;
            let received = received?;

            let payload = beats_to_payload(&received, STREAM_WIDTH);
            if payload != frame {
                return Err(eyre!("stream transfer {} corrupted", i));
            }
            check_value("TUSER checksum", crc16(&frame) as u128, received.user_at(0))?;
            if let Some(flow) = flow {
                let parsed = parse_flow(&payload)
                    .ok_or_else(|| eyre!("stream transfer {} lost its IP headers", i))?;
                check_value(
                    "RSS hash",
                    toeplitz_hash(&flow, &RSS_DEFAULT_KEY) as u128,
                    toeplitz_hash(&parsed, &RSS_DEFAULT_KEY) as u128,
                )?;
                report.packets += 1;
            }
            report.stream_transfers += 1;
            report.stream_bytes += frame.len();
            progress.update(i as u64);
        }

        // AXI4 bursts: write then read back the same range
        for i in 0..BURSTS {
            let length = policy.cycles(0..=15);
            let size = policy.cycles(0..=3);
            let burst = BurstRequest::new(mem_base + (i * 0x100) as u64, length, size);
            let beats: Vec<u128> = (0..burst.beats())
                .map(|_| from_bytes(&policy.bytes(burst.beat_bytes()), Endian::Little))
                .collect();

            let resp = master.write_burst(burst, &beats).await?;
            check_value("BRESP", 0, resp)?;
            let read = master.read_burst(burst).await?;
            if read != beats {
                return Err(eyre!("burst {} at {:#x} read back differently", i, burst.address));
            }
            report.bursts += 2;
        }

        report.cycles = edge.cycle();
        Ok::<_, Report>(report)
    };

    let report = responders.supervise(scenario).await?;
    responders.shutdown().await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_self_check_passes() {
        let report = run_self_check(42, ArrayStore::new(0x1000, 0x8000_0000))
            .await
            .unwrap();
        assert_eq!(report.lite_accesses, 6);
        assert_eq!(report.stream_transfers, STREAM_TRANSFERS);
        assert_eq!(report.packets, STREAM_TRANSFERS / 2);
        assert_eq!(report.bursts, 2 * BURSTS);
        assert!(report.cycles > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_model_ends_scenario() {
        let mut bench = Bench::default();
        bench.start_clock();
        let edge = bench.edge.clone();

        let mut responders = Responders::new();
        let model_edge = edge.clone();
        responders.spawn("failing model", async move {
            model_edge.cycles(3).await?;
            Err::<(), _>(crate::error::BfmError::InvalidWidth { bit_width: 12 })
        });

        let outcome: Result<()> = responders
            .supervise(async {
                edge.until(|| false).await?;
                Ok::<_, Report>(())
            })
            .await;
        let err = outcome.unwrap_err();
        assert!(err.to_string().contains("failing model"));
        assert!(err
            .chain()
            .any(|cause| matches!(
                cause.downcast_ref::<crate::error::BfmError>(),
                Some(crate::error::BfmError::InvalidWidth { bit_width: 12 })
            )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_scenario_outlives_running_models() {
        let mut bench = Bench::default();
        bench.start_clock();
        let edge = bench.edge.clone();

        let mut responders = Responders::new();
        let model_edge = edge.clone();
        responders.spawn("idle model", async move {
            model_edge.until(|| false).await.map(|_| ())
        });
        assert_eq!(responders.len(), 1);

        let cycle = responders
            .supervise(async { Ok::<_, Report>(edge.until(|| edge.cycle() >= 10).await?) })
            .await
            .unwrap();
        assert_eq!(cycle, 10);
        responders.shutdown().await;
    }

    #[test]
    fn test_bench_runtime_is_paused() {
        let runtime = create_bench_runtime().unwrap();
        runtime.block_on(async {
            let mut bench = Bench::default();
            assert!(bench.start_clock().is_some());
            assert!(bench.start_clock().is_none());
            bench.edge.cycles(1000).await.unwrap();
            assert_eq!(bench.edge.cycle(), 1000);
        });
    }
}
