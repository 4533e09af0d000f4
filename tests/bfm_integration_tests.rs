use std::sync::{Arc, Mutex};

use axi_bfm::testbench::{reset_n, toggle_signal};
use axi_bfm::{
    run_self_check, ArrayStore, Bench, BfmError, Binding, BurstMaster, BurstRequest, ClockConfig,
    ClockEdge, FileStore, LiteReader, LiteResponder, LiteWriter, MemoryConfig, MemoryResponder,
    Responders, StimulusPolicy, StreamConfig, StreamReader, StreamTransfer, StreamWriter,
};
use camino::Utf8PathBuf;
use eyre::Report;

/// Records AXI4-Lite write handshakes seen on each rising edge.
struct HandshakeMonitor {
    events: Arc<Mutex<Vec<(u64, &'static str)>>>,
}

impl HandshakeMonitor {
    fn spawn(bench: &Bench) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let lookup = |name: &str| Binding::lookup(&bench.bus, name).unwrap();
        let (awvalid, awready) = (lookup("s_axi_awvalid"), lookup("s_axi_awready"));
        let (bvalid, bready) = (lookup("s_axi_bvalid"), lookup("s_axi_bready"));
        let edge = bench.edge.clone();
        let log = events.clone();
        tokio::spawn(async move {
            while let Ok(cycle) = edge.rising().await {
                if awvalid.is_high() && awready.is_high() {
                    log.lock().unwrap().push((cycle, "AW"));
                }
                if bvalid.is_high() && bready.is_high() {
                    log.lock().unwrap().push((cycle, "B"));
                }
            }
        });
        Self { events }
    }

    fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|(_, e)| *e).collect()
    }
}

/// AXI4-Lite master and register slave on `s_axi_*`.
struct LiteHelper {
    bench: Bench,
    writer: LiteWriter,
    reader: LiteReader,
    regs: Arc<Mutex<ArrayStore>>,
    _responders: Responders,
}

impl LiteHelper {
    async fn start() -> Self {
        let mut bench = Bench::default();
        bench.bus.add_lite_interface("s_axi", 16, 32);
        let edge = bench.edge.clone();

        let regs = Arc::new(Mutex::new(ArrayStore::new(0x100, 0)));
        let slave = LiteResponder::connect(&bench.bus, edge.clone(), 32, None, regs.clone()).unwrap();
        let writer = LiteWriter::connect(&bench.bus, edge.clone(), 32, None).unwrap();
        let reader = LiteReader::connect(&bench.bus, edge, 32, None).unwrap();

        bench.start_clock();
        let mut responders = Responders::new();
        responders.spawn("AXI4-Lite responder", async move { slave.run().await });
        writer.reset().await.unwrap();
        reader.reset().await.unwrap();
        Self {
            bench,
            writer,
            reader,
            regs,
            _responders: responders,
        }
    }
}

/// Stream writer looped back into a reader through `m_axis` aliases.
struct StreamHelper {
    writer: StreamWriter,
    reader: StreamReader,
    edge: ClockEdge,
    bench: Bench,
}

impl StreamHelper {
    async fn start(bit_width: u32, with_ready: bool, user_width: Option<u32>, seed: u64) -> Self {
        let mut bench = Bench::default();
        bench
            .bus
            .add_stream_interface("s_axis", bit_width, with_ready, user_width);
        bench.bus.alias_interface("m_axis", "s_axis");
        let edge = bench.edge.clone();

        let policy = StimulusPolicy::seeded(seed);
        let writer =
            StreamWriter::connect(&bench.bus, edge.clone(), bit_width, None, policy.fork()).unwrap();
        let reader = StreamReader::connect(&bench.bus, edge.clone(), bit_width, None).unwrap();

        bench.start_clock();
        writer.reset().await.unwrap();
        reader.reset().await.unwrap();
        if with_ready {
            let tready = Binding::lookup(&bench.bus, "m_axis_tready").unwrap();
            tokio::spawn(toggle_signal(edge.clone(), tready, policy.fork()));
        }
        Self {
            writer,
            reader,
            edge,
            bench,
        }
    }

    async fn transfer(&self, sent: &StreamTransfer) -> Result<StreamTransfer, BfmError> {
        let (written, received) = tokio::join!(self.writer.write(sent), self.reader.read());
        written?;
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_lite_write_then_read() {
        let lite = LiteHelper::start().await;

        lite.writer.write(0x10, 0xDEADBEEF).await.unwrap();
        assert_eq!(lite.reader.read(0x10).await.unwrap(), 0xDEADBEEF);

        // Register storage is little-endian on the wire.
        let regs = lite.regs.lock().unwrap();
        assert_eq!(&regs.as_slice()[0x10..0x14], &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lite_unwritten_register_reads_zero() {
        let lite = LiteHelper::start().await;
        assert_eq!(lite.reader.read(0x40).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lite_writes_never_interleave() {
        let lite = LiteHelper::start().await;
        let monitor = HandshakeMonitor::spawn(&lite.bench);

        let (a, b, c) = tokio::join!(
            lite.writer.write(0x00, 0x1111_1111),
            lite.writer.write(0x04, 0x2222_2222),
            lite.writer.write(0x08, 0x3333_3333),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(monitor.events(), vec!["AW", "B", "AW", "B", "AW", "B"]);
        for (address, expected) in [(0x00, 0x1111_1111), (0x04, 0x2222_2222), (0x08, 0x3333_3333)] {
            assert_eq!(lite.reader.read(address).await.unwrap(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lite_reads_and_writes_overlap() {
        let lite = LiteHelper::start().await;
        lite.writer.write(0x20, 0xCAFE).await.unwrap();

        let (written, read) = tokio::join!(
            lite.writer.write(0x24, 0xF00D),
            lite.reader.read(0x20)
        );
        written.unwrap();
        assert_eq!(read.unwrap(), 0xCAFE);
        assert_eq!(lite.reader.read(0x24).await.unwrap(), 0xF00D);
    }

    #[test]
    fn test_lite_connect_reports_first_missing_signal() {
        let bench = Bench::default();
        bench.bus.add("s_axi_awaddr", 16);
        let err = LiteWriter::connect(&bench.bus, bench.edge.clone(), 32, None)
            .err()
            .unwrap();
        match err {
            BfmError::MissingSignal { name } => assert_eq!(name, "s_axi_awvalid"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_prefixed_interface_binds() {
        let bench = Bench::default();
        bench.bus.add_lite_interface("s_axi_ctrl", 16, 32);
        assert!(LiteWriter::connect(&bench.bus, bench.edge.clone(), 32, Some("ctrl")).is_ok());
        assert!(LiteReader::connect(&bench.bus, bench.edge.clone(), 32, None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_loopback_with_backpressure() {
        let stream = StreamHelper::start(32, true, Some(8), 11).await;

        let sent = StreamTransfer::new(vec![0x0403_0201, 0x0807_0605, 0x0C0B_0A09, 0x0D], 0x1)
            .with_user(vec![0xAB]);
        let received = stream.transfer(&sent).await.unwrap();

        assert_eq!(received.data, sent.data);
        assert_eq!(received.keep, 0x1);
        assert_eq!(received.user, Some(vec![0xAB, 0, 0, 0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_back_to_back_transfers_without_gaps() {
        let mut stream = StreamHelper::start(64, false, None, 2).await;
        stream.writer = stream
            .writer
            .with_config(StreamConfig::default().insert_random_gaps(false));

        let first = StreamTransfer::new(vec![1, 2, 3], 0xFF);
        let start = stream.edge.cycle();
        assert_eq!(stream.transfer(&first).await.unwrap(), first);
        // One beat per edge without TREADY or gaps.
        assert_eq!(stream.edge.cycle() - start, 3);

        let second = StreamTransfer::new(vec![0xAA], 0x0F);
        assert_eq!(stream.transfer(&second).await.unwrap(), second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_reader_rejects_partial_keep_mid_transfer() {
        let stream = StreamHelper::start(32, false, None, 0).await;
        let lookup = |name: &str| Binding::lookup(&stream.bench.bus, name).unwrap();

        lookup("s_axis_tdata").write(0x1234);
        lookup("s_axis_tkeep").write(0x3);
        lookup("s_axis_tlast").set(false);
        lookup("s_axis_tvalid").set(true);

        match stream.reader.read().await {
            Err(BfmError::InvalidKeep {
                beat,
                keep,
                expected,
            }) => {
                assert_eq!(beat, 0);
                assert_eq!(keep, 0x3);
                assert_eq!(expected, 0xF);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_burst_round_trip_with_random_delays() {
        let mut bench = Bench::default();
        bench.bus.add_axi4_interface("m_axi", 32, 32);
        let edge = bench.edge.clone();

        let store = Arc::new(Mutex::new(ArrayStore::new(0x400, 0x1000)));
        let memory = MemoryResponder::connect(
            &bench.bus,
            edge.clone(),
            store.clone(),
            None,
            MemoryConfig::default().stall(0.5, 3),
            StimulusPolicy::seeded(99),
        )
        .unwrap();
        let master = BurstMaster::connect(&bench.bus, edge, None).unwrap();

        bench.start_clock();
        let mut responders = Responders::new();
        responders.spawn("AXI4 memory responder", async move { memory.run().await });

        let burst = BurstRequest::new(0x1100, 3, 2);
        let beats = [0x0403_0201, 0x0807_0605, 0x0C0B_0A09, 0x100F_0E0D];
        let (resp, read) = responders
            .supervise(async {
                master.reset().await?;
                let resp = master.write_burst(burst, &beats).await?;
                let read = master.read_burst(burst).await?;
                Ok::<_, Report>((resp, read))
            })
            .await
            .unwrap();
        assert_eq!(resp, 0);
        assert_eq!(read, beats.to_vec());

        let mem = store.lock().unwrap();
        let expected: Vec<u8> = (1..=16).collect();
        assert_eq!(&mem.as_slice()[0x100..0x110], expected.as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_rejects_early_wlast() {
        let mut bench = Bench::default();
        bench.bus.add_axi4_interface("m_axi", 32, 32);
        let memory = MemoryResponder::connect(
            &bench.bus,
            bench.edge.clone(),
            Arc::new(Mutex::new(ArrayStore::new(0x100, 0))),
            None,
            MemoryConfig::immediate(),
            StimulusPolicy::seeded(1),
        )
        .unwrap();

        bench.start_clock();
        let lookup = |name: &str| Binding::lookup(&bench.bus, name).unwrap();
        let served = tokio::spawn(async move { memory.run().await });

        // Two-beat burst whose first beat already carries WLAST.
        lookup("m_axi_awaddr").write(0x10);
        lookup("m_axi_awlen").write(1);
        lookup("m_axi_awsize").write(2);
        lookup("m_axi_awvalid").set(true);
        let awready = lookup("m_axi_awready");
        bench.edge.until(|| awready.is_high()).await.unwrap();
        lookup("m_axi_awvalid").set(false);

        lookup("m_axi_wdata").write(0xFFFF_FFFF);
        lookup("m_axi_wlast").set(true);
        lookup("m_axi_wvalid").set(true);

        match served.await.unwrap() {
            Err(BfmError::WriteLastMismatch {
                beat,
                expected,
                observed,
            }) => {
                assert_eq!(beat, 0);
                assert!(!expected);
                assert!(observed);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_failure_ends_waiting_master() {
        let mut bench = Bench::default();
        bench.bus.add_axi4_interface("m_axi", 32, 32);
        let memory = MemoryResponder::connect(
            &bench.bus,
            bench.edge.clone(),
            Arc::new(Mutex::new(ArrayStore::new(0x100, 0))),
            None,
            MemoryConfig::immediate(),
            StimulusPolicy::seeded(4),
        )
        .unwrap();

        bench.start_clock();
        let mut responders = Responders::new();
        responders.spawn("AXI4 memory responder", async move { memory.run().await });
        let lookup = |name: &str| Binding::lookup(&bench.bus, name).unwrap();
        let wready = lookup("m_axi_wready");

        // 8-byte beats on a 32-bit bus: the responder gives up after AW.
        let outcome = responders
            .supervise(async {
                lookup("m_axi_awaddr").write(0x20);
                lookup("m_axi_awlen").write(0);
                lookup("m_axi_awsize").write(3);
                lookup("m_axi_awvalid").set(true);
                bench.edge.until(|| wready.is_high()).await?;
                Ok::<_, Report>(())
            })
            .await;

        let err = outcome.unwrap_err();
        assert!(err.to_string().contains("AXI4 memory responder"));
        let cause = err.chain().find_map(|cause| cause.downcast_ref::<BfmError>());
        assert!(matches!(
            cause,
            Some(BfmError::UnsupportedBurstSize {
                size: 3,
                data_width: 32
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_prefers_read_over_write() {
        let mut bench = Bench::default();
        bench.bus.add_axi4_interface("m_axi", 32, 32);
        let memory = MemoryResponder::connect(
            &bench.bus,
            bench.edge.clone(),
            Arc::new(Mutex::new(ArrayStore::new(0x100, 0))),
            None,
            MemoryConfig::immediate(),
            StimulusPolicy::seeded(8),
        )
        .unwrap();

        bench.start_clock();
        let mut responders = Responders::new();
        responders.spawn("AXI4 memory responder", async move { memory.run().await });
        let lookup = |name: &str| Binding::lookup(&bench.bus, name).unwrap();
        let (arready, awready) = (lookup("m_axi_arready"), lookup("m_axi_awready"));

        // Both requests become visible on the same edge.
        lookup("m_axi_araddr").write(0x10);
        lookup("m_axi_arsize").write(2);
        lookup("m_axi_arvalid").set(true);
        lookup("m_axi_awaddr").write(0x20);
        lookup("m_axi_awsize").write(2);
        lookup("m_axi_awvalid").set(true);

        let (ar_first, aw_first) = responders
            .supervise(async {
                bench
                    .edge
                    .until(|| arready.is_high() || awready.is_high())
                    .await?;
                Ok::<_, Report>((arready.is_high(), awready.is_high()))
            })
            .await
            .unwrap();
        assert!(ar_first);
        assert!(!aw_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_gaps_drop_tvalid_between_beats() {
        let mut stream = StreamHelper::start(32, false, None, 6).await;
        stream.writer = stream
            .writer
            .with_config(StreamConfig::default().gap_probability(1.0));
        let tvalid = Binding::lookup(&stream.bench.bus, "s_axis_tvalid").unwrap();

        let sent = StreamTransfer::new(vec![0x11, 0x22, 0x33], 0xF);
        let start = stream.edge.cycle();
        let watch_tvalid = async {
            let mut seen = Vec::new();
            for _ in 0..5 {
                stream.edge.rising().await.unwrap();
                seen.push(tvalid.is_high());
            }
            seen
        };
        let (received, seen) = tokio::join!(stream.transfer(&sent), watch_tvalid);

        assert_eq!(received.unwrap(), sent);
        assert_eq!(stream.edge.cycle() - start, 5);
        assert_eq!(seen, vec![true, false, true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_low_reset_pulse() {
        let mut bench = Bench::new(ClockConfig::default());
        bench.bus.add("rstn", 1);
        let rstn = Binding::lookup(&bench.bus, "rstn").unwrap();
        bench.start_clock();

        reset_n(&bench.edge, &rstn).await.unwrap();
        assert!(rstn.is_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_check_on_file_backed_memory() {
        let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap();
        let path = dir.join(format!("axi-bfm-selfcheck-{}.bin", std::process::id()));

        let store = FileStore::open_rw(&path, 0x1000, 0).unwrap();
        let report = run_self_check(7, store).await.unwrap();
        assert_eq!(report.bursts, 16);
        assert!(report.stream_bytes >= 8 * 64);

        std::fs::remove_file(&path).unwrap();
    }
}
