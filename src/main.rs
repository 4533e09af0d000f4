use std::env;

use axi_bfm::bench::{create_bench_runtime, run_self_check};
use axi_bfm::{ArrayStore, FileStore};
use camino::Utf8PathBuf;
use eyre::{eyre, Result};

const MEM_SIZE: usize = 0x1000;

fn main() -> Result<()> {
    env_logger::init();
    println!("🚀 AXI BFM self-check starting...");

    let seed = match env::var("AXI_BFM_SEED") {
        Ok(seed) => seed
            .parse::<u64>()
            .map_err(|e| eyre!("Invalid AXI_BFM_SEED '{}': {}", seed, e))?,
        Err(_) => rand::random(),
    };
    println!("🎲 Seed: {}", seed);

    let runtime = create_bench_runtime()?;
    let report = match env::var("AXI_BFM_MEM_FILE") {
        Ok(path) => {
            let path = Utf8PathBuf::from(path);
            let store = FileStore::open_rw(&path, MEM_SIZE, 0)?;
            println!("💾 Memory backed by {}", path);
            runtime.block_on(run_self_check(seed, store))?
        }
        Err(_) => runtime.block_on(run_self_check(seed, ArrayStore::new(MEM_SIZE, 0)))?,
    };

    println!(
        "✅ {} AXI4-Lite accesses, {} stream transfers ({} bytes, {} IP packets), {} bursts",
        report.lite_accesses,
        report.stream_transfers,
        report.stream_bytes,
        report.packets,
        report.bursts
    );
    println!("🎉 Self-check passed after {} cycles!", report.cycles);
    Ok(())
}
