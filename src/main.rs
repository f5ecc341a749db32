//! nvpulse CLI entry point

use anyhow::Result;
use clap::Parser;
use nvpulse::config::{cli::Cli, Config, Termination, WorkloadKind};
use nvpulse::device::NvmeHandle;
use nvpulse::distribution::LbaGenerator;
use nvpulse::engine::uring::UringRing;
use nvpulse::stats::Summary;
use nvpulse::util::buffer::BufferPool;
use nvpulse::worker::Worker;

fn main() {
    if let Err(e) = run() {
        // One line per fatal error; the context chain stays inline via
        // Display formatting with the root cause appended
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;

    println!("nvpulse v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", config);

    if let Termination::Bytes(bytes) = config.termination {
        if bytes % config.block_size != 0 {
            eprintln!(
                "Warning: --size {} is not a multiple of --bs {}; running {} operations",
                bytes,
                config.block_size,
                bytes / config.block_size
            );
        }
    }

    let device = NvmeHandle::open(&config.filename, config.io_mode)?;
    println!("{}", device);

    config.validate_block_size(device.lba_size())?;

    let alignment = BufferPool::required_alignment(device.lba_size());
    let mut pool = BufferPool::new(
        config.iodepth as usize,
        config.block_size as usize,
        alignment,
    );
    if config.workload == WorkloadKind::RandWrite {
        pool.prefill_random();
    }

    let ring = UringRing::new(&config, device.fd(), device.nsid(), &pool)?;

    let block_lbas = config.block_size / device.lba_size() as u64;
    let lba = LbaGenerator::new(device.nlba(), block_lbas);
    if device.nlba() < block_lbas {
        eprintln!(
            "Warning: namespace holds {} LBAs but one IO spans {}; all IOs will hit LBA 0",
            device.nlba(),
            block_lbas
        );
    }

    let mut worker = Worker::new(&config, device.lba_size(), ring, pool, lba);
    let report = worker.run()?;

    let summary = Summary::compute(report.latencies_us, report.elapsed, config.block_size);
    println!();
    println!("{}", summary.render(&config.workload.to_string()));
    Ok(())
}
