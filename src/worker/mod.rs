//! Benchmark engine loop
//!
//! The Worker is the state machine that keeps exactly `iodepth` IOs in
//! flight against the ring. It primes the ring to the full queue depth,
//! then for each reaped completion records the latency and reissues into
//! the same slot until the termination condition forbids new issuance,
//! and finally drains the in-flight tail.
//!
//! # Slot discipline
//!
//! Slot `i` owns buffer `i` and submit-timestamp `i`, and `i` is the
//! user-data tag on every submission from that slot. A slot is only
//! rebuilt after its previous completion has been reaped, so buffer reuse
//! is race-free by construction and `in_flight` can never exceed the
//! queue depth.

use crate::config::{Config, IoMode, Termination, WorkloadKind};
use crate::distribution::LbaGenerator;
use crate::engine::{CommandRing, IoRequest, OpKind};
use crate::util::buffer::BufferPool;
use crate::Result;
use anyhow::bail;
use std::time::{Duration, Instant};

/// Raw results of one run, handed to the statistics reporter
#[derive(Debug)]
pub struct RunReport {
    pub submitted: u64,
    pub completed: u64,
    pub elapsed: Duration,
    /// One sample per completion, in microseconds
    pub latencies_us: Vec<f64>,
}

/// Single-threaded benchmark driver over a `CommandRing`
pub struct Worker<R: CommandRing> {
    ring: R,
    pool: BufferPool,
    lba: LbaGenerator,

    workload: WorkloadKind,
    io_mode: IoMode,
    termination: Termination,
    iodepth: u32,
    block_size: u64,
    lba_size: u32,
    /// Logical blocks per IO: `block_size / lba_size`
    block_lbas: u64,
    /// Byte-budget runs issue exactly this many operations
    total_ops: Option<u64>,

    /// Per-slot submit timestamp, overwritten on reissue
    submit_times: Vec<Instant>,
    ledger: Vec<f64>,
    submitted: u64,
    completed: u64,
    in_flight: u32,
}

impl<R: CommandRing> Worker<R> {
    /// Assemble a worker from its collaborators
    ///
    /// The pool must hold exactly `iodepth` buffers of `block_size` bytes;
    /// slot `i` uses buffer `i` for the whole run.
    pub fn new(
        config: &Config,
        lba_size: u32,
        ring: R,
        pool: BufferPool,
        lba: LbaGenerator,
    ) -> Worker<R> {
        assert_eq!(pool.count(), config.iodepth as usize);
        assert_eq!(pool.buffer_size(), config.block_size as usize);

        let total_ops = config.total_ops();
        let ledger = match total_ops {
            // Byte budget: the op count is known, reserve it up front
            Some(n) => Vec::with_capacity(n as usize),
            None => Vec::new(),
        };

        Worker {
            ring,
            pool,
            lba,
            workload: config.workload,
            io_mode: config.io_mode,
            termination: config.termination,
            iodepth: config.iodepth,
            block_size: config.block_size,
            lba_size,
            block_lbas: config.block_size / lba_size as u64,
            total_ops,
            submit_times: vec![Instant::now(); config.iodepth as usize],
            ledger,
            submitted: 0,
            completed: 0,
            in_flight: 0,
        }
    }

    /// Run the workload to completion and return the raw results
    pub fn run(&mut self) -> Result<RunReport> {
        let start = Instant::now();
        let deadline = match self.termination {
            Termination::Seconds(secs) => Some(start + Duration::from_secs(secs)),
            Termination::Bytes(_) => None,
        };

        // Phase 1: prime the ring up to the full queue depth
        while self.in_flight < self.iodepth {
            let now = Instant::now();
            if !self.may_issue(now, deadline) {
                break;
            }
            let slot = self.in_flight as usize;
            self.issue(slot, now)?;
        }
        // The one explicit flush; in SQPOLL mode this wakes the kernel
        // thread for the primed batch
        self.ring.flush()?;

        // Phase 2: steady state, then drain
        let mut completions = Vec::with_capacity(self.iodepth as usize);
        while self.in_flight > 0 || self.budget_pending() {
            completions.clear();
            self.ring.wait(&mut completions)?;

            for completion in &completions {
                if completion.result < 0 {
                    let err = std::io::Error::from_raw_os_error(-completion.result);
                    bail!("{} failed on slot {}: {}", self.workload, completion.tag, err);
                }

                let slot = completion.tag as usize;
                let now = Instant::now();
                let latency_us =
                    now.duration_since(self.submit_times[slot]).as_nanos() as f64 / 1000.0;
                self.ledger.push(latency_us);
                self.in_flight -= 1;
                self.completed += 1;

                if self.may_issue(now, deadline) {
                    self.issue(slot, now)?;
                }
            }
        }

        let elapsed = start.elapsed();
        Ok(RunReport {
            submitted: self.submitted,
            completed: self.completed,
            elapsed,
            latencies_us: std::mem::take(&mut self.ledger),
        })
    }

    /// May another operation be issued at `now`?
    fn may_issue(&self, now: Instant, deadline: Option<Instant>) -> bool {
        match self.total_ops {
            Some(total) => self.submitted < total,
            None => match deadline {
                Some(deadline) => now < deadline,
                None => false,
            },
        }
    }

    /// Byte-budget runs are not done until every budgeted op completed
    fn budget_pending(&self) -> bool {
        match self.total_ops {
            Some(total) => self.completed < total,
            None => false,
        }
    }

    /// Build and stage one submission into `slot`, stamped at `now`
    fn issue(&mut self, slot: usize, now: Instant) -> Result<()> {
        let lba = self.lba.next_lba();
        self.submit_times[slot] = now;
        let req = self.build_request(slot, lba);
        self.ring.push(&req, slot as u64)?;
        self.submitted += 1;
        self.in_flight += 1;
        Ok(())
    }

    fn build_request(&mut self, slot: usize, lba: u64) -> IoRequest {
        let kind = match self.workload {
            WorkloadKind::RandRead => OpKind::Read,
            WorkloadKind::RandWrite => OpKind::Write,
        };
        match self.io_mode {
            IoMode::Direct => IoRequest::Direct {
                kind,
                offset: lba * self.lba_size as u64,
                len: self.block_size as u32,
                buf_index: slot as u16,
                buf_ptr: self.pool.buffer_mut(slot).as_mut_ptr(),
            },
            IoMode::Passthrough => IoRequest::Passthrough {
                kind,
                lba,
                blocks: self.block_lbas as u32,
                buf_addr: self.pool.buffer_mut(slot).as_mut_ptr() as u64,
                data_len: self.block_size as u32,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IoMode, SubmitMode, Termination};
    use crate::engine::mock::MockRing;
    use crate::engine::nvme::{NvmeUringCmd, NVME_CMD_READ};

    const TEST_LBA_SIZE: u32 = 512;
    const TEST_NLBA: u64 = 1 << 21; // 1 GiB namespace of 512-byte blocks

    fn test_config(
        workload: WorkloadKind,
        iodepth: u32,
        block_size: u64,
        termination: Termination,
        io_mode: IoMode,
    ) -> Config {
        Config {
            filename: "/dev/nvme0n1".into(),
            workload,
            block_size,
            iodepth,
            termination,
            io_mode,
            submit_mode: SubmitMode::SubmitAndWait,
            iopoll: false,
        }
    }

    fn build_worker(config: &Config, ring: MockRing, seed: u64) -> Worker<MockRing> {
        let pool = BufferPool::new(config.iodepth as usize, config.block_size as usize, 512);
        let block_lbas = config.block_size / TEST_LBA_SIZE as u64;
        let lba = LbaGenerator::with_seed(TEST_NLBA, block_lbas, seed);
        Worker::new(config, TEST_LBA_SIZE, ring, pool, lba)
    }

    #[test]
    fn test_single_op_run() {
        // --type=randread --bs=4096 --iodepth=1 --size=4096
        let config = test_config(
            WorkloadKind::RandRead,
            1,
            4096,
            Termination::Bytes(4096),
            IoMode::Direct,
        );
        let mut worker = build_worker(&config, MockRing::new(), 1);
        let report = worker.run().unwrap();

        assert_eq!(report.submitted, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.latencies_us.len(), 1);
        assert!(report.latencies_us[0] >= 0.0);
        assert_eq!(worker.ring.records().len(), 1);
        assert!(report.elapsed > Duration::ZERO);
    }

    #[test]
    fn test_budget_equals_queue_depth() {
        // --type=randread --bs=4096 --iodepth=4 --size=16384: the prime
        // phase alone covers the budget, nothing is reissued afterwards
        let config = test_config(
            WorkloadKind::RandRead,
            4,
            4096,
            Termination::Bytes(16384),
            IoMode::Direct,
        );
        let mut worker = build_worker(&config, MockRing::new(), 2);
        let report = worker.run().unwrap();

        assert_eq!(report.submitted, 4);
        assert_eq!(report.completed, 4);
        assert_eq!(report.latencies_us.len(), 4);
        assert_eq!(worker.ring.records().len(), 4);
        assert_eq!(worker.ring.max_outstanding(), 4);
    }

    #[test]
    fn test_steady_state_holds_queue_depth() {
        // --type=randread --bs=4096 --iodepth=4 --size=65536: 16 ops with
        // one completion per wait; the window refills to 4 every time until
        // the budget runs out, then decays through the drain tail
        let config = test_config(
            WorkloadKind::RandRead,
            4,
            4096,
            Termination::Bytes(65536),
            IoMode::Direct,
        );
        let mut ring = MockRing::new();
        ring.set_complete_batch(1);
        let mut worker = build_worker(&config, ring, 3);
        let report = worker.run().unwrap();

        assert_eq!(report.submitted, 16);
        assert_eq!(report.completed, 16);
        assert_eq!(report.latencies_us.len(), 16);
        assert_eq!(worker.ring.max_outstanding(), 4);
        assert!(!worker.ring.saw_duplicate_tag());
    }

    #[test]
    fn test_queue_depth_and_slot_invariants() {
        let config = test_config(
            WorkloadKind::RandWrite,
            4,
            4096,
            Termination::Bytes(40 * 4096),
            IoMode::Direct,
        );
        let mut ring = MockRing::new();
        ring.set_complete_batch(3);
        let mut worker = build_worker(&config, ring, 6);
        let report = worker.run().unwrap();

        assert_eq!(report.submitted, 40);
        assert_eq!(report.completed, 40);
        // in_flight never exceeded the queue depth
        assert!(worker.ring.max_outstanding() <= 4);
        // No slot had two submissions in flight at once
        assert!(!worker.ring.saw_duplicate_tag());
        // Every tag addresses a valid slot
        assert!(worker.ring.records().iter().all(|r| r.tag < 4));
        // The primed batch was flushed exactly once explicitly
        assert_eq!(worker.ring.flush_calls(), 1);
    }

    #[test]
    fn test_direct_offsets_aligned_and_in_bounds() {
        let config = test_config(
            WorkloadKind::RandRead,
            4,
            4096,
            Termination::Bytes(64 * 4096),
            IoMode::Direct,
        );
        let mut worker = build_worker(&config, MockRing::new(), 11);
        worker.run().unwrap();

        let device_bytes = TEST_NLBA * TEST_LBA_SIZE as u64;
        for record in worker.ring.records() {
            match record.request {
                IoRequest::Direct {
                    offset,
                    len,
                    buf_index,
                    ..
                } => {
                    assert_eq!(offset % TEST_LBA_SIZE as u64, 0);
                    assert!(offset + len as u64 <= device_bytes);
                    assert_eq!(buf_index as u64, record.tag);
                }
                IoRequest::Passthrough { .. } => panic!("direct run built a passthrough request"),
            }
        }
    }

    #[test]
    fn test_duration_run_stops_and_drains() {
        // --type=randwrite --bs=8192 --iodepth=2 --runtime=1 --mode=direct
        let config = test_config(
            WorkloadKind::RandWrite,
            2,
            8192,
            Termination::Seconds(1),
            IoMode::Direct,
        );
        let mut ring = MockRing::new();
        ring.set_wait_delay(Duration::from_millis(2));
        let mut worker = build_worker(&config, ring, 7);

        let test_start = Instant::now();
        let report = worker.run().unwrap();

        assert!(report.elapsed >= Duration::from_secs(1));
        assert_eq!(report.submitted, report.completed);
        assert!(!report.latencies_us.is_empty());

        // Nothing was submitted after the deadline. The worker's own clock
        // starts a hair after test_start, so grant that offset as slack.
        let cutoff = test_start + Duration::from_secs(1) + Duration::from_millis(50);
        assert!(worker.ring.records().iter().all(|r| r.at < cutoff));
    }

    #[test]
    fn test_passthrough_commands_carry_drawn_lbas() {
        // --type=randread --bs=4096 --iodepth=2 --size=8192 --mode=passthrough
        let config = test_config(
            WorkloadKind::RandRead,
            2,
            4096,
            Termination::Bytes(8192),
            IoMode::Passthrough,
        );
        let seed = 42;
        let mut worker = build_worker(&config, MockRing::new(), seed);
        let report = worker.run().unwrap();
        assert_eq!(report.completed, 2);

        let block_lbas = 4096 / TEST_LBA_SIZE as u64;
        let mut replay = LbaGenerator::with_seed(TEST_NLBA, block_lbas, seed);

        let records = worker.ring.records();
        assert_eq!(records.len(), 2);
        for record in records {
            let expected_lba = replay.next_lba();
            match record.request {
                IoRequest::Passthrough {
                    kind,
                    lba,
                    blocks,
                    buf_addr,
                    data_len,
                } => {
                    assert_eq!(kind, OpKind::Read);
                    assert_eq!(lba, expected_lba);
                    assert_eq!(blocks as u64, block_lbas);
                    assert_eq!(data_len, 4096);

                    // The wire command reassembles the drawn LBA
                    let cmd = NvmeUringCmd::read(1, lba, blocks, buf_addr, data_len);
                    assert_eq!(cmd.opcode, NVME_CMD_READ);
                    assert_eq!(cmd.cdw12, blocks - 1);
                    let reassembled = (cmd.cdw11 as u64) << 32 | cmd.cdw10 as u64;
                    assert_eq!(reassembled, expected_lba);
                }
                IoRequest::Direct { .. } => panic!("passthrough run built a direct request"),
            }
        }
    }

    #[test]
    fn test_io_failure_is_fatal() {
        let config = test_config(
            WorkloadKind::RandRead,
            2,
            4096,
            Termination::Bytes(16384),
            IoMode::Direct,
        );
        let mut ring = MockRing::new();
        ring.set_forced_result(-libc::EIO);
        let mut worker = build_worker(&config, ring, 8);

        assert!(worker.run().is_err());
    }

    #[test]
    fn test_accounting_invariants() {
        let config = test_config(
            WorkloadKind::RandWrite,
            8,
            4096,
            Termination::Bytes(100 * 4096),
            IoMode::Direct,
        );
        let mut worker = build_worker(&config, MockRing::new(), 9);
        let report = worker.run().unwrap();

        assert_eq!(report.submitted, 100);
        assert_eq!(report.completed, report.submitted);
        assert_eq!(report.latencies_us.len() as u64, report.completed);
        assert!(report.latencies_us.iter().all(|&lat| lat >= 0.0));
    }

    #[test]
    fn test_zero_op_budget() {
        // A budget smaller than one block rounds down to zero operations
        let config = test_config(
            WorkloadKind::RandRead,
            2,
            4096,
            Termination::Bytes(1024),
            IoMode::Direct,
        );
        assert_eq!(config.total_ops(), Some(0));
        let mut worker = build_worker(&config, MockRing::new(), 10);
        let report = worker.run().unwrap();
        assert_eq!(report.submitted, 0);
        assert_eq!(report.completed, 0);
        assert!(report.latencies_us.is_empty());
    }
}
