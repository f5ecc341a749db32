//! Mock ring for engine-loop tests
//!
//! Stands in for the io_uring facade so the benchmark loop's queue-depth,
//! slot-exclusivity and accounting invariants can be proven without a
//! device. Every push is recorded with its tag and timestamp; completions
//! are delivered FIFO, optionally in bounded batches and with a simulated
//! device latency.

use super::{CommandRing, Completion, IoRequest};
use crate::Result;
use anyhow::bail;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Record of one submission, kept for post-run verification
#[derive(Debug, Clone, Copy)]
pub struct PushRecord {
    pub tag: u64,
    pub request: IoRequest,
    pub at: Instant,
}

/// Recording mock implementation of `CommandRing`
pub struct MockRing {
    /// Staged-but-uncompleted entries: (tag, success result)
    pending: VecDeque<(u64, i32)>,
    /// Every push, in submission order
    records: Vec<PushRecord>,
    /// Tags currently between push and completion
    outstanding: HashSet<u64>,
    /// High-water mark of outstanding entries
    max_outstanding: usize,
    /// Set if a tag was pushed while a prior IO for it was still in flight
    duplicate_tag: bool,
    /// Completions delivered per wait call; 0 drains everything ready
    complete_batch: usize,
    /// Simulated device latency, applied once per wait call
    wait_delay: Option<Duration>,
    /// Forced completion result (e.g. a negative errno), overriding the
    /// transfer length
    forced_result: Option<i32>,
    flush_calls: usize,
}

impl MockRing {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            records: Vec::new(),
            outstanding: HashSet::new(),
            max_outstanding: 0,
            duplicate_tag: false,
            complete_batch: 0,
            wait_delay: None,
            forced_result: None,
            flush_calls: 0,
        }
    }

    /// Deliver at most `batch` completions per wait call
    pub fn set_complete_batch(&mut self, batch: usize) {
        self.complete_batch = batch;
    }

    /// Sleep this long in every wait call, simulating device latency
    pub fn set_wait_delay(&mut self, delay: Duration) {
        self.wait_delay = Some(delay);
    }

    /// Complete every IO with this result instead of the transfer length
    pub fn set_forced_result(&mut self, result: i32) {
        self.forced_result = Some(result);
    }

    pub fn records(&self) -> &[PushRecord] {
        &self.records
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    pub fn saw_duplicate_tag(&self) -> bool {
        self.duplicate_tag
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls
    }
}

impl Default for MockRing {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRing for MockRing {
    fn push(&mut self, req: &IoRequest, tag: u64) -> Result<()> {
        if !self.outstanding.insert(tag) {
            self.duplicate_tag = true;
        }
        self.max_outstanding = self.max_outstanding.max(self.outstanding.len());

        let length = match req {
            IoRequest::Direct { len, .. } => *len as i32,
            IoRequest::Passthrough { data_len, .. } => *data_len as i32,
        };
        self.pending.push_back((tag, length));
        self.records.push(PushRecord {
            tag,
            request: *req,
            at: Instant::now(),
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_calls += 1;
        Ok(())
    }

    fn wait(&mut self, out: &mut Vec<Completion>) -> Result<()> {
        if self.pending.is_empty() {
            bail!("wait called with no IO in flight");
        }
        if let Some(delay) = self.wait_delay {
            std::thread::sleep(delay);
        }

        let ready = if self.complete_batch == 0 {
            self.pending.len()
        } else {
            self.complete_batch.min(self.pending.len())
        };
        for _ in 0..ready {
            let (tag, length) = self.pending.pop_front().unwrap();
            self.outstanding.remove(&tag);
            out.push(Completion {
                tag,
                result: self.forced_result.unwrap_or(length),
            });
        }
        Ok(())
    }
}
