//! Latency statistics
//!
//! The engine loop appends one latency sample (microseconds, as f64) per
//! completion; this module turns that ledger into the final report. The
//! ledger keeps raw samples rather than histogram buckets so percentiles
//! come out exact, with linear interpolation between neighbors.

use std::time::Duration;

/// Linear-interpolated percentile over an ascending-sorted sample
///
/// The value at percentile `p` is `x[floor(i)]*(1-f) + x[ceil(i)]*f` with
/// `i = (p/100)*(n-1)` and `f` its fractional part; the upper neighbor is
/// clamped at the last element.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = (index.ceil() as usize).min(sorted.len() - 1);
    let frac = index - lower as f64;
    sorted[lower] * (1.0 - frac) + sorted[upper] * frac
}

/// Aggregate results of one run
#[derive(Debug, Clone)]
pub struct Summary {
    pub completed: u64,
    pub elapsed_secs: f64,
    pub iops: f64,
    /// MB/s with a mebibyte denominator
    pub bandwidth_mbs: f64,
    pub min_us: f64,
    pub avg_us: f64,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
}

impl Summary {
    /// Sort the ledger and compute the aggregate report
    pub fn compute(mut latencies_us: Vec<f64>, elapsed: Duration, block_size: u64) -> Summary {
        latencies_us.sort_by(f64::total_cmp);

        let completed = latencies_us.len() as u64;
        let elapsed_secs = elapsed.as_secs_f64();
        let (iops, bandwidth_mbs) = if elapsed_secs > 0.0 {
            (
                completed as f64 / elapsed_secs,
                (completed * block_size) as f64 / (elapsed_secs * (1 << 20) as f64),
            )
        } else {
            (0.0, 0.0)
        };

        let sum: f64 = latencies_us.iter().sum();
        let avg_us = if completed > 0 {
            sum / completed as f64
        } else {
            0.0
        };

        Summary {
            completed,
            elapsed_secs,
            iops,
            bandwidth_mbs,
            min_us: latencies_us.first().copied().unwrap_or(0.0),
            avg_us,
            p50_us: percentile(&latencies_us, 50.0),
            p95_us: percentile(&latencies_us, 95.0),
            p99_us: percentile(&latencies_us, 99.0),
            max_us: latencies_us.last().copied().unwrap_or(0.0),
        }
    }

    /// Render the statistics block for stdout
    pub fn render(&self, label: &str) -> String {
        format!(
            "{}: IOPS={:.2}, BW={:.2} MB/s\n  \
             lat (usec): min={:.2}, avg={:.2}, p50={:.2}, p95={:.2}, p99={:.2}, max={:.2}\n  \
             ops: completed={}, elapsed={:.2}s",
            label,
            self.iops,
            self.bandwidth_mbs,
            self.min_us,
            self.avg_us,
            self.p50_us,
            self.p95_us,
            self.p99_us,
            self.max_us,
            self.completed,
            self.elapsed_secs,
        )
    }
}
