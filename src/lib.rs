//! nvpulse - NVMe micro-benchmark built on io_uring
//!
//! nvpulse drives random reads or writes against a direct-attached NVMe
//! namespace at a fixed queue depth and reports IOPS, bandwidth and the
//! per-operation latency distribution.
//!
//! # Architecture
//!
//! - **Two IO paths**: block-layer O_DIRECT, or NVMe passthrough via
//!   `IORING_OP_URING_CMD` on the character device
//! - **Submit disciplines**: submit-and-wait, split submit/wait, or SQPOLL
//! - **Completion disciplines**: interrupt-driven or IOPOLL
//! - **Fixed files and fixed buffers**: registered up front, off the hot path
//! - **Single issuer**: one thread, all concurrency lives in the ring window

pub mod config;
pub mod device;
pub mod distribution;
pub mod engine;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use engine::CommandRing;

/// Result type used throughout nvpulse
pub type Result<T> = anyhow::Result<T>;
