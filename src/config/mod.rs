//! Configuration module
//!
//! Handles CLI argument parsing, size-suffix decoding and validation of the
//! run configuration. The `Config` produced here is immutable for the rest
//! of the run.

pub mod cli;
pub mod units;

use crate::Result;
use anyhow::bail;
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;

/// Workload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkloadKind {
    /// Uniformly random reads
    #[value(name = "randread")]
    RandRead,
    /// Uniformly random writes
    #[value(name = "randwrite")]
    RandWrite,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::RandRead => write!(f, "randread"),
            WorkloadKind::RandWrite => write!(f, "randwrite"),
        }
    }
}

/// IO path selection
///
/// Direct mode drives the block device through the kernel block layer with
/// O_DIRECT. Passthrough mode submits NVMe commands straight to the
/// character device (`/dev/ngXnY`) via `IORING_OP_URING_CMD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IoMode {
    #[value(name = "direct")]
    Direct,
    #[value(name = "passthrough")]
    Passthrough,
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMode::Direct => write!(f, "direct"),
            IoMode::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// Submission discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SubmitMode {
    /// One io_uring_enter that submits and waits for a completion
    #[value(name = "submit_and_wait")]
    SubmitAndWait,
    /// Submit first, then block in a separate wait call
    #[value(name = "submit")]
    SplitSubmitWait,
    /// A kernel thread polls the submission queue; userspace only flushes
    /// the tail and waits
    #[value(name = "sqpoll")]
    SqPoll,
}

impl fmt::Display for SubmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitMode::SubmitAndWait => write!(f, "submit_and_wait"),
            SubmitMode::SplitSubmitWait => write!(f, "submit"),
            SubmitMode::SqPoll => write!(f, "sqpoll"),
        }
    }
}

/// Termination condition: exactly one of the two is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Stop after transferring this many bytes
    Bytes(u64),
    /// Stop issuing after this many seconds and drain
    Seconds(u64),
}

/// Validated run configuration
///
/// Built from the CLI with `Config::from_cli`; immutable afterwards. The
/// `block_size % lba_size == 0` invariant can only be checked once the
/// device is open, which `validate_block_size` does.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target device node
    pub filename: PathBuf,
    /// Workload kind
    pub workload: WorkloadKind,
    /// IO unit in bytes
    pub block_size: u64,
    /// Queue depth: the number of IOs kept in flight
    pub iodepth: u32,
    /// When to stop issuing
    pub termination: Termination,
    /// Block-layer direct IO or NVMe passthrough
    pub io_mode: IoMode,
    /// Submission discipline
    pub submit_mode: SubmitMode,
    /// Busy-poll the device for completions instead of taking interrupts
    pub iopoll: bool,
}

impl Config {
    /// Build and validate a configuration from parsed CLI arguments
    pub fn from_cli(cli: &cli::Cli) -> Result<Config> {
        let block_size = units::parse_size(&cli.bs)?;
        if block_size == 0 {
            bail!("--bs must be greater than 0");
        }
        if cli.iodepth == 0 {
            bail!("--iodepth must be at least 1");
        }

        let termination = match (&cli.size, cli.runtime) {
            (Some(size), None) => {
                let bytes = units::parse_size(size)?;
                if bytes == 0 {
                    bail!("--size must be greater than 0");
                }
                Termination::Bytes(bytes)
            }
            (None, Some(secs)) => {
                if secs == 0 {
                    bail!("--runtime must be greater than 0");
                }
                Termination::Seconds(secs)
            }
            (Some(_), Some(_)) => bail!("--size and --runtime are mutually exclusive"),
            (None, None) => bail!("one of --size or --runtime is required"),
        };

        Ok(Config {
            filename: cli.filename.clone(),
            workload: cli.workload,
            block_size,
            iodepth: cli.iodepth,
            termination,
            io_mode: cli.mode,
            submit_mode: cli.submit,
            iopoll: cli.iopoll,
        })
    }

    /// Check the block size against the device's logical block size
    pub fn validate_block_size(&self, lba_size: u32) -> Result<()> {
        if self.block_size % lba_size as u64 != 0 {
            bail!(
                "block size {} is not a multiple of the device LBA size {}",
                self.block_size,
                lba_size
            );
        }
        Ok(())
    }

    /// Total operation count for byte-budget runs (size rounded down to a
    /// whole number of blocks), None for duration runs.
    pub fn total_ops(&self) -> Option<u64> {
        match self.termination {
            Termination::Bytes(bytes) => Some(bytes / self.block_size),
            Termination::Seconds(_) => None,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  filename:   {}", self.filename.display())?;
        writeln!(f, "  type:       {}", self.workload)?;
        writeln!(f, "  bs:         {} bytes", self.block_size)?;
        writeln!(f, "  iodepth:    {}", self.iodepth)?;
        match self.termination {
            Termination::Bytes(b) => writeln!(f, "  size:       {} bytes", b)?,
            Termination::Seconds(s) => writeln!(f, "  runtime:    {} s", s)?,
        }
        writeln!(f, "  mode:       {}", self.io_mode)?;
        writeln!(f, "  submit:     {}", self.submit_mode)?;
        write!(f, "  iopoll:     {}", self.iopoll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> cli::Cli {
        cli::Cli {
            filename: PathBuf::from("/dev/nvme0n1"),
            workload: WorkloadKind::RandRead,
            bs: "4k".to_string(),
            iodepth: 4,
            size: Some("64k".to_string()),
            runtime: None,
            mode: IoMode::Direct,
            submit: SubmitMode::SubmitAndWait,
            iopoll: false,
        }
    }

    #[test]
    fn test_config_from_cli_byte_budget() {
        let config = Config::from_cli(&base_cli()).unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.iodepth, 4);
        assert_eq!(config.termination, Termination::Bytes(65536));
        assert_eq!(config.total_ops(), Some(16));
    }

    #[test]
    fn test_config_from_cli_duration() {
        let mut cli = base_cli();
        cli.size = None;
        cli.runtime = Some(5);
        let config = Config::from_cli(&cli).unwrap();
        assert_eq!(config.termination, Termination::Seconds(5));
        assert_eq!(config.total_ops(), None);
    }

    #[test]
    fn test_config_requires_one_termination() {
        let mut cli = base_cli();
        cli.size = None;
        cli.runtime = None;
        assert!(Config::from_cli(&cli).is_err());

        let mut cli = base_cli();
        cli.runtime = Some(5);
        assert!(Config::from_cli(&cli).is_err());
    }

    #[test]
    fn test_config_rejects_zero_fields() {
        let mut cli = base_cli();
        cli.iodepth = 0;
        assert!(Config::from_cli(&cli).is_err());

        let mut cli = base_cli();
        cli.bs = "0".to_string();
        assert!(Config::from_cli(&cli).is_err());

        let mut cli = base_cli();
        cli.size = None;
        cli.runtime = Some(0);
        assert!(Config::from_cli(&cli).is_err());
    }

    #[test]
    fn test_size_rounds_down_to_whole_blocks() {
        let mut cli = base_cli();
        cli.size = Some("10000".to_string());
        let config = Config::from_cli(&cli).unwrap();
        // 10000 / 4096 rounds down
        assert_eq!(config.total_ops(), Some(2));
    }

    #[test]
    fn test_validate_block_size() {
        let config = Config::from_cli(&base_cli()).unwrap();
        assert!(config.validate_block_size(512).is_ok());
        assert!(config.validate_block_size(4096).is_ok());
        assert!(config.validate_block_size(4096 * 2).is_err());
    }
}
