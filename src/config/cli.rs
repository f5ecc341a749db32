//! CLI argument parsing using clap

use super::{IoMode, SubmitMode, WorkloadKind};
use clap::Parser;
use std::path::PathBuf;

/// nvpulse - NVMe micro-benchmark built on io_uring
#[derive(Parser, Debug)]
#[command(name = "nvpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Target block or character device node (e.g. /dev/nvme0n1)
    #[arg(long)]
    pub filename: PathBuf,

    /// Workload kind
    #[arg(long = "type", value_enum)]
    pub workload: WorkloadKind,

    /// Block size per IO (e.g. 4k, 64k, 1m)
    #[arg(long)]
    pub bs: String,

    /// Queue depth: IOs kept in flight
    #[arg(long)]
    pub iodepth: u32,

    /// Total byte budget (e.g. 1g); mutually exclusive with --runtime
    #[arg(long)]
    pub size: Option<String>,

    /// Run duration in seconds; mutually exclusive with --size
    #[arg(long)]
    pub runtime: Option<u64>,

    /// IO path: block-layer O_DIRECT or NVMe passthrough
    #[arg(long, value_enum, default_value = "direct")]
    pub mode: IoMode,

    /// Submission discipline
    #[arg(long, value_enum, default_value = "submit_and_wait")]
    pub submit: SubmitMode,

    /// Busy-poll the device for completions (IORING_SETUP_IOPOLL)
    #[arg(long)]
    pub iopoll: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_required_flags() {
        let cli = Cli::try_parse_from([
            "nvpulse",
            "--filename=/dev/nvme0n1",
            "--type=randread",
            "--bs=4k",
            "--iodepth=32",
            "--size=1g",
        ])
        .unwrap();

        assert_eq!(cli.filename, PathBuf::from("/dev/nvme0n1"));
        assert_eq!(cli.workload, WorkloadKind::RandRead);
        assert_eq!(cli.bs, "4k");
        assert_eq!(cli.iodepth, 32);
        assert_eq!(cli.size.as_deref(), Some("1g"));
        assert_eq!(cli.runtime, None);
        // Defaults
        assert_eq!(cli.mode, IoMode::Direct);
        assert_eq!(cli.submit, SubmitMode::SubmitAndWait);
        assert!(!cli.iopoll);
    }

    #[test]
    fn test_cli_parses_optional_flags() {
        let cli = Cli::try_parse_from([
            "nvpulse",
            "--filename=/dev/ng0n1",
            "--type=randwrite",
            "--bs=8192",
            "--iodepth=4",
            "--runtime=10",
            "--mode=passthrough",
            "--submit=sqpoll",
            "--iopoll",
        ])
        .unwrap();

        assert_eq!(cli.workload, WorkloadKind::RandWrite);
        assert_eq!(cli.runtime, Some(10));
        assert_eq!(cli.mode, IoMode::Passthrough);
        assert_eq!(cli.submit, SubmitMode::SqPoll);
        assert!(cli.iopoll);
    }

    #[test]
    fn test_cli_split_submit_name() {
        let cli = Cli::try_parse_from([
            "nvpulse",
            "--filename=/dev/nvme0n1",
            "--type=randread",
            "--bs=4k",
            "--iodepth=1",
            "--size=4k",
            "--submit=submit",
        ])
        .unwrap();
        assert_eq!(cli.submit, SubmitMode::SplitSubmitWait);
    }

    #[test]
    fn test_cli_rejects_unknown_workload() {
        let result = Cli::try_parse_from([
            "nvpulse",
            "--filename=/dev/nvme0n1",
            "--type=seqread",
            "--bs=4k",
            "--iodepth=1",
            "--size=4k",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_missing_required_flag() {
        let result = Cli::try_parse_from(["nvpulse", "--type=randread"]);
        assert!(result.is_err());
    }
}
