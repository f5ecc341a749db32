//! io_uring ring facade
//!
//! Wraps the kernel submission/completion ring behind `CommandRing`. The
//! facade owns feature selection (SQPOLL, IOPOLL, single-issuer, deferred
//! task-run), wide-SQE setup for passthrough, and the fixed-file /
//! fixed-buffer registration that takes fd lookups and page-table walks off
//! the hot path.
//!
//! # Ring shapes
//!
//! Direct mode runs a normal 64-byte-SQE ring and uses the fixed-buffer
//! read/write opcodes. Passthrough needs the 128-byte SQE / 32-byte CQE
//! ring so each entry can embed a `struct nvme_uring_cmd`. The two shapes
//! never mix on one ring, so they are separate enum variants here.
//!
//! # Requirements
//!
//! - Linux 6.1+ for DEFER_TASKRUN (the interrupt-driven default)
//! - Linux 5.19+ for NVMe passthrough via IORING_OP_URING_CMD

use super::nvme::{NvmeUringCmd, NVME_URING_CMD_IO};
use super::{CommandRing, Completion, IoRequest, OpKind};
use crate::config::{Config, IoMode, SubmitMode};
use crate::util::buffer::BufferPool;
use crate::Result;
use anyhow::{anyhow, bail, Context};
use io_uring::{cqueue, opcode, squeue, types, Builder, IoUring, Submitter};
use std::os::unix::io::RawFd;

/// Idle grace before the SQPOLL kernel thread goes to sleep
const SQPOLL_IDLE_MS: u32 = 2000;

/// Resolved ring feature selection
///
/// IOPOLL and DEFER_TASKRUN are mutually exclusive, so the deferred
/// task-run hint is only set on interrupt-driven rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupFlags {
    pub single_issuer: bool,
    pub defer_taskrun: bool,
    pub iopoll: bool,
    pub sqpoll_idle_ms: Option<u32>,
}

impl SetupFlags {
    /// Map the submit/completion disciplines onto ring setup flags
    pub fn select(submit_mode: SubmitMode, iopoll: bool) -> SetupFlags {
        match submit_mode {
            SubmitMode::SubmitAndWait | SubmitMode::SplitSubmitWait => SetupFlags {
                single_issuer: true,
                defer_taskrun: !iopoll,
                iopoll,
                sqpoll_idle_ms: None,
            },
            SubmitMode::SqPoll => SetupFlags {
                single_issuer: true,
                defer_taskrun: false,
                iopoll,
                sqpoll_idle_ms: Some(SQPOLL_IDLE_MS),
            },
        }
    }

    fn apply<S, C>(&self, builder: &mut Builder<S, C>)
    where
        S: squeue::EntryMarker,
        C: cqueue::EntryMarker,
    {
        if self.single_issuer {
            builder.setup_single_issuer();
        }
        if self.defer_taskrun {
            builder.setup_defer_taskrun();
        }
        if self.iopoll {
            builder.setup_iopoll();
        }
        if let Some(idle) = self.sqpoll_idle_ms {
            builder.setup_sqpoll(idle);
        }
    }
}

// The four submission shapes. Every entry targets fixed file 0 and carries
// the slot index as user-data.

fn read_direct(offset: u64, len: u32, buf_index: u16, buf_ptr: *mut u8, tag: u64) -> squeue::Entry {
    opcode::ReadFixed::new(types::Fixed(0), buf_ptr, len, buf_index)
        .offset(offset)
        .build()
        .user_data(tag)
}

fn write_direct(offset: u64, len: u32, buf_index: u16, buf_ptr: *const u8, tag: u64) -> squeue::Entry {
    opcode::WriteFixed::new(types::Fixed(0), buf_ptr, len, buf_index)
        .offset(offset)
        .build()
        .user_data(tag)
}

fn read_passthrough(
    nsid: u32,
    lba: u64,
    blocks: u32,
    buf_addr: u64,
    data_len: u32,
    tag: u64,
) -> squeue::Entry128 {
    let cmd = NvmeUringCmd::read(nsid, lba, blocks, buf_addr, data_len);
    opcode::UringCmd80::new(types::Fixed(0), NVME_URING_CMD_IO)
        .cmd(cmd.to_bytes())
        .build()
        .user_data(tag)
}

fn write_passthrough(
    nsid: u32,
    lba: u64,
    blocks: u32,
    buf_addr: u64,
    data_len: u32,
    tag: u64,
) -> squeue::Entry128 {
    let cmd = NvmeUringCmd::write(nsid, lba, blocks, buf_addr, data_len);
    opcode::UringCmd80::new(types::Fixed(0), NVME_URING_CMD_IO)
        .cmd(cmd.to_bytes())
        .build()
        .user_data(tag)
}

enum RingKind {
    Direct(IoUring<squeue::Entry, cqueue::Entry>),
    Passthrough(IoUring<squeue::Entry128, cqueue::Entry32>),
}

/// io_uring-backed `CommandRing`
pub struct UringRing {
    ring: RingKind,
    submit_mode: SubmitMode,
    nsid: u32,
    registered_buffers: bool,
}

impl UringRing {
    /// Build a ring of capacity `config.iodepth` and register resources
    ///
    /// The device fd becomes fixed file 0. In direct mode the pool is also
    /// registered as the fixed-buffer set; passthrough commands carry raw
    /// addresses, so there registration would buy nothing.
    ///
    /// The pool must stay alive until this ring is dropped: registration
    /// hands the kernel the buffer addresses.
    pub fn new(config: &Config, fd: RawFd, nsid: u32, pool: &BufferPool) -> Result<UringRing> {
        let flags = SetupFlags::select(config.submit_mode, config.iopoll);

        let (ring, registered_buffers) = match config.io_mode {
            IoMode::Direct => {
                let mut builder = IoUring::<squeue::Entry, cqueue::Entry>::builder();
                flags.apply(&mut builder);
                let ring = builder
                    .build(config.iodepth)
                    .context("Failed to create io_uring instance")?;

                ring.submitter()
                    .register_files(&[fd])
                    .context("Failed to register fixed file")?;

                let iovecs = pool.iovecs();
                // Safety: the iovecs point into the pool, which the caller
                // keeps alive for the lifetime of the ring.
                unsafe { ring.submitter().register_buffers(&iovecs) }
                    .context("Failed to register fixed buffers")?;

                (RingKind::Direct(ring), true)
            }
            IoMode::Passthrough => {
                let mut builder = IoUring::<squeue::Entry128, cqueue::Entry32>::builder();
                flags.apply(&mut builder);
                let ring = builder
                    .build(config.iodepth)
                    .context("Failed to create io_uring instance")?;

                ring.submitter()
                    .register_files(&[fd])
                    .context("Failed to register fixed file")?;

                (RingKind::Passthrough(ring), false)
            }
        };

        Ok(UringRing {
            ring,
            submit_mode: config.submit_mode,
            nsid,
            registered_buffers,
        })
    }

    fn submitter(&self) -> Submitter<'_> {
        match &self.ring {
            RingKind::Direct(ring) => ring.submitter(),
            RingKind::Passthrough(ring) => ring.submitter(),
        }
    }
}

/// Submit pending entries, retrying on EAGAIN
///
/// EAGAIN means the kernel was momentarily unable to take the batch; every
/// other submit error is fatal because the benchmark cannot continue on a
/// degraded ring.
fn submit_retry(submitter: &Submitter<'_>) -> Result<usize> {
    loop {
        match submitter.submit() {
            Ok(n) => return Ok(n),
            Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => continue,
            Err(e) => return Err(e).context("io_uring submit failed"),
        }
    }
}

fn submit_and_wait_retry(submitter: &Submitter<'_>, want: usize) -> Result<usize> {
    loop {
        match submitter.submit_and_wait(want) {
            Ok(n) => return Ok(n),
            Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => continue,
            Err(e) => return Err(e).context("io_uring submit-and-wait failed"),
        }
    }
}

/// Block until at least one completion is ready, per discipline
fn enter(submitter: &Submitter<'_>, mode: SubmitMode) -> Result<()> {
    match mode {
        SubmitMode::SubmitAndWait => {
            // One syscall submits pending entries and waits
            submit_and_wait_retry(submitter, 1)?;
        }
        SubmitMode::SplitSubmitWait => {
            // Submit first; the wait call then finds an empty SQ and blocks
            submit_retry(submitter)?;
            submit_and_wait_retry(submitter, 1)?;
        }
        SubmitMode::SqPoll => {
            // Tail flush: no syscall while the poller thread is awake, a
            // wakeup (and memory barrier) when it has gone idle
            submit_retry(submitter)?;
            submit_and_wait_retry(submitter, 1)?;
        }
    }
    Ok(())
}

impl CommandRing for UringRing {
    fn push(&mut self, req: &IoRequest, tag: u64) -> Result<()> {
        let nsid = self.nsid;
        match (&mut self.ring, req) {
            (
                RingKind::Direct(ring),
                IoRequest::Direct {
                    kind,
                    offset,
                    len,
                    buf_index,
                    buf_ptr,
                },
            ) => {
                let entry = match kind {
                    OpKind::Read => read_direct(*offset, *len, *buf_index, *buf_ptr, tag),
                    OpKind::Write => write_direct(*offset, *len, *buf_index, *buf_ptr, tag),
                };
                // Safety: the entry references a pool buffer that stays
                // valid until the completion for this tag is reaped.
                unsafe { ring.submission().push(&entry) }
                    .map_err(|_| anyhow!("submission queue full: queue depth invariant violated"))?;
            }
            (
                RingKind::Passthrough(ring),
                IoRequest::Passthrough {
                    kind,
                    lba,
                    blocks,
                    buf_addr,
                    data_len,
                },
            ) => {
                let entry = match kind {
                    OpKind::Read => read_passthrough(nsid, *lba, *blocks, *buf_addr, *data_len, tag),
                    OpKind::Write => {
                        write_passthrough(nsid, *lba, *blocks, *buf_addr, *data_len, tag)
                    }
                };
                unsafe { ring.submission().push(&entry) }
                    .map_err(|_| anyhow!("submission queue full: queue depth invariant violated"))?;
            }
            _ => bail!("request shape does not match ring mode"),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        submit_retry(&self.submitter())?;
        Ok(())
    }

    fn wait(&mut self, out: &mut Vec<Completion>) -> Result<()> {
        match &mut self.ring {
            RingKind::Direct(ring) => {
                enter(&ring.submitter(), self.submit_mode)?;
                for cqe in ring.completion() {
                    out.push(Completion {
                        tag: cqe.user_data(),
                        result: cqe.result(),
                    });
                }
            }
            RingKind::Passthrough(ring) => {
                enter(&ring.submitter(), self.submit_mode)?;
                for cqe in ring.completion() {
                    out.push(Completion {
                        tag: cqe.user_data(),
                        result: cqe.result(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Drop for UringRing {
    fn drop(&mut self) {
        // Teardown order: unregister before the ring itself closes
        let submitter = self.submitter();
        if self.registered_buffers {
            let _ = submitter.unregister_buffers();
        }
        let _ = submitter.unregister_files();
    }
}
