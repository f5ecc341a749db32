//! NVMe device handle
//!
//! Owns the open file descriptor to the target device and exposes the
//! geometry the engine needs: logical block size, namespace capacity in
//! LBAs and (for passthrough) the namespace ID.
//!
//! Direct mode opens the block node with O_DIRECT and reads the geometry
//! from the standard block-layer ioctls. Passthrough mode opens the
//! character-device sibling and issues an Identify Namespace admin command
//! to get `nsze` and the active LBA format.

pub mod path;

use crate::config::IoMode;
use crate::Result;
use anyhow::{bail, Context};
use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

// ioctl request codes
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272; // _IOR(0x12, 114, u64)
const BLKSSZGET: libc::c_ulong = 0x1268; // _IO(0x12, 104)
const NVME_IOCTL_ID: libc::c_ulong = 0x4E40; // _IO('N', 0x40)
const NVME_IOCTL_ADMIN_CMD: libc::c_ulong = 0xC048_4E41; // _IOWR('N', 0x41, nvme_admin_cmd)

const NVME_ADMIN_IDENTIFY: u8 = 0x06;
const NVME_IDENTIFY_CNS_NS: u32 = 0x00;

/// Kernel `struct nvme_admin_cmd` (same layout as `nvme_passthru_cmd`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct NvmeAdminCmd {
    opcode: u8,
    flags: u8,
    rsvd1: u16,
    nsid: u32,
    cdw2: u32,
    cdw3: u32,
    metadata: u64,
    addr: u64,
    metadata_len: u32,
    data_len: u32,
    cdw10: u32,
    cdw11: u32,
    cdw12: u32,
    cdw13: u32,
    cdw14: u32,
    cdw15: u32,
    timeout_ms: u32,
    result: u32,
}

const _: () = assert!(std::mem::size_of::<NvmeAdminCmd>() == 72);

/// Open NVMe device with its geometry, immutable after open
pub struct NvmeHandle {
    fd: RawFd,
    nsid: u32,
    lba_size: u32,
    nlba: u64,
}

impl NvmeHandle {
    /// Open the device in the requested IO mode
    pub fn open(device_path: &Path, mode: IoMode) -> Result<NvmeHandle> {
        match mode {
            IoMode::Direct => Self::open_direct(device_path),
            IoMode::Passthrough => Self::open_passthrough(device_path),
        }
    }

    fn open_direct(device_path: &Path) -> Result<NvmeHandle> {
        let fd = open_fd(device_path, libc::O_DIRECT)?;
        let mut handle = NvmeHandle {
            fd,
            nsid: 0, // unused outside passthrough
            lba_size: 0,
            nlba: 0,
        };

        let size_bytes = blk_getsize64(fd)?;
        let lba_size = blk_sszget(fd)?;

        handle.lba_size = lba_size;
        handle.nlba = size_bytes / lba_size as u64;
        Ok(handle)
    }

    fn open_passthrough(device_path: &Path) -> Result<NvmeHandle> {
        let char_path = path::passthrough_path(device_path);
        let fd = open_fd(&char_path, 0)?;
        let mut handle = NvmeHandle {
            fd,
            nsid: 0,
            lba_size: 0,
            nlba: 0,
        };

        let ret = unsafe { libc::ioctl(fd, NVME_IOCTL_ID) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error()).context("ioctl(NVME_IOCTL_ID) failed");
        }
        handle.nsid = ret as u32;

        let mut identify = [0u8; 4096];
        let mut cmd = NvmeAdminCmd {
            opcode: NVME_ADMIN_IDENTIFY,
            nsid: handle.nsid,
            addr: identify.as_mut_ptr() as u64,
            data_len: identify.len() as u32,
            cdw10: NVME_IDENTIFY_CNS_NS,
            ..Default::default()
        };
        if unsafe { libc::ioctl(fd, NVME_IOCTL_ADMIN_CMD, &mut cmd) } < 0 {
            return Err(std::io::Error::last_os_error())
                .context("NVMe Identify Namespace command failed");
        }

        let (nlba, lba_size) = parse_identify_ns(&identify)?;
        handle.nlba = nlba;
        handle.lba_size = lba_size;
        Ok(handle)
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn nsid(&self) -> u32 {
        self.nsid
    }

    /// Logical block size in bytes
    #[inline]
    pub fn lba_size(&self) -> u32 {
        self.lba_size
    }

    /// Namespace capacity in logical blocks
    #[inline]
    pub fn nlba(&self) -> u64 {
        self.nlba
    }
}

impl Drop for NvmeHandle {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl fmt::Display for NvmeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device:")?;
        writeln!(f, "  fd:         {}", self.fd)?;
        writeln!(f, "  nsid:       {}", self.nsid)?;
        writeln!(f, "  lba_size:   {} bytes", self.lba_size)?;
        write!(f, "  nlba:       {}", self.nlba)
    }
}

fn open_fd(device_path: &Path, extra_flags: libc::c_int) -> Result<RawFd> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if extra_flags != 0 {
        options.custom_flags(extra_flags);
    }

    let file = options
        .open(device_path)
        .with_context(|| format!("Failed to open device: {}", device_path.display()))?;
    let fd = file.as_raw_fd();
    std::mem::forget(file); // closed in NvmeHandle::drop
    Ok(fd)
}

fn blk_getsize64(fd: RawFd) -> Result<u64> {
    let mut size: u64 = 0;
    if unsafe { libc::ioctl(fd, BLKGETSIZE64, &mut size) } < 0 {
        return Err(std::io::Error::last_os_error()).context("ioctl(BLKGETSIZE64) failed");
    }
    Ok(size)
}

fn blk_sszget(fd: RawFd) -> Result<u32> {
    let mut block_size: libc::c_int = 0;
    if unsafe { libc::ioctl(fd, BLKSSZGET, &mut block_size) } < 0 {
        return Err(std::io::Error::last_os_error()).context("ioctl(BLKSSZGET) failed");
    }
    Ok(block_size as u32)
}

/// Extract capacity and LBA size from Identify Namespace data
///
/// `nsze` sits at offset 0; `flbas` bits 0-3 select the active entry of the
/// LBA format table at offset 128, whose `ds` field is the log2 of the data
/// size.
fn parse_identify_ns(identify: &[u8; 4096]) -> Result<(u64, u32)> {
    let mut nsze = [0u8; 8];
    nsze.copy_from_slice(&identify[0..8]);
    let nlba = u64::from_le_bytes(nsze);

    let flbas = identify[26];
    let format_index = (flbas & 0x0F) as usize;
    let ds = identify[128 + format_index * 4 + 2];
    if ds == 0 || ds >= 32 {
        bail!("Identify Namespace reported implausible LBA data size exponent {}", ds);
    }

    Ok((nlba, 1u32 << ds))
}
