//! NVMe passthrough wire format
//!
//! The types needed to submit NVMe IO commands via `IORING_OP_URING_CMD` on
//! an NVMe-generic character device (`/dev/ng<X>n<Y>`). The command bypasses
//! the filesystem and block layer entirely.
//!
//! Requires Linux 5.19+ for `IORING_OP_URING_CMD` on NVMe.

/// NVMe IO command opcodes (NVM command set)
pub const NVME_CMD_WRITE: u8 = 0x01;
pub const NVME_CMD_READ: u8 = 0x02;

/// NVMe uring_cmd sub-opcode passed as `cmd_op` to `IORING_OP_URING_CMD`
pub const NVME_URING_CMD_IO: u32 = 0;

/// NVMe command structure for io_uring passthrough
///
/// Matches the kernel's `struct nvme_uring_cmd` (72 bytes); embedded in the
/// 80-byte command area of a 128-byte SQE.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvmeUringCmd {
    /// NVMe command opcode (0x02 Read, 0x01 Write)
    pub opcode: u8,
    pub flags: u8,
    pub rsvd1: u16,
    /// Namespace ID
    pub nsid: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    /// Metadata buffer address (0 if unused)
    pub metadata: u64,
    /// Data buffer address (userspace virtual address)
    pub addr: u64,
    pub metadata_len: u32,
    /// Data length in bytes
    pub data_len: u32,
    /// Starting LBA, low 32 bits
    pub cdw10: u32,
    /// Starting LBA, high 32 bits
    pub cdw11: u32,
    /// Number of logical blocks minus one
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
    /// Timeout in milliseconds (0 = kernel default)
    pub timeout_ms: u32,
    pub rsvd2: u32,
}

const _: () = assert!(std::mem::size_of::<NvmeUringCmd>() == 72);

impl NvmeUringCmd {
    /// Build an NVMe Read command for `blocks` logical blocks at `lba`
    pub fn read(nsid: u32, lba: u64, blocks: u32, buf_addr: u64, buf_len: u32) -> Self {
        Self::io(NVME_CMD_READ, nsid, lba, blocks, buf_addr, buf_len)
    }

    /// Build an NVMe Write command for `blocks` logical blocks at `lba`
    pub fn write(nsid: u32, lba: u64, blocks: u32, buf_addr: u64, buf_len: u32) -> Self {
        Self::io(NVME_CMD_WRITE, nsid, lba, blocks, buf_addr, buf_len)
    }

    fn io(opcode: u8, nsid: u32, lba: u64, blocks: u32, buf_addr: u64, buf_len: u32) -> Self {
        NvmeUringCmd {
            opcode,
            nsid,
            addr: buf_addr,
            data_len: buf_len,
            cdw10: (lba & 0xFFFF_FFFF) as u32,
            cdw11: (lba >> 32) as u32,
            cdw12: blocks - 1,
            ..Default::default()
        }
    }

    /// Serialize into the 80-byte SQE command area
    pub fn to_bytes(&self) -> [u8; 80] {
        let mut buf = [0u8; 80];
        // Safety: NvmeUringCmd is repr(C) and 72 bytes, fits in 80.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self as *const Self as *const u8,
                buf.as_mut_ptr(),
                std::mem::size_of::<Self>(),
            );
        }
        buf
    }
}
