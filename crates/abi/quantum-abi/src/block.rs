//! Block-device ABI: device descriptions and driver request messages.
//!
//! The kernel brokers block I/O between clients and user-mode drivers: a
//! request travels to the driver's bound port as a [`BlockMessage`], and the
//! driver answers on the embedded reply port.

use bitflags::bitflags;

/// Device kind discriminants.
pub mod kind {
    /// Floppy disk drive.
    pub const FLOPPY: u32 = 1;
    /// Fixed disk.
    pub const DISK: u32 = 2;
}

bitflags! {
    /// Block-device capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        /// A driver port is bound and the device accepts requests.
        const READY = 1 << 0;
        /// Writes are rejected.
        const READ_ONLY = 1 << 1;
        /// Media can be removed.
        const REMOVABLE = 1 << 2;
    }
}

/// Description of a registered block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct BlockInfo {
    /// Registry-assigned device id (non-zero).
    pub id: u32,
    /// Device kind (see [`kind`]).
    pub kind: u32,
    /// Sector size in bytes.
    pub sector_size: u32,
    /// Total sector count.
    pub sector_count: u32,
    /// Capability flags.
    pub flags: u32,
}

/// A client read/write request as passed to the Block syscalls.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BlockRequest {
    /// Target device id.
    pub device_id: u32,
    /// First sector.
    pub lba: u32,
    /// Number of sectors.
    pub count: u32,
    /// Client buffer (user virtual address).
    pub buffer: u32,
}

/// Operations in a driver request message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockOp {
    /// Read `count` sectors starting at `lba`.
    Read = 1,
    /// Write `count` sectors starting at `lba`.
    Write = 2,
}

/// Bytes of sector data that fit in one driver message.
pub const MESSAGE_DATA_BYTES: usize = 224;

/// Driver request/reply message header (precedes the data bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct BlockMessage {
    /// Operation.
    pub op: u32,
    /// Target device id.
    pub device_id: u32,
    /// First sector.
    pub lba: u32,
    /// Number of sectors.
    pub count: u32,
    /// Port the driver answers on.
    pub reply_port_id: u32,
    /// 0 on success in replies; non-zero driver status otherwise.
    pub status: u32,
    /// Valid bytes in the trailing data.
    pub data_length: u32,
}

impl BlockMessage {
    /// Byte length of the header on the wire.
    pub const HEADER_BYTES: usize = 28;

    /// Encodes the header into little-endian wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::HEADER_BYTES] {
        let mut out = [0u8; Self::HEADER_BYTES];
        for (i, word) in [
            self.op,
            self.device_id,
            self.lba,
            self.count,
            self.reply_port_id,
            self.status,
            self.data_length,
        ]
        .into_iter()
        .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decodes a header from wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::HEADER_BYTES {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        Some(Self {
            op: word(0),
            device_id: word(1),
            lba: word(2),
            count: word(3),
            reply_port_id: word(4),
            status: word(5),
            data_length: word(6),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::MAX_PAYLOAD_BYTES;

    #[test]
    fn header_round_trips() {
        let msg = BlockMessage {
            op: BlockOp::Write as u32,
            device_id: 1,
            lba: 12,
            count: 2,
            reply_port_id: 7,
            status: 0,
            data_length: 1024,
        };
        assert_eq!(BlockMessage::from_bytes(&msg.to_bytes()), Some(msg));
    }

    #[test]
    fn header_plus_data_fits_a_message() {
        assert!(BlockMessage::HEADER_BYTES + MESSAGE_DATA_BYTES <= MAX_PAYLOAD_BYTES);
    }
}
