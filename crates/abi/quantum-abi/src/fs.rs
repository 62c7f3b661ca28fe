//! Filesystem service ABI.
//!
//! The kernel does not implement a VFS: filesystem services run in user
//! space and register a port per filesystem type. FileSystem syscalls are
//! forwarded to that port as an [`FsMessage`]; the service answers on the
//! embedded reply port with the status (and call-specific result words)
//! filled in.

/// Filesystem type identifiers.
pub mod fs_type {
    /// FAT12 (floppy) filesystem.
    pub const FAT12: u32 = 1;
}

/// Operations forwarded to a filesystem service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FsOp {
    /// Open a volume on a block device.
    OpenVolume = 1,
    /// Close an open volume.
    CloseVolume = 2,
    /// Enumerate volumes.
    ListVolumes = 3,
    /// Open a path on a volume.
    OpenPath = 4,
    /// Read from an open file.
    Read = 5,
    /// Write to an open file.
    Write = 6,
}

impl FsOp {
    /// Decodes a raw operation word.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::OpenVolume,
            2 => Self::CloseVolume,
            3 => Self::ListVolumes,
            4 => Self::OpenPath,
            5 => Self::Read,
            6 => Self::Write,
            _ => return None,
        })
    }
}

/// Request/reply message between the kernel broker and a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FsMessage {
    /// Operation (an [`FsOp`] value).
    pub op: u32,
    /// Call-specific argument words.
    pub args: [u32; 3],
    /// Port the service answers on.
    pub reply_port_id: u32,
    /// 0 on success in replies; service status otherwise.
    pub status: u32,
}

impl FsMessage {
    /// Byte length of the wire encoding.
    pub const WIRE_BYTES: usize = 24;

    /// Encodes the message into little-endian wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::WIRE_BYTES] {
        let mut out = [0u8; Self::WIRE_BYTES];
        let words = [
            self.op,
            self.args[0],
            self.args[1],
            self.args[2],
            self.reply_port_id,
            self.status,
        ];
        for (i, word) in words.into_iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decodes a message from wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_BYTES {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        Some(Self {
            op: word(0),
            args: [word(1), word(2), word(3)],
            reply_port_id: word(4),
            status: word(5),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips() {
        let msg = FsMessage {
            op: FsOp::OpenPath as u32,
            args: [1, 0x40_0000, 64],
            reply_port_id: 9,
            status: 0,
        };
        assert_eq!(FsMessage::from_bytes(&msg.to_bytes()), Some(msg));
    }

    #[test]
    fn op_decode_rejects_unknown() {
        assert_eq!(FsOp::from_raw(0), None);
        assert_eq!(FsOp::from_raw(7), None);
        assert_eq!(FsOp::from_raw(5), Some(FsOp::Read));
    }
}
