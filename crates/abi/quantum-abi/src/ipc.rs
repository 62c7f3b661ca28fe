//! IPC message wire format and port rights.
//!
//! Messages are copied into kernel-owned queue slots at send time and out to
//! receiver-owned buffers at receive time; the payload is opaque to the
//! kernel except for the in-band handle-transfer prefix.

use bitflags::bitflags;

use crate::handle::Handle;

/// Maximum payload size of an IPC message in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 256;

/// Maximum number of queued messages per port.
pub const MAX_QUEUE_DEPTH: usize = 8;

/// Sender id the kernel stamps on messages it originates (IRQ notifications).
pub const KERNEL_SENDER: u32 = 0;

bitflags! {
    /// Rights attached to a port handle.
    ///
    /// A handle's rights are fixed at creation time and are always a subset
    /// of the port's creation rights; duplication can only narrow them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortRights: u32 {
        /// May enqueue messages.
        const SEND = 1 << 0;
        /// May dequeue messages (owner only in practice).
        const RECEIVE = 1 << 1;
        /// May bind IRQs, rebind, or destroy the port.
        const MANAGE = 1 << 2;
    }
}

impl PortRights {
    /// Every right a port owner holds by construction.
    pub const FULL: Self = Self::from_bits_retain(0b111);
}

/// IPC message as seen by user code.
///
/// `sender` and `length` are written by the kernel at receive time; the
/// sender field of an outgoing message is ignored.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Message {
    /// Task id of the sender, stamped by the kernel.
    pub sender: u32,
    /// Valid payload length in bytes (`<= MAX_PAYLOAD_BYTES`).
    pub length: u32,
    /// Payload bytes; opaque to the kernel except for the handle prefix.
    pub payload: [u8; MAX_PAYLOAD_BYTES],
}

impl Message {
    /// An empty message.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            sender: 0,
            length: 0,
            payload: [0; MAX_PAYLOAD_BYTES],
        }
    }

    /// Builds a message from payload bytes.
    ///
    /// Returns `None` when `bytes` exceeds [`MAX_PAYLOAD_BYTES`].
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return None;
        }
        let mut msg = Self::empty();
        msg.length = bytes.len() as u32;
        msg.payload[..bytes.len()].copy_from_slice(bytes);
        Some(msg)
    }

    /// The valid portion of the payload.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        let len = (self.length as usize).min(MAX_PAYLOAD_BYTES);
        &self.payload[..len]
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// In-band handle transfer
// ---------------------------------------------------------------------------

/// Tag word marking a handle-bearing message payload.
pub const HANDLE_PREFIX_TAG: u32 = 0x4851_4E44; // "HQND"

/// Byte length of the handle-transfer prefix.
pub const HANDLE_PREFIX_BYTES: usize = 12;

/// Structured prefix at the start of a handle-bearing payload.
///
/// The `handle` word is a placeholder on send and is patched by the kernel at
/// receive time to the entry installed in the receiver's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlePrefix {
    /// Handle installed in the receiver's table.
    pub handle: Handle,
    /// Rights granted to the receiver.
    pub rights: PortRights,
}

/// Writes a handle prefix into the first [`HANDLE_PREFIX_BYTES`] of `payload`.
///
/// Returns `None` when the buffer is too small.
pub fn write_handle_prefix(payload: &mut [u8], prefix: HandlePrefix) -> Option<()> {
    if payload.len() < HANDLE_PREFIX_BYTES {
        return None;
    }
    payload[0..4].copy_from_slice(&HANDLE_PREFIX_TAG.to_le_bytes());
    payload[4..8].copy_from_slice(&prefix.handle.to_le_bytes());
    payload[8..12].copy_from_slice(&prefix.rights.bits().to_le_bytes());
    Some(())
}

/// Reads a handle prefix back out of a payload, if the tag matches.
#[must_use]
pub fn read_handle_prefix(payload: &[u8]) -> Option<HandlePrefix> {
    if payload.len() < HANDLE_PREFIX_BYTES {
        return None;
    }
    let tag = u32::from_le_bytes(payload[0..4].try_into().ok()?);
    if tag != HANDLE_PREFIX_TAG {
        return None;
    }
    let handle = u32::from_le_bytes(payload[4..8].try_into().ok()?);
    let rights = PortRights::from_bits_truncate(u32::from_le_bytes(payload[8..12].try_into().ok()?));
    Some(HandlePrefix { handle, rights })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_from_bytes_bounds() {
        assert!(Message::from_bytes(&[0u8; MAX_PAYLOAD_BYTES]).is_some());
        assert!(Message::from_bytes(&[0u8; MAX_PAYLOAD_BYTES + 1]).is_none());
    }

    #[test]
    fn handle_prefix_round_trip() {
        let mut buf = [0u8; 32];
        let prefix = HandlePrefix {
            handle: 0x8000_0001,
            rights: PortRights::SEND | PortRights::RECEIVE,
        };
        write_handle_prefix(&mut buf, prefix).unwrap();
        assert_eq!(read_handle_prefix(&buf), Some(prefix));
    }

    #[test]
    fn plain_payload_has_no_prefix() {
        let buf = [0u8; 32];
        assert_eq!(read_handle_prefix(&buf), None);
    }

    #[test]
    fn rights_full_covers_all() {
        assert_eq!(
            PortRights::FULL,
            PortRights::SEND | PortRights::RECEIVE | PortRights::MANAGE
        );
    }
}
