//! IRQ notification message.
//!
//! When a port is bound to a hardware IRQ line, the kernel enqueues a copy of
//! a precomputed template of this message on every interrupt. The sender id
//! is always [`crate::ipc::KERNEL_SENDER`].

/// Number of ISA IRQ lines.
pub const MAX_IRQS: u32 = 16;

/// Operations carried by an IRQ message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IrqOp {
    /// A hardware interrupt fired on `irq`.
    Notify = 1,
}

/// IRQ notification payload, 20 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct IrqMessage {
    /// Operation (always [`IrqOp::Notify`] for kernel-generated messages).
    pub op: u32,
    /// IRQ line that fired.
    pub irq: u32,
    /// Reserved; zero in kernel-generated messages.
    pub port_id: u32,
    /// Reserved; zero in kernel-generated messages.
    pub reply_port_id: u32,
    /// Reserved; zero in kernel-generated messages.
    pub data: u32,
}

impl IrqMessage {
    /// Byte length of the wire encoding.
    pub const WIRE_BYTES: usize = 20;

    /// The notification template for a line.
    #[must_use]
    pub const fn notify(irq: u32) -> Self {
        Self {
            op: IrqOp::Notify as u32,
            irq,
            port_id: 0,
            reply_port_id: 0,
            data: 0,
        }
    }

    /// Encodes the message into little-endian wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::WIRE_BYTES] {
        let mut out = [0u8; Self::WIRE_BYTES];
        for (i, word) in [self.op, self.irq, self.port_id, self.reply_port_id, self.data]
            .into_iter()
            .enumerate()
        {
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
            irq: word(1),
            port_id: word(2),
            reply_port_id: word(3),
            data: word(4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_template_round_trips() {
        let msg = IrqMessage::notify(6);
        let decoded = IrqMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.op, IrqOp::Notify as u32);
        assert_eq!(decoded.irq, 6);
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(IrqMessage::from_bytes(&[0u8; 19]).is_none());
    }
}
