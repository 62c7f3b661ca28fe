//! Reference-counted kernel objects.
//!
//! Tasks never see kernel pointers; they hold handles onto objects of the
//! four kinds below. Objects are `Arc`-managed: the last reference runs the
//! variant's cleanup exactly once. The IPC registry keeps the canonical
//! `Arc` for a live port (so a port outlives its handles until the owner
//! destroys it), and the IRQ table caches per-line objects the same way.

pub mod handle;

extern crate alloc;

use alloc::sync::Arc;

pub use handle::{HandleEntry, HandleTable};

/// Kernel object type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectKind {
    /// IPC port.
    Port = 1,
    /// Block device.
    BlockDevice = 2,
    /// Input device.
    InputDevice = 3,
    /// Hardware IRQ line.
    IrqLine = 4,
}

#[derive(Debug)]
enum Payload {
    Port { port_id: u32 },
    BlockDevice { device_id: u32 },
    InputDevice { device_id: u32 },
    IrqLine { irq: u32 },
}

/// A reference-counted kernel object.
#[derive(Debug)]
pub struct KernelObject {
    payload: Payload,
}

impl KernelObject {
    /// Creates a port object.
    pub fn new_port(port_id: u32) -> Arc<Self> {
        Arc::new(Self {
            payload: Payload::Port { port_id },
        })
    }

    /// Creates a block-device object.
    pub fn new_block_device(device_id: u32) -> Arc<Self> {
        Arc::new(Self {
            payload: Payload::BlockDevice { device_id },
        })
    }

    /// Creates an input-device object.
    pub fn new_input_device(device_id: u32) -> Arc<Self> {
        Arc::new(Self {
            payload: Payload::InputDevice { device_id },
        })
    }

    /// Creates an IRQ-line object.
    pub fn new_irq_line(irq: u32) -> Arc<Self> {
        Arc::new(Self {
            payload: Payload::IrqLine { irq },
        })
    }

    /// The object's kind tag.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self.payload {
            Payload::Port { .. } => ObjectKind::Port,
            Payload::BlockDevice { .. } => ObjectKind::BlockDevice,
            Payload::InputDevice { .. } => ObjectKind::InputDevice,
            Payload::IrqLine { .. } => ObjectKind::IrqLine,
        }
    }

    /// The backing port id, for port objects.
    #[must_use]
    pub fn port_id(&self) -> Option<u32> {
        match self.payload {
            Payload::Port { port_id } => Some(port_id),
            _ => None,
        }
    }

    /// The backing device id, for block/input device objects.
    #[must_use]
    pub fn device_id(&self) -> Option<u32> {
        match self.payload {
            Payload::BlockDevice { device_id } | Payload::InputDevice { device_id } => {
                Some(device_id)
            }
            _ => None,
        }
    }

    /// The IRQ line number, for IRQ-line objects.
    #[must_use]
    pub fn irq_line(&self) -> Option<u32> {
        match self.payload {
            Payload::IrqLine { irq } => Some(irq),
            _ => None,
        }
    }
}

impl Drop for KernelObject {
    fn drop(&mut self) {
        // Runs once, when the last handle (and any registry reference) is
        // gone. Port cleanup proper happens in the registry's destroy path;
        // this is the backstop for ids that outlived it.
        match self.payload {
            Payload::Port { port_id } => {
                crate::ipc::port::on_port_object_dropped(port_id);
            }
            Payload::BlockDevice { device_id } | Payload::InputDevice { device_id } => {
                crate::ktrace!("obj: device object {} dropped", device_id);
            }
            Payload::IrqLine { irq } => {
                crate::ktrace!("obj: irq line object {} dropped", irq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_payloads() {
        assert_eq!(KernelObject::new_port(1).kind(), ObjectKind::Port);
        assert_eq!(
            KernelObject::new_block_device(1).kind(),
            ObjectKind::BlockDevice
        );
        assert_eq!(
            KernelObject::new_input_device(1).kind(),
            ObjectKind::InputDevice
        );
        assert_eq!(KernelObject::new_irq_line(0).kind(), ObjectKind::IrqLine);
    }

    #[test]
    fn accessors_are_kind_specific() {
        let port = KernelObject::new_port(9);
        assert_eq!(port.port_id(), Some(9));
        assert_eq!(port.device_id(), None);
        assert_eq!(port.irq_line(), None);

        let irq = KernelObject::new_irq_line(3);
        assert_eq!(irq.irq_line(), Some(3));
        assert_eq!(irq.port_id(), None);
    }
}
