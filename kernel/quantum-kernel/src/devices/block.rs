//! Block device registry and request broker.
//!
//! Devices register with static geometry; a user-mode driver later binds
//! one of its ports, which marks the device ready. Client reads and writes
//! are validated here and forwarded to the driver port as a
//! [`BlockMessage`] with a transient reply port.

use planck_noalloc::vec::ArrayVec;
use quantum_abi::SysError;
use quantum_abi::block::{BlockFlags, BlockInfo, BlockRequest};
use quantum_core::sync::IrqSpinLock;

/// Maximum registered block devices.
pub const MAX_BLOCK_DEVICES: usize = 8;

struct Device {
    info: BlockInfo,
    port_id: u32,
}

/// The block device registry.
pub struct BlockRegistry {
    devices: ArrayVec<Device, MAX_BLOCK_DEVICES>,
    next_id: u32,
}

impl BlockRegistry {
    /// An empty registry; device ids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            devices: ArrayVec::new(),
            next_id: 1,
        }
    }

    /// Registers a device and returns its id.
    pub fn register(
        &mut self,
        kind: u32,
        sector_size: u32,
        sector_count: u32,
        flags: BlockFlags,
    ) -> Result<u32, SysError> {
        if self.devices.is_full() {
            return Err(SysError::ResourceExhausted);
        }
        if sector_size == 0 || sector_count == 0 {
            return Err(SysError::InvalidArgument);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.devices.push(Device {
            info: BlockInfo {
                id,
                kind,
                sector_size,
                sector_count,
                flags: flags.bits(),
            },
            port_id: 0,
        });
        Ok(id)
    }

    /// Removes a device from the registry.
    pub fn unregister(&mut self, id: u32) -> Result<(), SysError> {
        let index = self
            .devices
            .iter()
            .position(|d| d.info.id == id)
            .ok_or(SysError::NotFound)?;
        self.devices.remove(index);
        Ok(())
    }

    fn device(&self, id: u32) -> Result<&Device, SysError> {
        self.devices
            .iter()
            .find(|d| d.info.id == id)
            .ok_or(SysError::NotFound)
    }

    fn device_mut(&mut self, id: u32) -> Result<&mut Device, SysError> {
        self.devices
            .iter_mut()
            .find(|d| d.info.id == id)
            .ok_or(SysError::NotFound)
    }

    /// Number of registered devices.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.devices.len() as u32
    }

    /// Describes a device.
    pub fn info(&self, id: u32) -> Result<BlockInfo, SysError> {
        Ok(self.device(id)?.info)
    }

    /// Binds a driver port and marks the device ready.
    ///
    /// The caller has already checked that it owns `port_id`.
    pub fn bind(&mut self, id: u32, port_id: u32) -> Result<(), SysError> {
        if port_id == 0 {
            return Err(SysError::InvalidArgument);
        }
        let device = self.device_mut(id)?;
        device.port_id = port_id;
        device.info.flags |= BlockFlags::READY.bits();
        Ok(())
    }

    /// The driver port bound to a ready device.
    pub fn driver_port(&self, id: u32) -> Result<u32, SysError> {
        let device = self.device(id)?;
        if device.port_id == 0 {
            return Err(SysError::NotFound);
        }
        Ok(device.port_id)
    }

    /// Validates a client request against a device's geometry.
    pub fn validate(&self, request: &BlockRequest, write: bool) -> Result<BlockInfo, SysError> {
        let device = self.device(request.device_id)?;
        let info = device.info;
        let flags = BlockFlags::from_bits_truncate(info.flags);

        if !flags.contains(BlockFlags::READY) {
            return Err(SysError::NotFound);
        }
        if write && flags.contains(BlockFlags::READ_ONLY) {
            return Err(SysError::PermissionDenied);
        }
        if request.count == 0 || request.buffer == 0 {
            return Err(SysError::InvalidArgument);
        }
        let start = u64::from(request.lba);
        let count = u64::from(request.count);
        let max = u64::from(info.sector_count);
        if start >= max || count > max || start + count > max {
            return Err(SysError::InvalidArgument);
        }
        Ok(info)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global block device registry.
// Lock level: device registry (leaf; taken before any port operation, never
// held across one).
static BLOCK: IrqSpinLock<BlockRegistry> = IrqSpinLock::new(BlockRegistry::new());

/// Runs `f` with the global block registry.
pub fn with_block<R>(f: impl FnOnce(&mut BlockRegistry) -> R) -> R {
    f(&mut BLOCK.lock())
}

/// Registers the boot-time devices (the floppy slot the user-mode driver
/// later binds).
pub fn init() {
    use quantum_abi::block::kind;
    let result = with_block(|registry| {
        registry.register(kind::FLOPPY, 512, 2880, BlockFlags::REMOVABLE)
    });
    match result {
        Ok(id) => crate::kdebug!("block: registered floppy slot id={}", id),
        Err(_) => crate::kwarn!("block: failed to register floppy slot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantum_abi::block::kind;

    fn registry_with_floppy() -> (BlockRegistry, u32) {
        let mut registry = BlockRegistry::new();
        let id = registry
            .register(kind::FLOPPY, 512, 2880, BlockFlags::REMOVABLE)
            .unwrap();
        (registry, id)
    }

    fn request(id: u32, lba: u32, count: u32) -> BlockRequest {
        BlockRequest {
            device_id: id,
            lba,
            count,
            buffer: 0x40_0000,
        }
    }

    #[test]
    fn register_assigns_monotone_ids() {
        let mut registry = BlockRegistry::new();
        let a = registry
            .register(kind::FLOPPY, 512, 2880, BlockFlags::empty())
            .unwrap();
        let b = registry
            .register(kind::DISK, 512, 1 << 20, BlockFlags::empty())
            .unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn unbound_devices_reject_requests() {
        let (registry, id) = registry_with_floppy();
        assert_eq!(
            registry.validate(&request(id, 0, 1), false).unwrap_err(),
            SysError::NotFound
        );
    }

    #[test]
    fn bind_marks_ready_and_requests_pass() {
        let (mut registry, id) = registry_with_floppy();
        registry.bind(id, 7).unwrap();
        assert_eq!(registry.driver_port(id).unwrap(), 7);
        let info = registry.validate(&request(id, 0, 1), false).unwrap();
        assert!(BlockFlags::from_bits_truncate(info.flags).contains(BlockFlags::READY));
    }

    #[test]
    fn bounds_are_enforced() {
        let (mut registry, id) = registry_with_floppy();
        registry.bind(id, 7).unwrap();
        // Zero count, null buffer, and off-the-end ranges all fail.
        assert!(registry.validate(&request(id, 0, 0), false).is_err());
        let mut bad = request(id, 0, 1);
        bad.buffer = 0;
        assert!(registry.validate(&bad, false).is_err());
        assert!(registry.validate(&request(id, 2880, 1), false).is_err());
        assert!(registry.validate(&request(id, 2879, 2), false).is_err());
        assert!(registry.validate(&request(id, 2879, 1), false).is_ok());
    }

    #[test]
    fn read_only_devices_reject_writes() {
        let mut registry = BlockRegistry::new();
        let id = registry
            .register(kind::DISK, 512, 100, BlockFlags::READ_ONLY)
            .unwrap();
        registry.bind(id, 3).unwrap();
        assert!(registry.validate(&request(id, 0, 1), false).is_ok());
        assert_eq!(
            registry.validate(&request(id, 0, 1), true).unwrap_err(),
            SysError::PermissionDenied
        );
    }

    #[test]
    fn unregister_forgets_the_device() {
        let (mut registry, id) = registry_with_floppy();
        registry.unregister(id).unwrap();
        assert_eq!(registry.info(id).unwrap_err(), SysError::NotFound);
        assert_eq!(registry.count(), 0);
    }
}
