//! Filesystem service broker.
//!
//! No VFS lives in the kernel. User-mode filesystem services register a
//! port per filesystem type; every other FileSystem syscall resolves that
//! port and forwards the call (see `syscall::fs`).

use planck_noalloc::vec::ArrayVec;
use quantum_abi::SysError;
use quantum_core::sync::SpinLock;

/// Maximum registered filesystem services.
pub const MAX_FS_SERVICES: usize = 4;

/// Registration table mapping filesystem type to service port.
pub struct FsRegistry {
    services: ArrayVec<(u32, u32), MAX_FS_SERVICES>,
}

impl FsRegistry {
    /// An empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            services: ArrayVec::new(),
        }
    }

    /// Registers (or replaces) the service port for `fs_type`.
    pub fn register(&mut self, fs_type: u32, port_id: u32) -> Result<(), SysError> {
        if fs_type == 0 || port_id == 0 {
            return Err(SysError::InvalidArgument);
        }
        for entry in self.services.iter_mut() {
            if entry.0 == fs_type {
                entry.1 = port_id;
                return Ok(());
            }
        }
        if self.services.is_full() {
            return Err(SysError::ResourceExhausted);
        }
        self.services.push((fs_type, port_id));
        Ok(())
    }

    /// The service port registered for `fs_type`.
    pub fn port_for(&self, fs_type: u32) -> Result<u32, SysError> {
        self.services
            .iter()
            .find(|(t, _)| *t == fs_type)
            .map(|(_, p)| *p)
            .ok_or(SysError::NotFound)
    }

    /// The single registered service's port; calls that carry a
    /// service-issued id instead of a filesystem type route here.
    pub fn sole_port(&self) -> Result<u32, SysError> {
        match self.services.len() {
            0 => Err(SysError::NotFound),
            _ => Ok(self.services[0].1),
        }
    }

    /// Drops any registration pointing at `port_id` (service teardown).
    pub fn forget_port(&mut self, port_id: u32) {
        let mut i = 0;
        while i < self.services.len() {
            if self.services[i].1 == port_id {
                self.services.remove(i);
            } else {
                i += 1;
            }
        }
    }
}

impl Default for FsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global filesystem service registry.
static FS: SpinLock<FsRegistry> = SpinLock::new(FsRegistry::new());

/// Runs `f` with the global registry.
pub fn with_fs<R>(f: impl FnOnce(&mut FsRegistry) -> R) -> R {
    f(&mut FS.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantum_abi::fs::fs_type;

    #[test]
    fn register_and_resolve() {
        let mut registry = FsRegistry::new();
        registry.register(fs_type::FAT12, 5).unwrap();
        assert_eq!(registry.port_for(fs_type::FAT12).unwrap(), 5);
        assert_eq!(registry.port_for(99).unwrap_err(), SysError::NotFound);
    }

    #[test]
    fn reregistration_replaces_the_port() {
        let mut registry = FsRegistry::new();
        registry.register(fs_type::FAT12, 5).unwrap();
        registry.register(fs_type::FAT12, 9).unwrap();
        assert_eq!(registry.port_for(fs_type::FAT12).unwrap(), 9);
    }

    #[test]
    fn zero_ids_are_rejected() {
        let mut registry = FsRegistry::new();
        assert!(registry.register(0, 5).is_err());
        assert!(registry.register(fs_type::FAT12, 0).is_err());
    }

    #[test]
    fn forget_port_clears_registrations() {
        let mut registry = FsRegistry::new();
        registry.register(fs_type::FAT12, 5).unwrap();
        registry.forget_port(5);
        assert!(registry.port_for(fs_type::FAT12).is_err());
    }
}
