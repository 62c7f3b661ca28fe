//! Input device registry.
//!
//! Input hardware (the PS/2 keyboard) is driven entirely from user space;
//! the kernel only tracks registered devices so they can be named through
//! handles and routed via the reserved Input port.

use planck_noalloc::vec::ArrayVec;
use quantum_abi::SysError;
use quantum_core::sync::SpinLock;

/// Maximum registered input devices.
pub const MAX_INPUT_DEVICES: usize = 4;

/// The input device registry.
pub struct InputRegistry {
    ids: ArrayVec<u32, MAX_INPUT_DEVICES>,
    next_id: u32,
}

impl InputRegistry {
    /// An empty registry; device ids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ids: ArrayVec::new(),
            next_id: 1,
        }
    }

    /// Registers a device and returns its id.
    pub fn register(&mut self) -> Result<u32, SysError> {
        if self.ids.is_full() {
            return Err(SysError::ResourceExhausted);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.push(id);
        Ok(id)
    }

    /// True when `id` names a registered device.
    #[must_use]
    pub fn exists(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    /// Number of registered devices.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.ids.len() as u32
    }
}

impl Default for InputRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global input device registry.
static INPUT: SpinLock<InputRegistry> = SpinLock::new(InputRegistry::new());

/// Runs `f` with the global input registry.
pub fn with_input<R>(f: impl FnOnce(&mut InputRegistry) -> R) -> R {
    f(&mut INPUT.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut registry = InputRegistry::new();
        let id = registry.register().unwrap();
        assert!(registry.exists(id));
        assert!(!registry.exists(id + 1));
        assert_eq!(registry.count(), 1);
    }
}
