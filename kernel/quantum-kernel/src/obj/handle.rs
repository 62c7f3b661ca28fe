//! Per-task handle table.
//!
//! A handle is the only way user code names a kernel object: a tagged
//! one-based index (see [`quantum_abi::handle`]) into this fixed-capacity
//! table, carrying a rights mask fixed at creation. Resolution checks the
//! stored handle value, the expected type, and that the rights mask is a
//! superset of what the operation requires.

extern crate alloc;

use alloc::sync::Arc;

use quantum_abi::handle::{self, Handle};
use quantum_abi::SysError;

use super::{KernelObject, ObjectKind};

/// Maximum number of handles per task.
pub const MAX_HANDLES: usize = 64;

/// One occupied handle-table slot.
#[derive(Debug, Clone)]
pub struct HandleEntry {
    /// Object type at creation time.
    pub kind: ObjectKind,
    /// Rights mask attached at creation.
    pub rights: u32,
    /// The referenced object.
    pub object: Arc<KernelObject>,
    /// The handle value handed to the task.
    pub handle: Handle,
}

/// Fixed-capacity per-task handle table.
pub struct HandleTable {
    entries: [Option<HandleEntry>; MAX_HANDLES],
}

impl HandleTable {
    /// An empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [const { None }; MAX_HANDLES],
        }
    }

    fn entry(&self, raw: Handle) -> Result<&HandleEntry, SysError> {
        let index = handle::unpack(raw).ok_or(SysError::InvalidArgument)? as usize;
        let entry = self
            .entries
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(SysError::NotFound)?;
        if entry.handle != raw {
            return Err(SysError::NotFound);
        }
        Ok(entry)
    }

    /// Installs `object` and returns the new handle.
    pub fn create(
        &mut self,
        kind: ObjectKind,
        object: Arc<KernelObject>,
        rights: u32,
    ) -> Result<Handle, SysError> {
        let slot = self
            .entries
            .iter()
            .position(Option::is_none)
            .ok_or(SysError::ResourceExhausted)?;
        let value = handle::pack(slot as u32);
        self.entries[slot] = Some(HandleEntry {
            kind,
            rights,
            object,
            handle: value,
        });
        Ok(value)
    }

    /// Closes a handle, dropping the table's reference to the object.
    pub fn close(&mut self, raw: Handle) -> Result<(), SysError> {
        let index = handle::unpack(raw).ok_or(SysError::InvalidArgument)? as usize;
        let slot = self.entries.get_mut(index).ok_or(SysError::NotFound)?;
        match slot {
            Some(entry) if entry.handle == raw => {
                *slot = None;
                Ok(())
            }
            _ => Err(SysError::NotFound),
        }
    }

    /// Duplicates a handle with `rights` (must be a subset of the original;
    /// 0 keeps the original mask).
    pub fn duplicate(&mut self, raw: Handle, rights: u32) -> Result<Handle, SysError> {
        let entry = self.entry(raw)?;
        let rights = if rights == 0 { entry.rights } else { rights };
        if rights & !entry.rights != 0 {
            return Err(SysError::PermissionDenied);
        }
        let kind = entry.kind;
        let object = entry.object.clone();
        self.create(kind, object, rights)
    }

    /// Reports a handle's type and rights without consuming it.
    pub fn query(&self, raw: Handle) -> Result<(ObjectKind, u32), SysError> {
        let entry = self.entry(raw)?;
        Ok((entry.kind, entry.rights))
    }

    /// Resolves a handle to its object, checking type and required rights.
    pub fn resolve(
        &self,
        raw: Handle,
        expected: ObjectKind,
        required_rights: u32,
    ) -> Result<&Arc<KernelObject>, SysError> {
        let entry = self.entry(raw)?;
        if entry.kind != expected {
            return Err(SysError::NotFound);
        }
        if entry.rights & required_rights != required_rights {
            return Err(SysError::PermissionDenied);
        }
        Ok(&entry.object)
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// True when no handle is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Drops every entry (task teardown).
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantum_abi::ipc::PortRights;

    fn table_with_port() -> (HandleTable, Handle, Arc<KernelObject>) {
        let mut table = HandleTable::new();
        let object = KernelObject::new_port(1);
        let handle = table
            .create(ObjectKind::Port, object.clone(), PortRights::FULL.bits())
            .unwrap();
        (table, handle, object)
    }

    #[test]
    fn create_resolve_round_trip() {
        let (table, handle, object) = table_with_port();
        let resolved = table
            .resolve(handle, ObjectKind::Port, PortRights::SEND.bits())
            .unwrap();
        assert!(Arc::ptr_eq(resolved, &object));
    }

    #[test]
    fn raw_ids_do_not_resolve() {
        let (table, _, _) = table_with_port();
        // A bare port id has no tag bit: InvalidArgument, not NotFound.
        assert_eq!(
            table.resolve(1, ObjectKind::Port, 0).unwrap_err(),
            SysError::InvalidArgument
        );
    }

    #[test]
    fn extra_rights_are_rejected() {
        let mut table = HandleTable::new();
        let object = KernelObject::new_port(1);
        let handle = table
            .create(ObjectKind::Port, object, PortRights::SEND.bits())
            .unwrap();
        assert_eq!(
            table
                .resolve(handle, ObjectKind::Port, PortRights::FULL.bits())
                .unwrap_err(),
            SysError::PermissionDenied
        );
    }

    #[test]
    fn type_mismatch_is_not_found() {
        let (table, handle, _) = table_with_port();
        assert_eq!(
            table.resolve(handle, ObjectKind::BlockDevice, 0).unwrap_err(),
            SysError::NotFound
        );
    }

    #[test]
    fn close_twice_fails_the_second_time() {
        let (mut table, handle, _) = table_with_port();
        assert!(table.close(handle).is_ok());
        assert_eq!(table.close(handle).unwrap_err(), SysError::NotFound);
    }

    #[test]
    fn closing_one_handle_keeps_the_object_alive_for_others() {
        let (mut table, handle, object) = table_with_port();
        let dup = table.duplicate(handle, 0).unwrap();
        table.close(handle).unwrap();
        let resolved = table.resolve(dup, ObjectKind::Port, 0).unwrap();
        assert!(Arc::ptr_eq(resolved, &object));
    }

    #[test]
    fn duplicate_narrows_but_never_grows_rights() {
        let mut table = HandleTable::new();
        let object = KernelObject::new_port(1);
        let handle = table
            .create(
                ObjectKind::Port,
                object,
                (PortRights::SEND | PortRights::RECEIVE).bits(),
            )
            .unwrap();

        let narrowed = table.duplicate(handle, PortRights::SEND.bits()).unwrap();
        assert_eq!(
            table.query(narrowed).unwrap().1,
            PortRights::SEND.bits()
        );

        assert_eq!(
            table
                .duplicate(narrowed, PortRights::RECEIVE.bits())
                .unwrap_err(),
            SysError::PermissionDenied
        );
    }

    #[test]
    fn table_fills_at_capacity() {
        let mut table = HandleTable::new();
        for _ in 0..MAX_HANDLES {
            table
                .create(ObjectKind::Port, KernelObject::new_port(1), 0)
                .unwrap();
        }
        assert_eq!(
            table
                .create(ObjectKind::Port, KernelObject::new_port(1), 0)
                .unwrap_err(),
            SysError::ResourceExhausted
        );
    }

    #[test]
    fn slot_reuse_after_close() {
        let (mut table, handle, _) = table_with_port();
        table.close(handle).unwrap();
        let again = table
            .create(ObjectKind::Port, KernelObject::new_port(2), 0)
            .unwrap();
        // The index is reused; the value matches the fresh entry.
        assert_eq!(again, handle);
        assert!(table.query(again).is_ok());
    }
}
