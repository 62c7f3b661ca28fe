//! Init-bundle syscalls.

use quantum_abi::SysError;
use quantum_abi::bundle::NAME_BYTES;

use crate::boot::bundle;

use super::userptr;

/// User-visible bundle info: mapping base and size.
#[derive(Clone, Copy)]
#[repr(C)]
struct BundleInfo {
    base: u32,
    size: u32,
}

pub fn sys_get_info(out_ptr: u32) -> Result<u32, SysError> {
    let (base, size) = bundle::user_info().ok_or(SysError::NotFound)?;
    userptr::write_struct(out_ptr, &BundleInfo { base, size })?;
    Ok(0)
}

/// Spawns a task from a bundle entry; returns its id, or 0 on failure.
pub fn sys_spawn_task(name_ptr: u32) -> u32 {
    let mut buffer = [0u8; NAME_BYTES];
    let Ok(name) = userptr::read_cstr(name_ptr, &mut buffer) else {
        return 0;
    };
    bundle::spawn_task(name).unwrap_or(0)
}
