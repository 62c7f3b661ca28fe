//! User pointer validation.
//!
//! Syscalls run with the caller's address space active, so user buffers
//! are directly addressable once validated: the range must be non-empty,
//! must not wrap, must sit entirely below the kernel boundary, and every
//! page of it must be mapped user-accessible in the active translation.
//! The kernel never keeps a user pointer across a syscall return.

use quantum_abi::SysError;
use quantum_core::addr::{PAGE_SIZE, align_down};

use crate::mm::paging;

const PAGE_PRESENT: u32 = 1 << 0;
const PAGE_WRITE: u32 = 1 << 1;
const PAGE_USER: u32 = 1 << 2;

/// Checks a user byte range for the given access.
pub fn check_range(ptr: u32, len: u32, write: bool) -> Result<(), SysError> {
    if ptr == 0 || len == 0 {
        return Err(SysError::InvalidArgument);
    }
    let end = ptr.checked_add(len).ok_or(SysError::InvalidArgument)?;
    if end > paging::KERNEL_VIRTUAL_BASE {
        return Err(SysError::InvalidArgument);
    }

    let mut page = align_down(ptr, PAGE_SIZE);
    while page < end {
        let pte = paging::table_entry(page);
        let needed = PAGE_PRESENT | PAGE_USER | if write { PAGE_WRITE } else { 0 };
        if pte & needed != needed {
            return Err(SysError::InvalidArgument);
        }
        page = match page.checked_add(PAGE_SIZE) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(())
}

/// Borrows a validated user slice for the duration of the syscall.
pub fn read_slice<'a>(ptr: u32, len: u32) -> Result<&'a [u8], SysError> {
    check_range(ptr, len, false)?;
    // SAFETY: The range was just validated as mapped and user-readable.
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

/// Borrows a validated mutable user slice for the duration of the syscall.
pub fn write_slice<'a>(ptr: u32, len: u32) -> Result<&'a mut [u8], SysError> {
    check_range(ptr, len, true)?;
    // SAFETY: The range was just validated as mapped and user-writable.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

/// Copies a `T` out of user memory.
pub fn read_struct<T: Copy>(ptr: u32) -> Result<T, SysError> {
    check_range(ptr, size_of::<T>() as u32, false)?;
    if ptr as usize % align_of::<T>() != 0 {
        return Err(SysError::InvalidArgument);
    }
    // SAFETY: Validated, aligned, user-readable range of `size_of::<T>()`.
    Ok(unsafe { (ptr as *const T).read() })
}

/// Copies a `T` into user memory.
pub fn write_struct<T: Copy>(ptr: u32, value: &T) -> Result<(), SysError> {
    check_range(ptr, size_of::<T>() as u32, true)?;
    if ptr as usize % align_of::<T>() != 0 {
        return Err(SysError::InvalidArgument);
    }
    // SAFETY: Validated, aligned, user-writable range of `size_of::<T>()`.
    unsafe { (ptr as *mut T).write(*value) };
    Ok(())
}

/// Copies a NUL-terminated user string (at most `max` bytes, NUL included)
/// into `buffer`, returning the string.
pub fn read_cstr<'a>(ptr: u32, buffer: &'a mut [u8]) -> Result<&'a str, SysError> {
    let max = buffer.len() as u32;
    check_range(ptr, max, false)?;
    // SAFETY: The full window was validated above.
    let source = unsafe { core::slice::from_raw_parts(ptr as *const u8, max as usize) };
    let len = source
        .iter()
        .position(|&b| b == 0)
        .ok_or(SysError::InvalidArgument)?;
    buffer[..len].copy_from_slice(&source[..len]);
    core::str::from_utf8(&buffer[..len]).map_err(|_| SysError::InvalidArgument)
}
