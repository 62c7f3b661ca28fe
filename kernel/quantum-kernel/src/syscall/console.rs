//! Console syscalls.

use quantum_abi::SysError;

use super::userptr;

/// Longest single console write.
const MAX_WRITE: u32 = 4096;

pub fn sys_write(buffer: u32, length: u32, newline: bool) -> Result<u32, SysError> {
    if length > MAX_WRITE {
        return Err(SysError::InvalidArgument);
    }
    let bytes = userptr::read_slice(buffer, length)?;
    if newline {
        crate::console::write_line(bytes);
    } else {
        crate::console::write(bytes);
    }
    Ok(0)
}
