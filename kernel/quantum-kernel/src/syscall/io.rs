//! Raw port I/O syscalls.
//!
//! Available only to the coordinator and tasks it granted I/O access; the
//! actual instruction runs in ring 0 on the caller's behalf.

use quantum_abi::SysError;

use crate::arch::x86::instructions::port::{Port, PortRead, PortWrite};
use crate::sched;

fn check_io_access() -> Result<(), SysError> {
    let allowed = sched::with_scheduler(|s| {
        s.with_current(|t| t.io_access || t.coordinator)
            .unwrap_or(false)
    });
    if allowed {
        Ok(())
    } else {
        Err(SysError::PermissionDenied)
    }
}

pub fn sys_in<T: PortRead + PortWrite + Into<u32>>(port: u32) -> u32 {
    if check_io_access().is_err() || port > 0xFFFF {
        return 0;
    }
    // SAFETY: The caller was granted I/O access; reads are its own risk.
    let value = unsafe { Port::<T>::new(port as u16).read() };
    value.into()
}

pub fn sys_out<T: PortRead + PortWrite + TryFrom<u32>>(
    port: u32,
    value: u32,
) -> Result<u32, SysError> {
    check_io_access()?;
    if port > 0xFFFF {
        return Err(SysError::InvalidArgument);
    }
    let value = T::try_from(value).map_err(|_| SysError::InvalidArgument)?;
    // SAFETY: The caller was granted I/O access; writes are its own risk.
    unsafe { Port::<T>::new(port as u16).write(value) };
    Ok(0)
}
