//! Task and user-memory syscalls.

use quantum_abi::SysError;
use quantum_core::addr::{PAGE_SIZE, align_up};

use crate::mm::pmm;
use crate::sched;

pub fn sys_exit(code: u32) -> u32 {
    crate::ktrace!(
        "task {} exit with code {}",
        sched::current_task_id(),
        code
    );
    sched::exit_current();
}

pub fn sys_yield() -> u32 {
    sched::yield_now();
    0
}

/// Marks `task` as allowed to use the I/O port syscalls.
///
/// Coordinator-only; granting an already granted task is a success no-op.
pub fn sys_grant_io_access(task: u32) -> Result<u32, SysError> {
    let is_coordinator =
        sched::with_scheduler(|s| s.with_current(|t| t.coordinator).unwrap_or(false));
    if !is_coordinator {
        return Err(SysError::PermissionDenied);
    }
    sched::with_scheduler(|s| {
        s.with_task(task, |t| t.io_access = true)
            .ok_or(SysError::NotFound)
    })?;
    Ok(0)
}

/// Grows the calling task's user heap by `bytes` (page-rounded) and
/// returns the old break, or 0 on failure.
pub fn sys_expand_heap(bytes: u32) -> u32 {
    if bytes == 0 {
        return 0;
    }
    let length = align_up(bytes, PAGE_SIZE);

    let Some(old_break) = sched::with_scheduler(|s| {
        s.with_current(|t| t.user.as_ref().map(|u| u.heap_break)).flatten()
    }) else {
        return 0;
    };

    if old_break.checked_add(length).is_none()
        || old_break + length > crate::mm::paging::KERNEL_VIRTUAL_BASE
    {
        return 0;
    }

    // Map fresh zeroed frames at the break in the caller's space (which is
    // the active one during a syscall).
    let mapped = sched::with_scheduler(|s| {
        s.with_current(|t| {
            let user = t.user.as_mut().expect("checked above");
            for i in 0..length / PAGE_SIZE {
                let frame = pmm::allocate_frame(true).ok()?;
                user.space
                    .map_page_in(old_break + i * PAGE_SIZE, frame.as_u32(), true, true)
                    .ok()?;
            }
            user.heap_break = old_break + length;
            Some(())
        })
        .flatten()
    });

    match mapped {
        Some(()) => old_break,
        None => 0,
    }
}
