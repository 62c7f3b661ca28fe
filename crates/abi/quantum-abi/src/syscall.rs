//! System-call identifiers and the user-side invocation stub.
//!
//! A single software interrupt (vector 0x80) delivers every call: the
//! identifier travels in EAX, up to three argument words in EBX/ECX/EDX, and
//! the result comes back in EAX. The identifier space is grouped by
//! subsystem (Task = 1xx, Console = 2xx, ...).
//!
//! Return conventions are per-call: status calls return [`crate::error::OK`]
//! or an error code; id-returning calls (`IpcCreatePort`, `InitBundleSpawnTask`,
//! `MemoryExpandHeap`, ...) return the value on success and `0` on failure.

/// Software interrupt vector used for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// System-call identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallId {
    /// Terminate the calling task.
    TaskExit = 100,
    /// Yield the CPU cooperatively.
    TaskYield = 101,
    /// Grant a task access to the I/O port syscalls (coordinator only).
    TaskGrantIoAccess = 102,

    /// Write bytes to the console.
    ConsoleWrite = 200,
    /// Write bytes to the console followed by a newline.
    ConsoleWriteLine = 201,

    /// Retrieve the INIT.BND user-space mapping.
    InitBundleGetInfo = 300,
    /// Spawn a user task from an INIT.BND entry by name.
    InitBundleSpawnTask = 301,

    /// Create a new port owned by the caller.
    IpcCreatePort = 400,
    /// Send a message (blocking when the queue is full).
    IpcSend = 401,
    /// Receive a message (blocking when the queue is empty).
    IpcReceive = 402,
    /// Open a handle onto an existing port by id.
    IpcOpenPort = 403,
    /// Receive without blocking.
    IpcTryReceive = 404,
    /// Receive with a tick budget.
    IpcReceiveTimeout = 405,
    /// Transfer a handle through a port.
    IpcSendHandle = 406,
    /// Destroy a port (owner only).
    IpcDestroyPort = 407,
    /// Close a handle.
    IpcCloseHandle = 408,
    /// Send without blocking.
    IpcTrySend = 409,
    /// Send with a tick budget.
    IpcSendTimeout = 410,

    /// Read a byte from an I/O port.
    IoIn8 = 500,
    /// Read a word from an I/O port.
    IoIn16 = 501,
    /// Read a dword from an I/O port.
    IoIn32 = 502,
    /// Write a byte to an I/O port.
    IoOut8 = 503,
    /// Write a word to an I/O port.
    IoOut16 = 504,
    /// Write a dword to an I/O port.
    IoOut32 = 505,

    /// Number of registered block devices.
    BlockGetCount = 600,
    /// Describe a block device.
    BlockGetInfo = 601,
    /// Read sectors.
    BlockRead = 602,
    /// Write sectors.
    BlockWrite = 603,
    /// Bind a driver port to a device.
    BlockBind = 604,
    /// Allocate an ISA-DMA-safe buffer.
    BlockAllocateDmaBuffer = 605,

    /// Bind a port to a hardware IRQ line.
    IrqRegister = 700,
    /// Clear an IRQ binding.
    IrqUnregister = 701,
    /// Unmask an IRQ line.
    IrqEnable = 702,
    /// Mask an IRQ line.
    IrqDisable = 703,

    /// Register a filesystem service port.
    FsRegisterService = 800,
    /// Open a volume through the registered service.
    FsOpenVolume = 801,
    /// Close a volume.
    FsCloseVolume = 802,
    /// Enumerate volumes.
    FsListVolumes = 803,
    /// Open a path on a volume.
    FsOpenPath = 804,
    /// Read from an open file.
    FsRead = 805,
    /// Write to an open file.
    FsWrite = 806,

    /// Grow the calling task's user heap; returns the old break.
    MemoryExpandHeap = 900,

    /// Query a handle's type and rights.
    HandleQuery = 1000,
    /// Close a handle (alias of `IpcCloseHandle` for non-port objects).
    HandleClose = 1001,
}

impl SyscallId {
    /// Decodes a raw identifier word; unknown values yield `None`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            100 => Self::TaskExit,
            101 => Self::TaskYield,
            102 => Self::TaskGrantIoAccess,
            200 => Self::ConsoleWrite,
            201 => Self::ConsoleWriteLine,
            300 => Self::InitBundleGetInfo,
            301 => Self::InitBundleSpawnTask,
            400 => Self::IpcCreatePort,
            401 => Self::IpcSend,
            402 => Self::IpcReceive,
            403 => Self::IpcOpenPort,
            404 => Self::IpcTryReceive,
            405 => Self::IpcReceiveTimeout,
            406 => Self::IpcSendHandle,
            407 => Self::IpcDestroyPort,
            408 => Self::IpcCloseHandle,
            409 => Self::IpcTrySend,
            410 => Self::IpcSendTimeout,
            500 => Self::IoIn8,
            501 => Self::IoIn16,
            502 => Self::IoIn32,
            503 => Self::IoOut8,
            504 => Self::IoOut16,
            505 => Self::IoOut32,
            600 => Self::BlockGetCount,
            601 => Self::BlockGetInfo,
            602 => Self::BlockRead,
            603 => Self::BlockWrite,
            604 => Self::BlockBind,
            605 => Self::BlockAllocateDmaBuffer,
            700 => Self::IrqRegister,
            701 => Self::IrqUnregister,
            702 => Self::IrqEnable,
            703 => Self::IrqDisable,
            800 => Self::FsRegisterService,
            801 => Self::FsOpenVolume,
            802 => Self::FsCloseVolume,
            803 => Self::FsListVolumes,
            804 => Self::FsOpenPath,
            805 => Self::FsRead,
            806 => Self::FsWrite,
            900 => Self::MemoryExpandHeap,
            1000 => Self::HandleQuery,
            1001 => Self::HandleClose,
            _ => return None,
        })
    }
}

/// Invokes a system call via `int 0x80`.
///
/// # Safety
///
/// The argument words must satisfy the contract of `id`: pointers must
/// reference live, correctly sized memory in the caller's address space.
#[cfg(all(target_arch = "x86", not(feature = "kernel")))]
#[inline]
pub unsafe fn invoke(id: SyscallId, arg1: u32, arg2: u32, arg3: u32) -> u32 {
    let result: u32;
    // SAFETY: Caller upholds the per-call pointer contracts.
    unsafe {
        core::arch::asm!(
            "int 0x80",
            inlateout("eax") id as u32 => result,
            in("ebx") arg1,
            in("ecx") arg2,
            in("edx") arg3,
            options(nostack),
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        for id in [
            SyscallId::TaskExit,
            SyscallId::ConsoleWrite,
            SyscallId::IpcSendHandle,
            SyscallId::BlockAllocateDmaBuffer,
            SyscallId::IrqRegister,
            SyscallId::FsWrite,
            SyscallId::MemoryExpandHeap,
            SyscallId::HandleClose,
        ] {
            assert_eq!(SyscallId::from_raw(id as u32), Some(id));
        }
    }

    #[test]
    fn unknown_ids_do_not_decode() {
        assert_eq!(SyscallId::from_raw(0), None);
        assert_eq!(SyscallId::from_raw(199), None);
        assert_eq!(SyscallId::from_raw(411), None);
        assert_eq!(SyscallId::from_raw(u32::MAX), None);
    }
}
