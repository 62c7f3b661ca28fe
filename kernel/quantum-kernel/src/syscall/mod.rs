//! System-call dispatch.
//!
//! A single trap gate (vector 0x80) delivers every call: id in EAX, up to
//! three argument words in EBX/ECX/EDX, result back in EAX. Unknown ids
//! return `Unsupported` and never terminate the caller. Handlers run with
//! interrupts enabled on the calling task's kernel stack and validate
//! every user pointer before touching it.

mod block;
mod bundle;
mod console;
mod fs;
mod io;
mod ipc;
mod irq;
mod process;
pub mod userptr;

use quantum_abi::SysError;
use quantum_abi::error;
use quantum_abi::syscall::SyscallId;

use crate::arch::x86::interrupts::{self, InterruptContext, SYSCALL_VECTOR};

/// Installs the syscall handler on vector 0x80.
pub fn init() {
    interrupts::register_handler(SYSCALL_VECTOR, handle);
    crate::kdebug!("syscall: dispatcher installed");
}

fn handle(context: &mut InterruptContext) {
    let id = context.eax;
    let (a1, a2, a3) = (context.ebx, context.ecx, context.edx);
    context.eax = dispatch(id, a1, a2, a3);
}

/// Routes one call. Status calls return 0 or an error code; id-returning
/// calls return the value (0 on failure).
fn dispatch(id: u32, a1: u32, a2: u32, a3: u32) -> u32 {
    let Some(id) = SyscallId::from_raw(id) else {
        return SysError::Unsupported.code();
    };

    match id {
        SyscallId::TaskExit => process::sys_exit(a1),
        SyscallId::TaskYield => process::sys_yield(),
        SyscallId::TaskGrantIoAccess => error::to_wire(process::sys_grant_io_access(a1)),

        SyscallId::ConsoleWrite => error::to_wire(console::sys_write(a1, a2, false)),
        SyscallId::ConsoleWriteLine => error::to_wire(console::sys_write(a1, a2, true)),

        SyscallId::InitBundleGetInfo => error::to_wire(bundle::sys_get_info(a1)),
        SyscallId::InitBundleSpawnTask => bundle::sys_spawn_task(a1),

        SyscallId::IpcCreatePort => ipc::sys_create_port(),
        SyscallId::IpcOpenPort => ipc::sys_open_port(a1, a2),
        SyscallId::IpcSend => error::to_wire(ipc::sys_send(a1, a2, ipc::WAIT_FOREVER)),
        SyscallId::IpcTrySend => error::to_wire(ipc::sys_send(a1, a2, ipc::NO_WAIT)),
        SyscallId::IpcSendTimeout => error::to_wire(ipc::sys_send(a1, a2, a3 as i64)),
        SyscallId::IpcReceive => error::to_wire(ipc::sys_receive(a1, a2, ipc::WAIT_FOREVER)),
        SyscallId::IpcTryReceive => error::to_wire(ipc::sys_receive(a1, a2, ipc::NO_WAIT)),
        SyscallId::IpcReceiveTimeout => {
            error::to_wire(ipc::sys_receive(a1, a2, a3 as i64))
        }
        SyscallId::IpcSendHandle => error::to_wire(ipc::sys_send_handle(a1, a2, a3)),
        SyscallId::IpcDestroyPort => error::to_wire(ipc::sys_destroy_port(a1)),
        SyscallId::IpcCloseHandle | SyscallId::HandleClose => {
            error::to_wire(ipc::sys_close_handle(a1))
        }
        SyscallId::HandleQuery => error::to_wire(ipc::sys_query_handle(a1, a2, a3)),

        SyscallId::IoIn8 => io::sys_in::<u8>(a1),
        SyscallId::IoIn16 => io::sys_in::<u16>(a1),
        SyscallId::IoIn32 => io::sys_in::<u32>(a1),
        SyscallId::IoOut8 => error::to_wire(io::sys_out::<u8>(a1, a2)),
        SyscallId::IoOut16 => error::to_wire(io::sys_out::<u16>(a1, a2)),
        SyscallId::IoOut32 => error::to_wire(io::sys_out::<u32>(a1, a2)),

        SyscallId::BlockGetCount => block::sys_get_count(),
        SyscallId::BlockGetInfo => error::to_wire(block::sys_get_info(a1, a2)),
        SyscallId::BlockRead => error::to_wire(block::sys_transfer(a1, false)),
        SyscallId::BlockWrite => error::to_wire(block::sys_transfer(a1, true)),
        SyscallId::BlockBind => error::to_wire(block::sys_bind(a1, a2)),
        SyscallId::BlockAllocateDmaBuffer => {
            error::to_wire(block::sys_allocate_dma_buffer(a1, a2))
        }

        SyscallId::IrqRegister => error::to_wire(irq::sys_register(a1, a2)),
        SyscallId::IrqUnregister => error::to_wire(irq::sys_unregister(a1)),
        SyscallId::IrqEnable => error::to_wire(irq::sys_enable(a1)),
        SyscallId::IrqDisable => error::to_wire(irq::sys_disable(a1)),

        SyscallId::FsRegisterService => error::to_wire(fs::sys_register_service(a1, a2)),
        SyscallId::FsOpenVolume
        | SyscallId::FsCloseVolume
        | SyscallId::FsListVolumes
        | SyscallId::FsOpenPath
        | SyscallId::FsRead
        | SyscallId::FsWrite => error::to_wire(fs::sys_forward(id, a1, a2, a3)),

        SyscallId::MemoryExpandHeap => process::sys_expand_heap(a1),
    }
}
