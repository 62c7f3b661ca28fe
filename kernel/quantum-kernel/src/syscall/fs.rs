//! Filesystem broker syscalls.
//!
//! The kernel only relays: `RegisterService` records the service port,
//! everything else is packaged as an [`FsMessage`], sent to the service,
//! and answered on a transient reply port.

use quantum_abi::SysError;
use quantum_abi::fs::{FsMessage, FsOp};
use quantum_abi::syscall::SyscallId;

use crate::fs::with_fs;
use crate::ipc::blocking::{self, Wait};
use crate::ipc::with_ports;
use crate::sched;

pub fn sys_register_service(fs_type: u32, port_id: u32) -> Result<u32, SysError> {
    // The registering task must own the port it advertises.
    let caller = sched::current_task_id();
    let owner = with_ports(|ports| ports.owner_of(port_id))?;
    if owner != caller {
        return Err(SysError::PermissionDenied);
    }
    with_fs(|registry| registry.register(fs_type, port_id))?;
    crate::kdebug!("fs: type {} served by port {}", fs_type, port_id);
    Ok(0)
}

fn op_for(id: SyscallId) -> Option<FsOp> {
    Some(match id {
        SyscallId::FsOpenVolume => FsOp::OpenVolume,
        SyscallId::FsCloseVolume => FsOp::CloseVolume,
        SyscallId::FsListVolumes => FsOp::ListVolumes,
        SyscallId::FsOpenPath => FsOp::OpenPath,
        SyscallId::FsRead => FsOp::Read,
        SyscallId::FsWrite => FsOp::Write,
        _ => None,
    })
}

pub fn sys_forward(id: SyscallId, a1: u32, a2: u32, a3: u32) -> Result<u32, SysError> {
    let op = op_for(id).ok_or(SysError::Unsupported)?;

    // OpenVolume names the filesystem type in its first argument; the
    // remaining calls operate on service-issued ids, so they go to the
    // same (sole) registered service.
    let service_port = match op {
        FsOp::OpenVolume => with_fs(|registry| registry.port_for(a1))?,
        _ => with_fs(|registry| registry.sole_port())?,
    };

    let reply_port = blocking::create_port()?;
    let message = FsMessage {
        op: op as u32,
        args: [a1, a2, a3],
        reply_port_id: reply_port,
        status: 0,
    };

    let result = (|| {
        blocking::send_raw(service_port, &message.to_bytes(), None, Wait::Forever)?;
        let reply = blocking::receive_raw(reply_port, Wait::Forever)?;
        let reply = FsMessage::from_bytes(reply.bytes()).ok_or(SysError::InvalidArgument)?;
        if reply.status != 0 {
            return Err(SysError::NotFound);
        }
        // The first result word rides back to the caller.
        Ok(reply.args[0])
    })();

    let me = sched::current_task_id();
    if let Ok((removed, wake)) = with_ports(|ports| ports.destroy(reply_port, me)) {
        for task in wake.iter() {
            sched::wake(*task);
        }
        drop(removed);
    }

    result
}
