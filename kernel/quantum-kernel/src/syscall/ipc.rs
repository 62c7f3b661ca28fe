//! IPC syscalls.

use quantum_abi::SysError;
use quantum_abi::ipc::{Message, PortRights};

use crate::ipc::blocking::{self, Wait};
use crate::obj::ObjectKind;

use super::userptr;

/// Sentinel tick budget meaning "block forever".
pub const WAIT_FOREVER: i64 = -1;
/// Sentinel tick budget meaning "fail instead of blocking".
pub const NO_WAIT: i64 = -2;

fn wait_mode(ticks: i64) -> Wait {
    match ticks {
        WAIT_FOREVER => Wait::Forever,
        NO_WAIT => Wait::NoWait,
        ticks => Wait::Ticks(ticks.clamp(0, i64::from(u32::MAX)) as u32),
    }
}

pub fn sys_create_port() -> u32 {
    blocking::create_port().unwrap_or(0)
}

pub fn sys_open_port(port_id: u32, rights: u32) -> u32 {
    let Some(rights) = PortRights::from_bits(rights) else {
        return 0;
    };
    blocking::open_port(port_id, rights).unwrap_or(0)
}

pub fn sys_send(handle: u32, message_ptr: u32, ticks: i64) -> Result<u32, SysError> {
    let message: Message = userptr::read_struct(message_ptr)?;
    let length = message.length;
    if length == 0 || length as usize > message.payload.len() {
        return Err(SysError::InvalidArgument);
    }
    blocking::send(handle, &message.payload[..length as usize], wait_mode(ticks))?;
    Ok(0)
}

pub fn sys_receive(handle: u32, message_ptr: u32, ticks: i64) -> Result<u32, SysError> {
    // Validate the destination before blocking, so a bad pointer cannot
    // consume a message.
    userptr::check_range(message_ptr, size_of::<Message>() as u32, true)?;
    let message = blocking::receive(handle, wait_mode(ticks))?;
    userptr::write_struct(message_ptr, &message)?;
    Ok(0)
}

pub fn sys_send_handle(port_handle: u32, transfer: u32, rights: u32) -> Result<u32, SysError> {
    let rights = PortRights::from_bits(rights).ok_or(SysError::InvalidArgument)?;
    blocking::send_handle(port_handle, transfer, rights, Wait::Forever)?;
    Ok(0)
}

pub fn sys_destroy_port(handle: u32) -> Result<u32, SysError> {
    blocking::destroy_port(handle)?;
    Ok(0)
}

pub fn sys_close_handle(handle: u32) -> Result<u32, SysError> {
    blocking::close_handle(handle)?;
    Ok(0)
}

pub fn sys_query_handle(handle: u32, type_ptr: u32, rights_ptr: u32) -> Result<u32, SysError> {
    let (kind, rights) = blocking::query_handle(handle)?;
    let kind = match kind {
        ObjectKind::Port => 1u32,
        ObjectKind::BlockDevice => 2,
        ObjectKind::InputDevice => 3,
        ObjectKind::IrqLine => 4,
    };
    userptr::write_struct(type_ptr, &kind)?;
    userptr::write_struct(rights_ptr, &rights)?;
    Ok(0)
}
