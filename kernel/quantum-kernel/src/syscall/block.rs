//! Block-device syscalls.
//!
//! Reads and writes are brokered: the request is validated against the
//! registry, forwarded to the bound driver port with a transient reply
//! port, and the reply copied back to the caller.

use quantum_abi::SysError;
use quantum_abi::block::{
    BlockInfo, BlockMessage, BlockOp, BlockRequest, MESSAGE_DATA_BYTES,
};
use quantum_abi::ipc::MAX_PAYLOAD_BYTES;

use crate::devices::block::with_block;
use crate::ipc::blocking::{self, Wait};
use crate::ipc::with_ports;
use crate::mm::pmm;
use crate::sched;

use super::userptr;

/// ISA DMA ceiling: the controller addresses only the first 16 MiB.
const DMA_MAX_PHYSICAL: u32 = 16 * 1024 * 1024;
/// ISA DMA transfers must not cross a 64 KiB window.
const DMA_BOUNDARY: u32 = 64 * 1024;

pub fn sys_get_count() -> u32 {
    with_block(|registry| registry.count())
}

pub fn sys_get_info(device_id: u32, out_ptr: u32) -> Result<u32, SysError> {
    let info = with_block(|registry| registry.info(device_id))?;
    userptr::write_struct::<BlockInfo>(out_ptr, &info)?;
    Ok(0)
}

pub fn sys_bind(device_id: u32, port_id: u32) -> Result<u32, SysError> {
    // Only the port owner may stand in as the device's driver.
    let caller = sched::current_task_id();
    let owner = with_ports(|ports| ports.owner_of(port_id))?;
    if owner != caller {
        return Err(SysError::PermissionDenied);
    }
    with_block(|registry| registry.bind(device_id, port_id))?;
    crate::kdebug!("block: device {} bound to port {}", device_id, port_id);
    Ok(0)
}

/// Forwards a read (`write == false`) or write request to the driver.
pub fn sys_transfer(request_ptr: u32, write: bool) -> Result<u32, SysError> {
    let request: BlockRequest = userptr::read_struct(request_ptr)?;
    let info = with_block(|registry| registry.validate(&request, write))?;

    let bytes = request
        .count
        .checked_mul(info.sector_size)
        .ok_or(SysError::InvalidArgument)? as usize;
    if bytes > MESSAGE_DATA_BYTES {
        return Err(SysError::InvalidArgument);
    }
    userptr::check_range(request.buffer, bytes as u32, !write)?;

    let driver_port = with_block(|registry| registry.driver_port(request.device_id))?;
    let reply_port = blocking::create_port()?;

    let result = transfer(&request, info.sector_size, write, driver_port, reply_port, bytes);

    // The reply port is transient; tear it down whatever happened.
    let me = sched::current_task_id();
    if let Ok((removed, wake)) = with_ports(|ports| ports.destroy(reply_port, me)) {
        for task in wake.iter() {
            sched::wake(*task);
        }
        drop(removed);
    }

    result
}

fn transfer(
    request: &BlockRequest,
    _sector_size: u32,
    write: bool,
    driver_port: u32,
    reply_port: u32,
    bytes: usize,
) -> Result<u32, SysError> {
    let header = BlockMessage {
        op: if write { BlockOp::Write } else { BlockOp::Read } as u32,
        device_id: request.device_id,
        lba: request.lba,
        count: request.count,
        reply_port_id: reply_port,
        status: 0,
        data_length: if write { bytes as u32 } else { 0 },
    };

    let mut payload = [0u8; MAX_PAYLOAD_BYTES];
    payload[..BlockMessage::HEADER_BYTES].copy_from_slice(&header.to_bytes());
    let mut length = BlockMessage::HEADER_BYTES;
    if write {
        let source = userptr::read_slice(request.buffer, bytes as u32)?;
        payload[length..length + bytes].copy_from_slice(source);
        length += bytes;
    }

    blocking::send_raw(driver_port, &payload[..length], None, Wait::Forever)?;
    let reply = blocking::receive_raw(reply_port, Wait::Forever)?;

    let reply_header =
        BlockMessage::from_bytes(reply.bytes()).ok_or(SysError::InvalidArgument)?;
    if reply_header.status != 0 {
        return Err(SysError::NotFound);
    }
    if !write {
        let data_length = reply_header.data_length as usize;
        if data_length < bytes
            || reply.bytes().len() < BlockMessage::HEADER_BYTES + bytes
        {
            return Err(SysError::InvalidArgument);
        }
        let destination = userptr::write_slice(request.buffer, bytes as u32)?;
        destination.copy_from_slice(
            &reply.bytes()[BlockMessage::HEADER_BYTES..BlockMessage::HEADER_BYTES + bytes],
        );
    }
    Ok(0)
}

/// Allocates an ISA-DMA-safe buffer, maps it user-accessible at its
/// physical (identity) address, and writes that address to `out_ptr`.
pub fn sys_allocate_dma_buffer(size: u32, out_ptr: u32) -> Result<u32, SysError> {
    use quantum_core::addr::{PAGE_SIZE, align_up};

    if size == 0 || size > DMA_BOUNDARY {
        return Err(SysError::InvalidArgument);
    }
    let pages = align_up(size, PAGE_SIZE) / PAGE_SIZE;

    let base = pmm::with_pmm(|pmm| pmm.allocate_contiguous_below(pages, DMA_MAX_PHYSICAL, DMA_BOUNDARY))?;

    let mapped = sched::with_scheduler(|s| {
        s.with_current(|t| {
            let user = t.user.as_mut().ok_or(SysError::PermissionDenied)?;
            for i in 0..pages {
                user.space.map_page_in(
                    base.as_u32() + i * PAGE_SIZE,
                    base.as_u32() + i * PAGE_SIZE,
                    true,
                    true,
                )?;
            }
            Ok(())
        })
        .unwrap_or(Err(SysError::NotFound))
    });

    match mapped {
        Ok(()) => {
            userptr::write_struct(out_ptr, &base.as_u32())?;
            Ok(0)
        }
        Err(error) => {
            pmm::with_pmm(|pmm| {
                for i in 0..pages {
                    pmm.free(quantum_core::addr::PhysAddr::new(
                        base.as_u32() + i * PAGE_SIZE,
                    ));
                }
            });
            Err(error)
        }
    }
}
