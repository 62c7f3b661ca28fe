//! IRQ routing syscalls.

use quantum_abi::SysError;

use crate::irq;

pub fn sys_register(line: u32, port_id: u32) -> Result<u32, SysError> {
    irq::register(line, port_id)?;
    Ok(0)
}

pub fn sys_unregister(line: u32) -> Result<u32, SysError> {
    irq::unregister(line)?;
    Ok(0)
}

pub fn sys_enable(line: u32) -> Result<u32, SysError> {
    irq::enable(line)?;
    Ok(0)
}

pub fn sys_disable(line: u32) -> Result<u32, SysError> {
    irq::disable(line)?;
    Ok(0)
}
