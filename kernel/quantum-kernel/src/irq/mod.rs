//! IRQ-to-port routing.
//!
//! User-mode drivers consume hardware interrupts as messages: registering a
//! port against an ISA IRQ line attaches a precomputed Notify template to
//! the port and unmasks the line. The interrupt handler enqueues the
//! template without blocking; a full queue counts the notification as
//! dropped on the line, and the interrupt is acknowledged either way.

extern crate alloc;

use alloc::sync::Arc;

use quantum_abi::SysError;
use quantum_abi::ipc::KERNEL_SENDER;
use quantum_abi::irq::MAX_IRQS;
use quantum_core::sync::IrqSpinLock;

use crate::ipc::port::IrqNotify;
use crate::ipc::with_ports;
use crate::obj::KernelObject;
use crate::sched;

const LINES: usize = MAX_IRQS as usize;

/// Per-line binding state.
pub struct IrqRouting {
    ports: [u32; LINES],
    objects: [Option<Arc<KernelObject>>; LINES],
    dropped: [u32; LINES],
}

impl IrqRouting {
    /// All lines unbound.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ports: [0; LINES],
            objects: [const { None }; LINES],
            dropped: [0; LINES],
        }
    }

    /// Binds `port_id` to `irq`, replacing any previous binding.
    pub fn bind(&mut self, irq: u32, port_id: u32) -> Result<(), SysError> {
        let line = Self::line(irq)?;
        self.ports[line] = port_id;
        Ok(())
    }

    /// Clears the binding of `irq`.
    pub fn unbind(&mut self, irq: u32) -> Result<(), SysError> {
        let line = Self::line(irq)?;
        self.ports[line] = 0;
        Ok(())
    }

    /// Clears every line bound to `port_id` (port teardown). Returns true
    /// when at least one line was cleared.
    pub fn unbind_port(&mut self, port_id: u32) -> bool {
        let mut any = false;
        for line in self.ports.iter_mut() {
            if *line == port_id && port_id != 0 {
                *line = 0;
                any = true;
            }
        }
        any
    }

    /// The port bound to `irq`, if any.
    #[must_use]
    pub fn port_for(&self, irq: u32) -> Option<u32> {
        let line = Self::line(irq).ok()?;
        match self.ports[line] {
            0 => None,
            id => Some(id),
        }
    }

    /// The cached kernel object for a line, created on first use.
    pub fn line_object(&mut self, irq: u32) -> Result<Arc<KernelObject>, SysError> {
        let line = Self::line(irq)?;
        Ok(self.objects[line]
            .get_or_insert_with(|| KernelObject::new_irq_line(irq))
            .clone())
    }

    /// Counts a dropped notification on `irq`.
    pub fn note_drop(&mut self, irq: u32) {
        if let Ok(line) = Self::line(irq) {
            self.dropped[line] = self.dropped[line].saturating_add(1);
        }
    }

    /// Dropped notifications on `irq` so far.
    #[must_use]
    pub fn dropped(&self, irq: u32) -> u32 {
        Self::line(irq).map(|line| self.dropped[line]).unwrap_or(0)
    }

    fn line(irq: u32) -> Result<usize, SysError> {
        if irq < MAX_IRQS {
            Ok(irq as usize)
        } else {
            Err(SysError::InvalidArgument)
        }
    }
}

impl Default for IrqRouting {
    fn default() -> Self {
        Self::new()
    }
}

/// Global routing table.
// Lock level: IRQ table (leaf beside the port registry; never held across
// a port-registry acquisition).
static ROUTING: IrqSpinLock<IrqRouting> = IrqSpinLock::new(IrqRouting::new());

/// Runs `f` with the global routing table.
pub fn with_routing<R>(f: impl FnOnce(&mut IrqRouting) -> R) -> R {
    f(&mut ROUTING.lock())
}

/// Clears all bindings onto `port_id` and masks the lines involved.
pub fn unbind_port(port_id: u32) {
    let cleared = with_routing(|routing| {
        let mut lines = [false; LINES];
        for irq in 0..MAX_IRQS {
            if routing.port_for(irq) == Some(port_id) {
                lines[irq as usize] = true;
            }
        }
        routing.unbind_port(port_id);
        lines
    });
    #[cfg(target_os = "none")]
    for (irq, was_bound) in cleared.iter().enumerate() {
        if *was_bound {
            crate::arch::x86::pic::mask(irq as u8);
        }
    }
    #[cfg(not(target_os = "none"))]
    let _ = cleared;
}

/// Delivers an interrupt on `irq` to its bound port, waking at most one
/// receiver. Never blocks; full queues are counted as drops.
pub fn dispatch(irq: u32) {
    let Some(port_id) = with_routing(|routing| routing.port_for(irq)) else {
        return;
    };
    let outcome = with_ports(|ports| ports.notify_irq(port_id, KERNEL_SENDER));
    match outcome {
        IrqNotify::Delivered(Some(task)) => sched::wake(task),
        IrqNotify::Delivered(None) => {}
        IrqNotify::Dropped => with_routing(|routing| routing.note_drop(irq)),
        IrqNotify::Unbound => {}
    }
}

// ── Registration (kernel builds only) ────────────────────────────────────

/// Binds `port_id` to `irq` and unmasks the line.
///
/// The caller must own the port or carry the coordinator bit.
#[cfg(target_os = "none")]
pub fn register(irq: u32, port_id: u32) -> Result<(), SysError> {
    if irq >= MAX_IRQS || port_id == 0 {
        return Err(SysError::InvalidArgument);
    }

    // The port owner (who holds Manage by construction) or the coordinator
    // may route a line.
    let caller = sched::current_task_id();
    let owner = with_ports(|ports| ports.owner_of(port_id))?;
    let is_coordinator =
        sched::with_scheduler(|s| s.with_current(|t| t.coordinator).unwrap_or(false));
    if owner != caller && !is_coordinator {
        return Err(SysError::PermissionDenied);
    }

    let template = quantum_abi::irq::IrqMessage::notify(irq).to_bytes();
    with_ports(|ports| ports.set_irq_template(port_id, &template))?;
    with_routing(|routing| routing.bind(irq, port_id))?;

    // Vector 32 belongs to the timer handler, which forwards to the
    // routing table itself; every other line gets the common entry.
    if irq != 0 {
        crate::arch::x86::interrupts::set_irq_handler(irq as u8, irq_entry);
    }
    crate::arch::x86::pic::unmask(irq as u8);
    crate::kdebug!("irq: line {} routed to port {}", irq, port_id);
    Ok(())
}

/// Masks `irq` and clears its binding.
#[cfg(target_os = "none")]
pub fn unregister(irq: u32) -> Result<(), SysError> {
    if irq >= MAX_IRQS {
        return Err(SysError::InvalidArgument);
    }
    crate::arch::x86::pic::mask(irq as u8);
    let port = with_routing(|routing| {
        let port = routing.port_for(irq);
        let _ = routing.unbind(irq);
        port
    });
    if let Some(port_id) = port {
        with_ports(|ports| ports.clear_irq_template(port_id));
    }
    Ok(())
}

/// Unmasks `irq`.
#[cfg(target_os = "none")]
pub fn enable(irq: u32) -> Result<(), SysError> {
    if irq >= MAX_IRQS {
        return Err(SysError::InvalidArgument);
    }
    crate::arch::x86::pic::unmask(irq as u8);
    Ok(())
}

/// Masks `irq`.
#[cfg(target_os = "none")]
pub fn disable(irq: u32) -> Result<(), SysError> {
    if irq >= MAX_IRQS {
        return Err(SysError::InvalidArgument);
    }
    crate::arch::x86::pic::mask(irq as u8);
    Ok(())
}

/// Common handler installed on vectors 32..48 for routed lines.
#[cfg(target_os = "none")]
fn irq_entry(context: &mut crate::arch::x86::interrupts::InterruptContext) {
    let vector = context.vector;
    if (32..32 + MAX_IRQS).contains(&vector) {
        dispatch(vector - 32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_replaces_and_unbind_clears() {
        let mut routing = IrqRouting::new();
        routing.bind(3, 7).unwrap();
        assert_eq!(routing.port_for(3), Some(7));
        routing.bind(3, 9).unwrap();
        assert_eq!(routing.port_for(3), Some(9));
        routing.unbind(3).unwrap();
        assert_eq!(routing.port_for(3), None);
    }

    #[test]
    fn out_of_range_lines_are_rejected() {
        let mut routing = IrqRouting::new();
        assert_eq!(
            routing.bind(MAX_IRQS, 1).unwrap_err(),
            SysError::InvalidArgument
        );
        assert_eq!(routing.port_for(MAX_IRQS), None);
    }

    #[test]
    fn unbind_port_sweeps_every_line() {
        let mut routing = IrqRouting::new();
        routing.bind(1, 5).unwrap();
        routing.bind(6, 5).unwrap();
        routing.bind(2, 8).unwrap();
        assert!(routing.unbind_port(5));
        assert_eq!(routing.port_for(1), None);
        assert_eq!(routing.port_for(6), None);
        assert_eq!(routing.port_for(2), Some(8));
    }

    #[test]
    fn line_objects_are_cached() {
        let mut routing = IrqRouting::new();
        let a = routing.line_object(4).unwrap();
        let b = routing.line_object(4).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.irq_line(), Some(4));
    }

    #[test]
    fn drop_counter_accumulates() {
        let mut routing = IrqRouting::new();
        assert_eq!(routing.dropped(0), 0);
        routing.note_drop(0);
        routing.note_drop(0);
        assert_eq!(routing.dropped(0), 2);
    }
}
