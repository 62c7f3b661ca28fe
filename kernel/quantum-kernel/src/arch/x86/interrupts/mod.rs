//! Interrupt dispatch.
//!
//! Every vector funnels through a thin naked stub (see [`stubs`]) that
//! pushes a synthesized error code where the CPU does not, pushes the
//! vector number, saves a full register snapshot, and calls
//! [`dispatch_interrupt`] with a pointer to the saved
//! [`InterruptContext`]. Registered handlers may mutate the context (the
//! syscall dispatcher writes the return value into `eax`); the stub
//! restores it and `iret`s.

pub mod stubs;

use quantum_core::sync::IrqSpinLock;

use super::pic;

/// Vector of the system-call trap gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Register snapshot saved by the interrupt stubs.
///
/// Field order mirrors the push sequence: segment registers last, so they
/// sit at the lowest addresses.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptContext {
    /// Saved GS.
    pub gs: u32,
    /// Saved FS.
    pub fs: u32,
    /// Saved ES.
    pub es: u32,
    /// Saved DS.
    pub ds: u32,
    /// Saved EDI.
    pub edi: u32,
    /// Saved ESI.
    pub esi: u32,
    /// Saved EBP.
    pub ebp: u32,
    /// ESP value `pusha` recorded (points into this frame; ignored).
    pub esp_dummy: u32,
    /// Saved EBX.
    pub ebx: u32,
    /// Saved EDX (syscall argument 3).
    pub edx: u32,
    /// Saved ECX (syscall argument 2).
    pub ecx: u32,
    /// Saved EAX (syscall id in, return value out).
    pub eax: u32,
    /// Vector number pushed by the stub.
    pub vector: u32,
    /// CPU error code, or 0 when the vector has none.
    pub error_code: u32,
    /// Faulting/resume instruction pointer.
    pub eip: u32,
    /// Code segment at the time of the interrupt.
    pub cs: u32,
    /// Saved EFLAGS.
    pub eflags: u32,
    /// User ESP (present only when arriving from ring 3).
    pub user_esp: u32,
    /// User SS (present only when arriving from ring 3).
    pub user_ss: u32,
}

impl InterruptContext {
    /// True when the interrupt arrived from user mode.
    #[must_use]
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

/// A registered interrupt handler.
pub type InterruptHandler = fn(&mut InterruptContext);

// Lock level: handler table (leaf; dispatch copies the entry out before
// calling it).
static HANDLERS: IrqSpinLock<[Option<InterruptHandler>; 256]> = IrqSpinLock::new([None; 256]);

/// Registers `handler` on `vector`, replacing any previous handler.
pub fn register_handler(vector: u8, handler: InterruptHandler) {
    HANDLERS.lock()[vector as usize] = Some(handler);
}

/// Registers a handler for an ISA IRQ line (vector `32 + irq`).
pub fn set_irq_handler(irq: u8, handler: InterruptHandler) {
    register_handler(pic::MASTER_VECTOR_BASE + irq, handler);
}

fn handler_for(vector: u8) -> Option<InterruptHandler> {
    HANDLERS.lock()[vector as usize]
}

/// Common dispatcher called from the assembly stubs.
///
/// Invokes the registered handler, falls back to the default fault policy,
/// acknowledges the PIC for hardware vectors, and finally gives the
/// scheduler its preemption opportunity.
#[unsafe(no_mangle)]
extern "C" fn dispatch_interrupt(context: *mut InterruptContext) {
    // SAFETY: The stub passes a pointer to the frame it just built on the
    // current kernel stack.
    let context = unsafe { &mut *context };
    let vector = context.vector as u8;
    let is_irq = (pic::MASTER_VECTOR_BASE..pic::MASTER_VECTOR_BASE + 16).contains(&vector);

    match handler_for(vector) {
        Some(handler) => handler(context),
        None if vector < 32 => handle_exception(context),
        None if is_irq => {
            // Spurious IRQ7/IRQ15 are silently acknowledged.
            let irq = vector - pic::MASTER_VECTOR_BASE;
            if irq != 7 && irq != 15 {
                crate::kerror!("int: unhandled IRQ {}", irq);
            }
        }
        None => {
            crate::kerror!("int: unhandled vector {}", vector);
        }
    }

    if is_irq {
        pic::send_eoi(vector - pic::MASTER_VECTOR_BASE);
        // The tick handler may have requested a reschedule; switch only
        // after the handler completed and the PIC was acknowledged.
        crate::sched::preempt_if_needed();
    }
}

/// Default policy for CPU exceptions: dump the context, then kill the
/// offending user task or panic the kernel.
fn handle_exception(context: &mut InterruptContext) {
    let vector = context.vector;
    let name = exception_name(vector as u8);

    if vector == 14 {
        let fault = super::fault_address();
        crate::kerror!(":( PAGE FAULT at {:#010x}", fault);
        crate::kerror!(
            "  err={:#x} {} {} eip={:#010x}",
            context.error_code,
            if context.error_code & 0x2 != 0 { "write" } else { "read" },
            if context.from_user() { "user" } else { "kernel" },
            context.eip,
        );
    } else {
        crate::kerror!(":( {} (vector {})", name, vector);
    }
    dump_context(context);

    if context.from_user() {
        let task = crate::sched::current_task_id();
        crate::kerror!("int: terminating task {} after {}", task, name);
        crate::sched::exit_current();
    }
    panic!("unrecoverable {} in kernel mode", name);
}

fn dump_context(context: &InterruptContext) {
    crate::kerror!(
        "  eax={:#010x} ebx={:#010x} ecx={:#010x} edx={:#010x}",
        context.eax,
        context.ebx,
        context.ecx,
        context.edx,
    );
    crate::kerror!(
        "  esi={:#010x} edi={:#010x} ebp={:#010x} eflags={:#010x}",
        context.esi,
        context.edi,
        context.ebp,
        context.eflags,
    );
    if context.from_user() {
        crate::kerror!(
            "  user esp={:#010x} ss={:#06x} cs={:#06x}",
            context.user_esp,
            context.user_ss,
            context.cs,
        );
    }
}

fn exception_name(vector: u8) -> &'static str {
    match vector {
        0 => "divide error",
        1 => "debug",
        2 => "nmi",
        3 => "breakpoint",
        4 => "overflow",
        5 => "bound range",
        6 => "invalid opcode",
        7 => "device not available",
        8 => "double fault",
        10 => "invalid tss",
        11 => "segment not present",
        12 => "stack segment fault",
        13 => "general protection",
        14 => "page fault",
        16 => "x87 floating point",
        17 => "alignment check",
        18 => "machine check",
        19 => "simd floating point",
        _ => "reserved exception",
    }
}
