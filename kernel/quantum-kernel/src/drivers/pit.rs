//! 8253/8254 programmable interval timer.
//!
//! Channel 0 drives IRQ0 at a fixed rate; the tick handler advances the
//! scheduler clock and forwards the interrupt to the routing table so a
//! driver port bound to line 0 still gets its notifications.

use crate::arch::x86::instructions::port::Port;
use crate::arch::x86::interrupts::{self, InterruptContext};

const CHANNEL0: Port<u8> = Port::new(0x40);
const COMMAND: Port<u8> = Port::new(0x43);

const BASE_FREQUENCY: u32 = 1_193_182;

/// Scheduler tick rate in Hz.
pub const TICK_HZ: u32 = 100;

/// Programs channel 0 for [`TICK_HZ`] and installs the tick handler on
/// vector 32. The line stays masked until the caller unmasks it.
pub fn init() {
    let divisor = BASE_FREQUENCY / TICK_HZ;
    // SAFETY: Standard PIT mode-3 programming on fixed ISA ports.
    unsafe {
        COMMAND.write(0x36); // channel 0, lobyte/hibyte, square wave
        CHANNEL0.write((divisor & 0xFF) as u8);
        CHANNEL0.write((divisor >> 8) as u8);
    }
    interrupts::set_irq_handler(0, tick);
    crate::kdebug!("pit: channel 0 at {} Hz", TICK_HZ);
}

/// The IRQ0 handler: advance time, deliver any bound-port notification.
/// The actual preemption switch happens in the dispatcher tail, after EOI.
fn tick(_context: &mut InterruptContext) {
    crate::sched::with_scheduler(|sched| {
        sched.tick();
    });
    crate::irq::dispatch(0);
}
