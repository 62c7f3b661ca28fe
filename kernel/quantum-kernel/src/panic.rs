//! Kernel panic handler.
//!
//! The kernel never unwinds: a panic logs the location and message, then
//! parks the CPU with interrupts disabled.

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    crate::kerror!(":( PANIC");
    if let Some(location) = info.location() {
        crate::kerror!("{}:{}", location.file(), location.line());
    }
    crate::kerror!("{}", info.message());
    crate::arch::x86::halt_forever();
}
