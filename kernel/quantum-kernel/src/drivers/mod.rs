//! In-kernel drivers.
//!
//! Only what the kernel itself needs: the serial port behind the logger
//! and the PIT that drives the scheduler tick. Everything else (floppy,
//! keyboard, filesystems) is user-mode.

pub mod pit;
pub mod uart16550;
