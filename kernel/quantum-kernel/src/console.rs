//! Console output broker.
//!
//! The text console itself (VGA) lives outside the kernel core; whoever
//! owns it registers a backend here. Until then, console writes fall back
//! to the serial port so early user output is never lost.

extern crate alloc;

use alloc::boxed::Box;

use quantum_core::sync::SpinLock;

use crate::drivers::uart16550::{COM1, Uart16550};

/// A console output backend.
pub trait ConsoleBackend: Send + Sync {
    /// Writes raw bytes to the console.
    fn write_bytes(&self, bytes: &[u8]);
}

static BACKEND: SpinLock<Option<Box<dyn ConsoleBackend>>> = SpinLock::new(None);

/// Installs the console backend (replaces any previous one).
pub fn set_backend(backend: Box<dyn ConsoleBackend>) {
    *BACKEND.lock() = Some(backend);
}

/// Writes bytes to the console (or the serial fallback).
pub fn write(bytes: &[u8]) {
    let backend = BACKEND.lock();
    match backend.as_ref() {
        Some(backend) => backend.write_bytes(bytes),
        None => {
            let uart = Uart16550::new(COM1);
            for &byte in bytes {
                if byte == b'\n' {
                    uart.write_byte(b'\r');
                }
                uart.write_byte(byte);
            }
        }
    }
}

/// Writes bytes followed by a newline.
pub fn write_line(bytes: &[u8]) {
    write(bytes);
    write(b"\n");
}
