//! Naked interrupt entry stubs.
//!
//! Each stub normalizes the stack to `[error code][vector][iret frame]`
//! and jumps to the shared prologue, which saves the register file, loads
//! the kernel data segments, and calls `dispatch_interrupt` with a pointer
//! to the saved [`super::InterruptContext`].
//!
//! Vectors 8, 10-14, and 17 get a CPU-pushed error code; every other stub
//! pushes a zero so the frame layout is uniform.

use core::arch::naked_asm;

/// The shared save/dispatch/restore tail.
///
/// # Safety
///
/// Jumped to (never called) from a stub that already pushed the error code
/// and vector words.
#[unsafe(naked)]
unsafe extern "C" fn interrupt_common() {
    naked_asm!(
        "pushad",
        "push ds",
        "push es",
        "push fs",
        "push gs",
        "mov ax, 0x10", // kernel data selector
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "push esp",
        "call dispatch_interrupt",
        "add esp, 4",
        "pop gs",
        "pop fs",
        "pop es",
        "pop ds",
        "popad",
        "add esp, 8", // vector + error code
        "iretd",
    );
}

macro_rules! stub_no_error {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push 0",
                concat!("push ", $vector),
                "jmp {common}",
                common = sym interrupt_common,
            );
        }
    };
}

macro_rules! stub_with_error {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                concat!("push ", $vector),
                "jmp {common}",
                common = sym interrupt_common,
            );
        }
    };
}

stub_no_error!(isr0, 0);
stub_no_error!(isr1, 1);
stub_no_error!(isr2, 2);
stub_no_error!(isr3, 3);
stub_no_error!(isr4, 4);
stub_no_error!(isr5, 5);
stub_no_error!(isr6, 6);
stub_no_error!(isr7, 7);
stub_with_error!(isr8, 8);
stub_no_error!(isr9, 9);
stub_with_error!(isr10, 10);
stub_with_error!(isr11, 11);
stub_with_error!(isr12, 12);
stub_with_error!(isr13, 13);
stub_with_error!(isr14, 14);
stub_no_error!(isr15, 15);
stub_no_error!(isr16, 16);
stub_with_error!(isr17, 17);
stub_no_error!(isr18, 18);
stub_no_error!(isr19, 19);
stub_no_error!(isr20, 20);
stub_no_error!(isr21, 21);
stub_no_error!(isr22, 22);
stub_no_error!(isr23, 23);
stub_no_error!(isr24, 24);
stub_no_error!(isr25, 25);
stub_no_error!(isr26, 26);
stub_no_error!(isr27, 27);
stub_no_error!(isr28, 28);
stub_no_error!(isr29, 29);
stub_no_error!(isr30, 30);
stub_no_error!(isr31, 31);

stub_no_error!(irq0, 32);
stub_no_error!(irq1, 33);
stub_no_error!(irq2, 34);
stub_no_error!(irq3, 35);
stub_no_error!(irq4, 36);
stub_no_error!(irq5, 37);
stub_no_error!(irq6, 38);
stub_no_error!(irq7, 39);
stub_no_error!(irq8, 40);
stub_no_error!(irq9, 41);
stub_no_error!(irq10, 42);
stub_no_error!(irq11, 43);
stub_no_error!(irq12, 44);
stub_no_error!(irq13, 45);
stub_no_error!(irq14, 46);
stub_no_error!(irq15, 47);

stub_no_error!(syscall_gate, 0x80);

/// CPU exception stubs, indexed by vector.
pub static EXCEPTION_STUBS: [unsafe extern "C" fn(); 32] = [
    isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12, isr13,
    isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23, isr24, isr25, isr26,
    isr27, isr28, isr29, isr30, isr31,
];

/// Hardware IRQ stubs for vectors 32-47.
pub static IRQ_STUBS: [unsafe extern "C" fn(); 16] = [
    irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
    irq14, irq15,
];

/// The `int 0x80` system-call stub.
pub static SYSCALL_STUB: unsafe extern "C" fn() = syscall_gate;
