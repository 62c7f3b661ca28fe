//! Global descriptor table and task state segment.
//!
//! Flat 4 GiB segments for ring 0 and ring 3 plus one TSS. The TSS exists
//! only for the ring3 → ring0 stack switch: `esp0` is rewritten to the
//! dispatched task's kernel stack top on every context switch.

use super::StaticCell;

/// Kernel code segment selector.
pub const KERNEL_CODE: u16 = 0x08;
/// Kernel data segment selector.
pub const KERNEL_DATA: u16 = 0x10;
/// User code segment selector (RPL 3).
pub const USER_CODE: u16 = 0x18 | 3;
/// User data segment selector (RPL 3).
pub const USER_DATA: u16 = 0x20 | 3;
/// TSS selector.
pub const TSS_SELECTOR: u16 = 0x28;

/// 32-bit task state segment.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct Tss32 {
    prev: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

const TSS_ZERO: Tss32 = Tss32 {
    prev: 0,
    esp0: 0,
    ss0: 0,
    esp1: 0,
    ss1: 0,
    esp2: 0,
    ss2: 0,
    cr3: 0,
    eip: 0,
    eflags: 0,
    eax: 0,
    ecx: 0,
    edx: 0,
    ebx: 0,
    esp: 0,
    ebp: 0,
    esi: 0,
    edi: 0,
    es: 0,
    cs: 0,
    ss: 0,
    ds: 0,
    fs: 0,
    gs: 0,
    ldt: 0,
    trap: 0,
    iomap_base: size_of::<Tss32>() as u16,
};

static TSS: StaticCell<Tss32> = StaticCell::new(TSS_ZERO);

static GDT: StaticCell<[u64; 6]> = StaticCell::new([0; 6]);

#[repr(C, packed)]
struct GdtDescriptor {
    limit: u16,
    base: u32,
}

/// Packs a standard 4 GiB segment descriptor.
const fn segment(access: u8) -> u64 {
    // base = 0, limit = 0xFFFFF pages, flags = 4 KiB granularity + 32-bit.
    let limit_low = 0xFFFFu64;
    let access = access as u64;
    let flags_limit_high = 0xCFu64; // granularity | 32-bit | limit[19:16]
    limit_low | (access << 40) | (flags_limit_high << 48)
}

fn tss_descriptor(base: u32, limit: u32) -> u64 {
    let base = base as u64;
    let limit = limit as u64;
    (limit & 0xFFFF)
        | ((base & 0xFF_FFFF) << 16)
        | (0x89u64 << 40) // present, ring 0, 32-bit available TSS
        | (((limit >> 16) & 0xF) << 48)
        | (((base >> 24) & 0xFF) << 56)
}

/// Builds and loads the GDT and TSS.
///
/// # Safety
///
/// Must run once, single-threaded, before interrupts or user mode.
pub unsafe fn init(kernel_stack_top: u32) {
    let tss = TSS.get();
    // SAFETY: Single-threaded boot; TSS storage is static.
    unsafe {
        (*tss).ss0 = u32::from(KERNEL_DATA);
        (*tss).esp0 = kernel_stack_top;
    }

    let gdt = GDT.get();
    // SAFETY: Single-threaded boot; GDT storage is static.
    unsafe {
        (*gdt)[0] = 0;
        (*gdt)[1] = segment(0x9A); // kernel code
        (*gdt)[2] = segment(0x92); // kernel data
        (*gdt)[3] = segment(0xFA); // user code
        (*gdt)[4] = segment(0xF2); // user data
        (*gdt)[5] = tss_descriptor(tss as u32, size_of::<Tss32>() as u32 - 1);
    }

    let descriptor = GdtDescriptor {
        limit: (size_of::<[u64; 6]>() - 1) as u16,
        base: gdt as u32,
    };

    // SAFETY: The descriptor references the static table built above; the
    // selector constants match its layout.
    unsafe {
        core::arch::asm!(
            "lgdt [{desc}]",
            // Reload data segments.
            "mov ax, {kdata}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            // Far jump to reload CS.
            "push {kcode}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            "mov ax, {tss}",
            "ltr ax",
            desc = in(reg) core::ptr::addr_of!(descriptor),
            kdata = const KERNEL_DATA as u32,
            kcode = const KERNEL_CODE as u32,
            tss = const TSS_SELECTOR as u32,
            out("eax") _,
        );
    }
}

/// Points the TSS ring-0 stack at `top`; called on every dispatch so the
/// next ring3 → ring0 transition lands on the running task's kernel stack.
pub fn set_kernel_stack(top: u32) {
    let tss = TSS.get();
    // SAFETY: Single word store; the CPU reads esp0 only during a
    // privilege transition, which cannot overlap this store on one CPU.
    unsafe { (*tss).esp0 = top };
}
