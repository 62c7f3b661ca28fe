//! Boot: boot-info capture and kernel initialization.
//!
//! `kernel_init` brings the machine up in a fixed order: early serial
//! logging, CPU tables, physical memory, paging, the heap, the device and
//! IPC registries, tasking (the boot context becomes the idle task), the
//! init bundle, and finally the coordinator spawn and the timer. It ends
//! as the idle loop.

pub mod bundle;
pub mod entry;

extern crate alloc;

use alloc::boxed::Box;

use quantum_abi::bootinfo::{BOOT_INFO_PHYSICAL, BootInfo};
use quantum_core::addr::{PAGE_SIZE, align_up};
use quantum_core::sync::SpinLock;

use crate::arch::x86 as arch;
use crate::drivers::uart16550::{COM1, SerialSink, Uart16550};
use crate::log::LogLevel;
use crate::mm::{heap, paging, pmm};
use crate::sched::{self, KernelStack, MIN_STACK_BYTES, Task};
use crate::{kinfo, kwarn};

/// The early (pre-heap) serial sink.
static EARLY_SERIAL: SerialSink = SerialSink::new(Uart16550::new(COM1), LogLevel::Debug);

/// Boot info copied out of the bootloader's physical block.
static BOOT_INFO: SpinLock<Option<BootInfo>> = SpinLock::new(None);

/// Runs `f` with the captured boot info.
pub fn with_boot_info<R>(f: impl FnOnce(&BootInfo) -> R) -> Option<R> {
    BOOT_INFO.lock().as_ref().map(f)
}

/// Name of the bundle entry spawned as the first user task.
const COORDINATOR_NAME: &str = "coordinator";

/// Kernel initialization, called from the entry stub with the boot-info
/// physical address.
///
/// # Safety
///
/// Reached exactly once, on the boot stack, with the boot identity window
/// active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kernel_init(boot_info_physical: u32) -> ! {
    Uart16550::new(COM1).init();
    crate::log::set_early_sink(&EARLY_SERIAL);
    kinfo!("Quantum kernel booting");

    // SAFETY: Single-threaded boot; GDT then IDT then PIC.
    unsafe {
        arch::gdt::init(entry::boot_stack_top());
        arch::idt::init();
    }
    arch::pic::init();

    // Capture the boot info through the identity window before the real
    // page tables replace it.
    let info = read_boot_info(boot_info_physical);
    let managed = pmm::managed_bytes(&info);
    let (bundle_physical, bundle_size) = if info.has_init_bundle() {
        (info.init_bundle_physical, info.init_bundle_size)
    } else {
        (0, 0)
    };
    *BOOT_INFO.lock() = Some(info);

    let bitmap_end = init_pmm(managed, bundle_physical, bundle_size);

    // SAFETY: Frame allocator installed; boot identity window still live.
    unsafe { paging::init(managed, bitmap_end) };

    heap::init();
    kinfo!(
        "mm: {} MiB managed, {} frames free",
        managed / (1024 * 1024),
        pmm::with_pmm(|pmm| pmm.free_frames())
    );

    crate::devices::block::init();
    crate::syscall::init();

    // The boot context becomes the idle task (it already owns this stack;
    // the TCB's own stack allocation is only switch bookkeeping).
    let idle_stack = KernelStack::new(MIN_STACK_BYTES).expect("idle stack");
    let idle = sched::with_scheduler(|s| s.adopt_current(Box::new(Task::new(idle_stack))));
    kinfo!("sched: idle task {}", idle);

    if bundle_size != 0 {
        bundle::init(bundle_physical, bundle_size);
        match bundle::spawn_task(COORDINATOR_NAME) {
            Ok(id) => kinfo!("boot: coordinator is task {}", id),
            Err(error) => kwarn!("boot: no coordinator: {:?}", error),
        }
    } else {
        kwarn!("boot: no init bundle, staying idle");
    }

    crate::drivers::pit::init();
    sched::with_scheduler(|s| s.enable_preemption());
    arch::pic::unmask(0);
    arch::enable_interrupts();

    // Idle: halt until an interrupt, let preemption rotate the queue.
    loop {
        arch::halt();
    }
}

fn read_boot_info(physical: u32) -> BootInfo {
    let physical = if physical == 0 {
        BOOT_INFO_PHYSICAL
    } else {
        physical
    };
    // SAFETY: The boot identity window maps low memory; the bootloader
    // guarantees a BootInfo block at this address.
    unsafe { (physical as *const BootInfo).read_unaligned() }
}

/// Builds the frame bitmap immediately above the kernel BSS and reserves
/// everything the kernel already occupies. Returns the first free virtual
/// address above the bitmaps.
fn init_pmm(managed: u32, bundle_physical: u32, bundle_size: u32) -> u32 {
    let (_, kernel_end) = paging::kernel_image_virtual();
    let bitmap_bytes = pmm::bitmap_bytes(managed);
    let words = (bitmap_bytes / 4) as usize;

    let used_va = align_up(kernel_end, PAGE_SIZE);
    let reserved_va = used_va + bitmap_bytes;
    let bitmaps_end = align_up(reserved_va + bitmap_bytes, PAGE_SIZE);

    // SAFETY: The region sits directly above the BSS inside the boot
    // mapping; nothing else owns it, and it is reserved below before any
    // allocation can hand it out.
    let (used, reserved) = unsafe {
        (
            core::slice::from_raw_parts_mut(used_va as *mut u32, words),
            core::slice::from_raw_parts_mut(reserved_va as *mut u32, words),
        )
    };

    let frames = managed / PAGE_SIZE;
    let mut bitmap = pmm::FrameBitmap::new(used, reserved, frames);
    let info = BOOT_INFO.lock();
    pmm::apply_memory_map(&mut bitmap, info.as_ref().expect("boot info captured"));
    drop(info);

    // Kernel image + bitmaps.
    let image_physical = paging::kernel_virtual_to_physical(paging::kernel_image_virtual().0);
    let image_end_physical = paging::kernel_virtual_to_physical(bitmaps_end);
    bitmap.reserve_range(image_physical, image_end_physical - image_physical);

    // Init bundle.
    if bundle_size != 0 {
        bitmap.reserve_range(bundle_physical, bundle_size);
    }

    pmm::install(bitmap);
    bitmaps_end
}
