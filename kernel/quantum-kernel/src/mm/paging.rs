//! Paging and address spaces.
//!
//! The virtual space splits at 0xC0000000: below is per-task user memory,
//! above is kernel memory present in every address space. The kernel half
//! holds, in order: the kernel image alias (virt = phys + 0xC0000000), the
//! read-only init-bundle window, the kernel heap window, a direct map of
//! all managed RAM (4 MiB pages) used for physical access, and the
//! recursive self-map in the top directory slot.
//!
//! Page tables backing the shared kernel-half windows are allocated once
//! during [`init`], before any user address space is created, so every
//! later directory aliases the same tables and kernel-half updates are
//! visible process-wide.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use quantum_abi::SysError;
use quantum_core::addr::{PAGE_SIZE, PhysAddr, VirtAddr, align_up};
use quantum_core::sync::IrqSpinLock;

use crate::arch::x86 as arch;
use crate::arch::x86::StaticCell;
use crate::mm::pmm;

/// Start of the kernel half; user memory lives below.
pub const KERNEL_VIRTUAL_BASE: u32 = 0xC000_0000;

/// Kernel-half window where INIT.BND is mapped read-only.
pub const INIT_BUNDLE_KERNEL_BASE: u32 = 0xC100_0000;

/// Kernel heap window.
pub const KERNEL_HEAP_BASE: u32 = 0xD000_0000;

/// Maximum kernel heap size.
pub const KERNEL_HEAP_MAX_BYTES: u32 = 64 * 1024 * 1024;

/// Direct map of managed physical RAM.
pub const DIRECT_MAP_BASE: u32 = 0xE000_0000;

/// Directory slot holding the recursive self-map.
pub const RECURSIVE_SLOT: usize = 1023;

/// First directory slot of the kernel half.
const KERNEL_SLOT_BASE: usize = (KERNEL_VIRTUAL_BASE >> 22) as usize;

const PAGE_PRESENT: u32 = 1 << 0;
const PAGE_WRITE: u32 = 1 << 1;
const PAGE_USER: u32 = 1 << 2;
const PAGE_LARGE: u32 = 1 << 7;
const PAGE_GLOBAL: u32 = 1 << 8;

const ENTRIES: usize = 1024;

#[repr(C, align(4096))]
struct PageTable([u32; ENTRIES]);

/// The kernel page directory, shared (by table aliasing) with every
/// address space.
static KERNEL_DIRECTORY: StaticCell<PageTable> = StaticCell::new(PageTable([0; ENTRIES]));

/// True once the kernel directory is live and the direct map usable.
static DIRECT_MAP_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Next unmapped virtual address inside the heap window.
static HEAP_BREAK: AtomicU32 = AtomicU32::new(KERNEL_HEAP_BASE);

/// Serializes all page-table mutation.
// Lock level: paging (after the frame allocator, before the heap).
static PAGING: IrqSpinLock<()> = IrqSpinLock::new(());

unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

/// Virtual extent of the loaded kernel image.
#[must_use]
pub fn kernel_image_virtual() -> (u32, u32) {
    let start = core::ptr::addr_of!(__kernel_start) as u32;
    let end = core::ptr::addr_of!(__kernel_end) as u32;
    (start, end)
}

/// Converts a kernel-image virtual address to its physical load address.
#[must_use]
pub const fn kernel_virtual_to_physical(virtual_address: u32) -> u32 {
    virtual_address - KERNEL_VIRTUAL_BASE
}

/// Maps a physical address to a kernel-accessible virtual address.
///
/// Before [`init`] completes this relies on the boot stub's low identity
/// window; afterwards it uses the direct map.
#[must_use]
pub fn phys_to_virt(physical: PhysAddr) -> *mut u8 {
    if DIRECT_MAP_ACTIVE.load(Ordering::Acquire) {
        (DIRECT_MAP_BASE + physical.as_u32()) as *mut u8
    } else {
        physical.as_u32() as *mut u8
    }
}

fn table_slice(table_physical: PhysAddr) -> *mut [u32; ENTRIES] {
    phys_to_virt(table_physical).cast()
}

/// Ensures a page table exists behind `directory[index]`, allocating and
/// zeroing one when absent. Returns the table's physical address.
fn ensure_table(directory: *mut [u32; ENTRIES], index: usize) -> Result<PhysAddr, SysError> {
    // SAFETY: Caller holds the paging lock; `directory` is a live table.
    unsafe {
        let entry = (*directory)[index];
        if entry & PAGE_PRESENT != 0 {
            return Ok(PhysAddr::new(entry & !0xFFF));
        }
        let table = pmm::allocate_frame(true)?;
        (*directory)[index] = table.as_u32() | PAGE_PRESENT | PAGE_WRITE;
        Ok(table)
    }
}

fn flags_for(writable: bool, user: bool, global: bool) -> u32 {
    PAGE_PRESENT
        | if writable { PAGE_WRITE } else { 0 }
        | if user { PAGE_USER } else { 0 }
        | if global { PAGE_GLOBAL } else { 0 }
}

fn map_page_raw(
    directory: *mut [u32; ENTRIES],
    va: VirtAddr,
    pa: PhysAddr,
    writable: bool,
    user: bool,
    global: bool,
) -> Result<(), SysError> {
    let dir_index = va.directory_index() as usize;
    let table = ensure_table(directory, dir_index)?;
    // SAFETY: Caller holds the paging lock; the table was just ensured.
    unsafe {
        let table = table_slice(table);
        (*table)[va.table_index() as usize] =
            (pa.as_u32() & !0xFFF) | flags_for(writable, user, global);
        if user {
            (*directory)[dir_index] |= PAGE_USER;
        }
    }
    arch::invalidate_page(va.as_u32());
    Ok(())
}

fn unmap_page_raw(directory: *mut [u32; ENTRIES], va: VirtAddr) {
    let dir_index = va.directory_index() as usize;
    // SAFETY: Caller holds the paging lock.
    unsafe {
        let entry = (*directory)[dir_index];
        if entry & PAGE_PRESENT == 0 || entry & PAGE_LARGE != 0 {
            return;
        }
        let table = table_slice(PhysAddr::new(entry & !0xFFF));
        (*table)[va.table_index() as usize] = 0;
    }
    arch::invalidate_page(va.as_u32());
}

// ---------------------------------------------------------------------------
// Kernel address space
// ---------------------------------------------------------------------------

fn kernel_directory() -> *mut [u32; ENTRIES] {
    KERNEL_DIRECTORY.get().cast()
}

/// Physical address of the kernel page directory.
#[must_use]
pub fn kernel_directory_physical() -> PhysAddr {
    PhysAddr::new(kernel_virtual_to_physical(KERNEL_DIRECTORY.get() as u32))
}

/// Maps one page in the kernel address space.
pub fn map_page(
    va: u32,
    pa: u32,
    writable: bool,
    user: bool,
    global: bool,
) -> Result<(), SysError> {
    let _guard = PAGING.lock();
    map_page_raw(
        kernel_directory(),
        VirtAddr::new(va),
        PhysAddr::new(pa),
        writable,
        user,
        global,
    )
}

/// Unmaps one page in the kernel address space.
pub fn unmap_page(va: u32) {
    let _guard = PAGING.lock();
    unmap_page_raw(kernel_directory(), VirtAddr::new(va));
}

/// Maps `length` bytes (rounded up to whole pages).
pub fn map_range(
    va: u32,
    pa: u32,
    length: u32,
    writable: bool,
    user: bool,
    global: bool,
) -> Result<(), SysError> {
    let pages = align_up(length, PAGE_SIZE) / PAGE_SIZE;
    for i in 0..pages {
        map_page(
            va + i * PAGE_SIZE,
            pa + i * PAGE_SIZE,
            writable,
            user,
            global,
        )?;
    }
    Ok(())
}

/// Unmaps `length` bytes (rounded up to whole pages).
pub fn unmap_range(va: u32, length: u32) {
    let pages = align_up(length, PAGE_SIZE) / PAGE_SIZE;
    for i in 0..pages {
        unmap_page(va + i * PAGE_SIZE);
    }
}

/// Reads the active directory's entry for `va` through the recursive map.
#[must_use]
pub fn directory_entry(va: u32) -> u32 {
    let index = VirtAddr::new(va).directory_index();
    let directory = 0xFFFF_F000 as *const u32;
    // SAFETY: The recursive slot maps the active directory at the top of
    // the address space.
    unsafe { directory.add(index as usize).read_volatile() }
}

/// Reads the active translation's page-table entry for `va` through the
/// recursive map. Returns 0 when nothing is mapped.
#[must_use]
pub fn table_entry(va: u32) -> u32 {
    let pde = directory_entry(va);
    if pde & PAGE_PRESENT == 0 {
        return 0;
    }
    if pde & PAGE_LARGE != 0 {
        return pde;
    }
    let va = VirtAddr::new(va);
    let table = (0xFFC0_0000 + va.directory_index() * 0x1000) as *const u32;
    // SAFETY: Present non-large PDE, so the recursive window exposes the
    // table at this address.
    unsafe { table.add(va.table_index() as usize).read_volatile() }
}

/// Builds the kernel address space and switches to it.
///
/// `mapped_end` extends the image mapping past the BSS (the frame bitmaps
/// live there).
///
/// # Safety
///
/// Must run once during boot, after the frame allocator is installed,
/// while the boot stub's identity window is still active.
pub unsafe fn init(managed_bytes: u32, mapped_end: u32) {
    let directory = kernel_directory();

    {
        let _guard = PAGING.lock();

        // Kernel image (and the bitmaps above it): virt = phys +
        // KERNEL_VIRTUAL_BASE, global.
        let (image_start, _) = kernel_image_virtual();
        let image_end = mapped_end.max(kernel_image_virtual().1);
        let mut va = image_start & !(PAGE_SIZE - 1);
        while va < image_end {
            map_page_raw(
                directory,
                VirtAddr::new(va),
                PhysAddr::new(kernel_virtual_to_physical(va)),
                true,
                false,
                true,
            )
            .expect("mapping the kernel image");
            va += PAGE_SIZE;
        }

        // Direct map of managed RAM as global 4 MiB pages.
        let large_pages = managed_bytes.div_ceil(4 * 1024 * 1024);
        let base_slot = (DIRECT_MAP_BASE >> 22) as usize;
        for i in 0..large_pages as usize {
            // SAFETY: Writing the static directory under the paging lock.
            unsafe {
                (*directory)[base_slot + i] = (i as u32 * 4 * 1024 * 1024)
                    | PAGE_PRESENT
                    | PAGE_WRITE
                    | PAGE_LARGE
                    | PAGE_GLOBAL;
            }
        }

        // Pre-ensure the tables for every shared kernel-half window so
        // user directories alias them (heap growth stays visible
        // everywhere without directory fix-ups).
        let heap_slots = (KERNEL_HEAP_MAX_BYTES >> 22) as usize;
        let heap_base_slot = (KERNEL_HEAP_BASE >> 22) as usize;
        for slot in heap_base_slot..heap_base_slot + heap_slots {
            ensure_table(directory, slot).expect("heap window tables");
        }
        ensure_table(directory, (INIT_BUNDLE_KERNEL_BASE >> 22) as usize)
            .expect("bundle window table");

        // Recursive self-map in the top slot.
        let directory_physical = kernel_directory_physical();
        // SAFETY: Writing the static directory under the paging lock.
        unsafe {
            (*directory)[RECURSIVE_SLOT] =
                directory_physical.as_u32() | PAGE_PRESENT | PAGE_WRITE;
        }
    }

    // SAFETY: The new directory maps the executing kernel image.
    unsafe {
        arch::load_page_directory(kernel_directory_physical().as_u32());
        arch::enable_paging();
    }
    arch::invalidate_page(0);
    DIRECT_MAP_ACTIVE.store(true, Ordering::Release);

    crate::kinfo!(
        "paging: kernel directory live, direct map covers {} MiB",
        managed_bytes / (1024 * 1024)
    );
}

/// Heap growth callback: maps fresh frames at the heap break.
pub fn grow_heap(min_bytes: usize) -> Option<(*mut u8, usize)> {
    let length = align_up(min_bytes as u32, PAGE_SIZE);
    let base = HEAP_BREAK.fetch_add(length, Ordering::AcqRel);
    if base + length > KERNEL_HEAP_BASE + KERNEL_HEAP_MAX_BYTES {
        HEAP_BREAK.fetch_sub(length, Ordering::AcqRel);
        return None;
    }
    let pages = length / PAGE_SIZE;
    for i in 0..pages {
        let frame = pmm::allocate_frame(false).ok()?;
        map_page(base + i * PAGE_SIZE, frame.as_u32(), true, false, true).ok()?;
    }
    Some((base as *mut u8, length as usize))
}

// ---------------------------------------------------------------------------
// User address spaces
// ---------------------------------------------------------------------------

/// A per-task address space: private user half, aliased kernel half.
pub struct AddressSpace {
    directory: PhysAddr,
}

impl AddressSpace {
    /// Creates a fresh address space sharing the kernel half.
    pub fn create() -> Result<Self, SysError> {
        let directory_physical = pmm::allocate_frame(true)?;
        let _guard = PAGING.lock();
        let kernel = kernel_directory();
        let directory = table_slice(directory_physical);
        // SAFETY: Both directories are live tables; we hold the paging
        // lock and only copy the shared kernel-half entries.
        unsafe {
            for slot in KERNEL_SLOT_BASE..ENTRIES {
                (*directory)[slot] = (*kernel)[slot];
            }
            (*directory)[RECURSIVE_SLOT] =
                directory_physical.as_u32() | PAGE_PRESENT | PAGE_WRITE;
        }
        Ok(Self {
            directory: directory_physical,
        })
    }

    /// Physical address of this space's page directory.
    #[must_use]
    pub fn root(&self) -> PhysAddr {
        self.directory
    }

    /// Maps one page in this (possibly inactive) space.
    pub fn map_page_in(
        &self,
        va: u32,
        pa: u32,
        writable: bool,
        user: bool,
    ) -> Result<(), SysError> {
        let va = VirtAddr::new(va);
        if va.as_u32() >= KERNEL_VIRTUAL_BASE {
            return Err(SysError::InvalidArgument);
        }
        let _guard = PAGING.lock();
        map_page_raw(
            table_slice(self.directory),
            va,
            PhysAddr::new(pa),
            writable,
            user,
            false,
        )
    }

    /// Loads this space's directory into CR3.
    pub fn activate(&self) {
        // SAFETY: The kernel half of every space maps the running kernel.
        unsafe { arch::load_page_directory(self.directory.as_u32()) };
    }
}

impl Drop for AddressSpace {
    /// Frees the user half (mapped frames and their tables) and the
    /// directory. The aliased kernel half is shared and left alone.
    fn drop(&mut self) {
        // Never tear down the space the CPU is running on.
        if arch::current_page_directory() == self.directory.as_u32() {
            kernel_activate();
        }
        let _guard = PAGING.lock();
        let directory = table_slice(self.directory);
        for slot in 0..KERNEL_SLOT_BASE {
            // SAFETY: We hold the paging lock and own this directory.
            unsafe {
                let pde = (*directory)[slot];
                if pde & PAGE_PRESENT == 0 || pde & PAGE_LARGE != 0 {
                    continue;
                }
                let table_physical = PhysAddr::new(pde & !0xFFF);
                let table = table_slice(table_physical);
                for pte in (*table).iter() {
                    if pte & PAGE_PRESENT != 0 {
                        // Reserved frames (the shared bundle pages) are
                        // no-ops for the allocator.
                        pmm::free_frame(PhysAddr::new(pte & !0xFFF));
                    }
                }
                pmm::free_frame(table_physical);
            }
        }
        pmm::free_frame(self.directory);
    }
}

/// Switches back to the kernel's own directory.
pub fn kernel_activate() {
    // SAFETY: The kernel directory always maps the running kernel.
    unsafe { arch::load_page_directory(kernel_directory_physical().as_u32()) };
}
