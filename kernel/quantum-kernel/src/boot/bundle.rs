//! Init bundle: mapping and task spawning.
//!
//! The bootloader leaves INIT.BND somewhere in physical memory; boot maps
//! it read-only into the kernel half, and every spawned user task gets the
//! same pages mapped read-only at the fixed user window. `spawn_task`
//! materializes a type-0 entry as a fresh user task: image copied to the
//! user program base, stack below the fixed stack top, checksum verified
//! first.

use quantum_abi::SysError;
use quantum_abi::bundle::{Entry, Header, entry_type};
use quantum_core::addr::{PAGE_SIZE, PhysAddr, align_up};
use quantum_core::sync::IrqSpinLock;

use crate::mm::paging::{self, AddressSpace, INIT_BUNDLE_KERNEL_BASE};
use crate::mm::pmm;
use crate::sched::{self, TaskId};

/// User-half window where the bundle is mapped read-only in every task.
pub const INIT_BUNDLE_USER_BASE: u32 = 0x0090_0000;

/// User program load address for spawned entries.
pub const USER_PROGRAM_BASE: u32 = 0x0040_0000;

/// Top of the user stack for spawned entries.
pub const USER_STACK_TOP: u32 = 0x0080_0000;

/// User stack size for spawned entries.
pub const USER_STACK_BYTES: u32 = 16 * 4096;

/// Start of the user heap (`ExpandHeap` break).
pub const USER_HEAP_BASE: u32 = 0x00A0_0000;

/// The bundle window is one directory slot wide.
const MAX_BUNDLE_BYTES: u32 = 4 * 1024 * 1024;

struct Mapping {
    physical: u32,
    size: u32,
    spawned_coordinator: bool,
}

static BUNDLE: IrqSpinLock<Option<Mapping>> = IrqSpinLock::new(None);

/// Maps and validates the bundle. Called once from `kernel_init` when the
/// boot info reports one.
pub fn init(physical: u32, size: u32) {
    if size == 0 || size > MAX_BUNDLE_BYTES {
        crate::kwarn!("bundle: unusable size {}", size);
        return;
    }
    if paging::map_range(INIT_BUNDLE_KERNEL_BASE, physical, size, false, false, true).is_err() {
        crate::kwarn!("bundle: mapping failed");
        return;
    }

    let Some(header) = Header::parse(bytes_at(INIT_BUNDLE_KERNEL_BASE, size)) else {
        crate::kwarn!("bundle: bad header, ignoring");
        paging::unmap_range(INIT_BUNDLE_KERNEL_BASE, size);
        return;
    };

    crate::kinfo!(
        "bundle: {} entries, {} bytes at {:#010x}",
        header.entry_count,
        size,
        physical
    );
    *BUNDLE.lock() = Some(Mapping {
        physical,
        size,
        spawned_coordinator: false,
    });
}

fn bytes_at(base: u32, size: u32) -> &'static [u8] {
    // SAFETY: The caller mapped `size` bytes read-only at `base`.
    unsafe { core::slice::from_raw_parts(base as *const u8, size as usize) }
}

/// The user-space mapping, once the first task has been spawned.
#[must_use]
pub fn user_info() -> Option<(u32, u32)> {
    let bundle = BUNDLE.lock();
    bundle
        .as_ref()
        .map(|mapping| (INIT_BUNDLE_USER_BASE, mapping.size))
}

fn find_entry(name: &str) -> Result<Entry, SysError> {
    let bundle = BUNDLE.lock();
    let mapping = bundle.as_ref().ok_or(SysError::NotFound)?;
    let bytes = bytes_at(INIT_BUNDLE_KERNEL_BASE, mapping.size);
    let header = Header::parse(bytes).ok_or(SysError::NotFound)?;

    for index in 0..header.entry_count as usize {
        let offset = header.table_offset as usize + index * Entry::DISK_BYTES;
        let Some(entry) = Entry::parse(&bytes[offset..]) else {
            continue;
        };
        if entry.entry_type == entry_type::TASK && entry.name_matches(name) {
            let end = (entry.offset as u64) + (entry.size as u64);
            if end > u64::from(mapping.size) {
                return Err(SysError::InvalidArgument);
            }
            return Ok(entry);
        }
    }
    Err(SysError::NotFound)
}

/// Spawns a user task from the named bundle entry.
///
/// The first successful spawn becomes the coordinator.
pub fn spawn_task(name: &str) -> Result<TaskId, SysError> {
    let entry = find_entry(name)?;

    let (bundle_physical, bundle_size) = {
        let bundle = BUNDLE.lock();
        let mapping = bundle.as_ref().ok_or(SysError::NotFound)?;
        (mapping.physical, mapping.size)
    };

    let image = {
        let bytes = bytes_at(INIT_BUNDLE_KERNEL_BASE, bundle_size);
        &bytes[entry.offset as usize..(entry.offset + entry.size) as usize]
    };
    if crc32fast::hash(image) != entry.checksum {
        crate::kerror!("bundle: checksum mismatch for '{}'", entry.name_str());
        return Err(SysError::InvalidArgument);
    }

    let space = AddressSpace::create()?;

    // Program image: fresh user-writable pages, bytes copied in.
    let image_pages = align_up(entry.size.max(1), PAGE_SIZE) / PAGE_SIZE;
    for page in 0..image_pages {
        let frame = pmm::allocate_frame(true)?;
        let copy_start = (page * PAGE_SIZE) as usize;
        let copy_len = image.len().saturating_sub(copy_start).min(PAGE_SIZE as usize);
        if copy_len > 0 {
            // SAFETY: The frame was just allocated; the direct map makes
            // it writable from kernel space.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    image.as_ptr().add(copy_start),
                    paging::phys_to_virt(frame),
                    copy_len,
                );
            }
        }
        space.map_page_in(USER_PROGRAM_BASE + page * PAGE_SIZE, frame.as_u32(), true, true)?;
    }

    // User stack: zeroed pages below the fixed top.
    let stack_base = USER_STACK_TOP - USER_STACK_BYTES;
    for page in 0..USER_STACK_BYTES / PAGE_SIZE {
        let frame = pmm::allocate_frame(true)?;
        space.map_page_in(stack_base + page * PAGE_SIZE, frame.as_u32(), true, true)?;
    }

    // Bundle window: the shared (reserved) physical pages, read-only.
    let bundle_pages = align_up(bundle_size, PAGE_SIZE) / PAGE_SIZE;
    for page in 0..bundle_pages {
        space.map_page_in(
            INIT_BUNDLE_USER_BASE + page * PAGE_SIZE,
            bundle_physical + page * PAGE_SIZE,
            false,
            true,
        )?;
    }

    let coordinator = {
        let mut bundle = BUNDLE.lock();
        let mapping = bundle.as_mut().ok_or(SysError::NotFound)?;
        let first = !mapping.spawned_coordinator;
        mapping.spawned_coordinator = true;
        first
    };

    let id = sched::spawn_user_task(
        space,
        USER_PROGRAM_BASE,
        USER_STACK_TOP,
        USER_HEAP_BASE,
        coordinator,
    )?;
    crate::kinfo!(
        "bundle: spawned '{}' as task {}{}",
        entry.name_str(),
        id,
        if coordinator { " (coordinator)" } else { "" }
    );
    Ok(id)
}
