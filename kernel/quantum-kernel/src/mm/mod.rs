//! Memory management: physical frames, paging, and the kernel heap.
//!
//! Initialization order is fixed: the frame allocator comes up first from
//! the boot-info memory map, paging builds the kernel address space on top
//! of it, and the heap maps its window last. All three keep their own lock;
//! the acquisition order is allocator < paging < heap.

pub mod heap;
pub mod pmm;

#[cfg(target_os = "none")]
pub mod paging;

/// Size of one page/frame in bytes.
pub use quantum_core::addr::PAGE_SIZE;
