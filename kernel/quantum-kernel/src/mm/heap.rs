//! Kernel heap: first-fit free list with split and coalesce.
//!
//! The heap is a single address-ordered list of blocks, each led by a
//! [`BlockHeader`] recording its total size (header included), its free
//! flag, and the next block. Allocation walks the list for the first free
//! block that fits and splits off the residue when it is worth keeping;
//! free marks the block and re-merges it with physically adjacent free
//! neighbors so the "adjacent free blocks are coalesced" invariant holds at
//! every step.
//!
//! When nothing fits, the heap asks a registered growth callback for more
//! mapped memory and appends it as one free block. On kernel builds the
//! callback maps fresh frames at the heap window's next virtual address;
//! host tests plug in arena-backed callbacks.

use core::ptr;

use quantum_core::sync::IrqSpinLock;

/// Minimum alignment of every payload (and of block headers).
pub const MIN_ALIGN: usize = 8;

/// Smallest payload worth splitting off into its own block.
const MIN_SPLIT_PAYLOAD: usize = 16;

/// Marker preceding an aligned payload.
const ALIGNED_MAGIC: usize = 0x514E_414C; // "QNAL"

/// Header at the start of every heap block.
#[repr(C, align(8))]
struct BlockHeader {
    /// Total block size in bytes, header included.
    size: usize,
    /// 1 when the block is on the free list.
    free: usize,
    /// Next block in address order, or null.
    next: *mut BlockHeader,
}

const HEADER_BYTES: usize = size_of::<BlockHeader>();

/// Metadata stored immediately before an aligned payload so `free` can
/// recover the owning block header.
#[repr(C, align(8))]
struct AlignedMetadata {
    magic: usize,
    header: *mut BlockHeader,
}

const METADATA_BYTES: usize = size_of::<AlignedMetadata>();

/// Snapshot of current heap state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapState {
    /// Total heap bytes currently under management.
    pub mapped_bytes: usize,
    /// Total free bytes tracked by the heap (headers excluded).
    pub free_bytes: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
}

/// Growth callback: asked for at least `min_bytes` of fresh memory, returns
/// the mapped region or `None` when the window is exhausted.
pub type GrowFn = fn(min_bytes: usize) -> Option<(*mut u8, usize)>;

/// A first-fit heap over externally provided memory.
pub struct Heap {
    head: *mut BlockHeader,
    mapped_bytes: usize,
    grow: Option<GrowFn>,
}

// SAFETY: The heap is only reachable through the global lock; raw block
// pointers never escape the critical section.
unsafe impl Send for Heap {}

const fn round_up(value: usize) -> usize {
    (value + MIN_ALIGN - 1) & !(MIN_ALIGN - 1)
}

impl Heap {
    /// An empty heap; the first allocation triggers growth.
    pub const fn empty() -> Self {
        Self {
            head: ptr::null_mut(),
            mapped_bytes: 0,
            grow: None,
        }
    }

    /// Registers the growth callback.
    pub fn register_grow_fn(&mut self, grow: GrowFn) {
        self.grow = Some(grow);
    }

    /// Appends a fresh region as a single free block.
    ///
    /// # Safety
    ///
    /// `base..base + length` must be writable, `MIN_ALIGN`-aligned memory
    /// not overlapping any existing block, at a higher address than every
    /// current block.
    pub unsafe fn add_region(&mut self, base: *mut u8, length: usize) {
        if length < HEADER_BYTES + MIN_SPLIT_PAYLOAD {
            return;
        }
        let header = base.cast::<BlockHeader>();
        // SAFETY: Caller guarantees the region is writable and aligned.
        unsafe {
            (*header).size = length & !(MIN_ALIGN - 1);
            (*header).free = 1;
            (*header).next = ptr::null_mut();
        }
        self.mapped_bytes += length;

        if self.head.is_null() {
            self.head = header;
            return;
        }
        let mut tail = self.head;
        // SAFETY: All list pointers reference live headers.
        unsafe {
            while !(*tail).next.is_null() {
                tail = (*tail).next;
            }
            (*tail).next = header;
        }
    }

    /// Allocates `size` bytes with [`MIN_ALIGN`] alignment.
    ///
    /// Returns null when the request cannot be satisfied even after growth.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        if size == 0 || size > isize::MAX as usize / 2 {
            return ptr::null_mut();
        }
        let needed = HEADER_BYTES + round_up(size);

        if let Some(ptr) = self.allocate_from_list(needed) {
            return ptr;
        }

        // Nothing fits: grow and retry once.
        let Some(grow) = self.grow else {
            return ptr::null_mut();
        };
        let Some((base, length)) = grow(needed) else {
            return ptr::null_mut();
        };
        // SAFETY: The growth callback hands out fresh mapped memory above
        // every existing block.
        unsafe { self.add_region(base, length) };
        self.allocate_from_list(needed).unwrap_or(ptr::null_mut())
    }

    fn allocate_from_list(&mut self, needed: usize) -> Option<*mut u8> {
        let mut block = self.head;
        while !block.is_null() {
            // SAFETY: `block` came from the list and is a live header.
            unsafe {
                if (*block).free == 1 && (*block).size >= needed {
                    self.split(block, needed);
                    (*block).free = 0;
                    return Some(block.cast::<u8>().add(HEADER_BYTES));
                }
                block = (*block).next;
            }
        }
        None
    }

    /// Splits `block` so it spans exactly `needed` bytes, when the residue
    /// is large enough to stand alone.
    fn split(&mut self, block: *mut BlockHeader, needed: usize) {
        // SAFETY: `block` is a live header owned by this heap.
        unsafe {
            let residue = (*block).size - needed;
            if residue < HEADER_BYTES + MIN_SPLIT_PAYLOAD {
                return;
            }
            let rest = block.cast::<u8>().add(needed).cast::<BlockHeader>();
            (*rest).size = residue;
            (*rest).free = 1;
            (*rest).next = (*block).next;
            (*block).size = needed;
            (*block).next = rest;
        }
    }

    /// Allocates `size` bytes at an `alignment` (power of two) boundary.
    pub fn allocate_aligned(&mut self, size: usize, alignment: usize) -> *mut u8 {
        if alignment <= MIN_ALIGN {
            return self.allocate(size);
        }
        let raw = self.allocate(size + alignment + METADATA_BYTES);
        if raw.is_null() {
            return raw;
        }
        let raw_addr = raw as usize;
        let payload = (raw_addr + METADATA_BYTES).next_multiple_of(alignment);
        // SAFETY: `payload - METADATA_BYTES >= raw_addr`, so the metadata
        // record stays inside the allocation.
        unsafe {
            let meta = (payload - METADATA_BYTES) as *mut AlignedMetadata;
            (*meta).magic = ALIGNED_MAGIC;
            (*meta).header = raw.sub(HEADER_BYTES).cast::<BlockHeader>();
        }
        payload as *mut u8
    }

    /// Frees a payload previously returned by `allocate`/`allocate_aligned`.
    ///
    /// # Safety
    ///
    /// `payload` must come from this heap and must not be freed twice.
    pub unsafe fn free(&mut self, payload: *mut u8) {
        if payload.is_null() {
            return;
        }
        // SAFETY: Caller guarantees `payload` belongs to this heap; the
        // metadata probe only reads memory inside the allocation.
        let block = unsafe {
            let meta = payload.sub(METADATA_BYTES).cast::<AlignedMetadata>();
            if (*meta).magic == ALIGNED_MAGIC {
                (*meta).magic = 0;
                (*meta).header
            } else {
                payload.sub(HEADER_BYTES).cast::<BlockHeader>()
            }
        };
        // SAFETY: `block` is a live header recovered above.
        unsafe {
            (*block).free = 1;
        }
        self.coalesce_around(block);
    }

    /// Merges `block` with physically adjacent free neighbors on both sides.
    fn coalesce_around(&mut self, block: *mut BlockHeader) {
        // SAFETY: All pointers below come from the block list.
        unsafe {
            // Forward: absorb the next block while it is free and contiguous.
            Self::coalesce_forward(block);

            // Backward: find the predecessor and let it absorb us the same
            // way, keeping the list address-sorted with no adjacent frees.
            if block != self.head {
                let mut prev = self.head;
                while !prev.is_null() && (*prev).next != block {
                    prev = (*prev).next;
                }
                if !prev.is_null() && (*prev).free == 1 {
                    Self::coalesce_forward(prev);
                }
            }
        }
    }

    unsafe fn coalesce_forward(block: *mut BlockHeader) {
        // SAFETY: Caller guarantees `block` is a live header.
        unsafe {
            while (*block).free == 1 {
                let next = (*block).next;
                if next.is_null() {
                    break;
                }
                let contiguous = block.cast::<u8>().add((*block).size) == next.cast::<u8>();
                if !contiguous || (*next).free != 1 {
                    break;
                }
                (*block).size += (*next).size;
                (*block).next = (*next).next;
            }
        }
    }

    /// Walks every block and checks the heap invariants.
    ///
    /// Returns false on a malformed header, an unsorted list, or two
    /// contiguous free blocks that should have been coalesced.
    pub fn verify(&self) -> bool {
        let mut block = self.head;
        let mut prev: *mut BlockHeader = ptr::null_mut();
        while !block.is_null() {
            // SAFETY: List pointers reference live headers.
            unsafe {
                if block as usize % MIN_ALIGN != 0 {
                    return false;
                }
                if (*block).size < HEADER_BYTES || (*block).size % MIN_ALIGN != 0 {
                    return false;
                }
                if (*block).free > 1 {
                    return false;
                }
                if !prev.is_null() {
                    if (block as usize) <= prev as usize {
                        return false;
                    }
                    let contiguous =
                        prev.cast::<u8>().add((*prev).size) == block.cast::<u8>();
                    if contiguous && (*prev).free == 1 && (*block).free == 1 {
                        return false;
                    }
                }
                prev = block;
                block = (*block).next;
            }
        }
        true
    }

    /// Current heap state snapshot.
    pub fn state(&self) -> HeapState {
        let mut free_bytes = 0;
        let mut free_blocks = 0;
        let mut block = self.head;
        while !block.is_null() {
            // SAFETY: List pointers reference live headers.
            unsafe {
                if (*block).free == 1 {
                    free_bytes += (*block).size - HEADER_BYTES;
                    free_blocks += 1;
                }
                block = (*block).next;
            }
        }
        HeapState {
            mapped_bytes: self.mapped_bytes,
            free_bytes,
            free_blocks,
        }
    }
}

// ---------------------------------------------------------------------------
// Global kernel heap
// ---------------------------------------------------------------------------

/// Global kernel heap.
// Lock level: heap (after allocator and paging, before handle tables).
static HEAP: IrqSpinLock<Heap> = IrqSpinLock::new(Heap::empty());

/// Runs `f` with the global heap.
pub fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    f(&mut HEAP.lock())
}

/// Initializes the global heap: registers the paging-backed growth callback.
#[cfg(target_os = "none")]
pub fn init() {
    let mut heap = HEAP.lock();
    heap.register_grow_fn(super::paging::grow_heap);
}

/// Verifies the global heap's invariants.
pub fn verify_heap() -> bool {
    HEAP.lock().verify()
}

/// Snapshot of the global heap.
pub fn heap_state() -> HeapState {
    HEAP.lock().state()
}

#[cfg(target_os = "none")]
mod global_alloc {
    use core::alloc::{GlobalAlloc, Layout};

    use super::HEAP;

    struct KernelAllocator;

    // SAFETY: Allocation is delegated to the locked first-fit heap, which
    // never hands out overlapping blocks.
    unsafe impl GlobalAlloc for KernelAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let mut heap = HEAP.lock();
            if layout.align() > super::MIN_ALIGN {
                heap.allocate_aligned(layout.size(), layout.align())
            } else {
                heap.allocate(layout.size().max(1))
            }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
            // SAFETY: `ptr` was returned by `alloc` above.
            unsafe { HEAP.lock().free(ptr) };
        }
    }

    #[global_allocator]
    static ALLOCATOR: KernelAllocator = KernelAllocator;
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARENA_BYTES: usize = 256 * 1024;

    fn arena_heap(bytes: usize) -> Heap {
        let base = Box::leak(vec![0u8; bytes + MIN_ALIGN].into_boxed_slice()).as_mut_ptr();
        let base = ((base as usize).next_multiple_of(MIN_ALIGN)) as *mut u8;
        let mut heap = Heap::empty();
        unsafe { heap.add_region(base, bytes) };
        heap
    }

    #[test]
    fn allocate_and_free_round_trip() {
        let mut heap = arena_heap(ARENA_BYTES);
        let before = heap.state();
        let a = heap.allocate(64);
        let b = heap.allocate(128);
        assert!(!a.is_null());
        assert!(!b.is_null());
        assert!(heap.verify());
        unsafe {
            heap.free(a);
            heap.free(b);
        }
        assert!(heap.verify());
        assert_eq!(heap.state(), before);
    }

    #[test]
    fn payloads_are_min_aligned() {
        let mut heap = arena_heap(ARENA_BYTES);
        for size in [1, 7, 8, 13, 8192] {
            let ptr = heap.allocate(size);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % MIN_ALIGN, 0);
        }
        assert!(heap.verify());
    }

    #[test]
    fn free_then_reallocate_reuses_block() {
        let mut heap = arena_heap(ARENA_BYTES);
        let a = heap.allocate(256);
        unsafe { heap.free(a) };
        let b = heap.allocate(256);
        assert_eq!(a, b);
        assert!(heap.verify());
    }

    #[test]
    fn aligned_allocation_recovers_header_on_free() {
        let mut heap = arena_heap(ARENA_BYTES);
        let before = heap.state();
        for alignment in [16usize, 64, 4096] {
            let ptr = heap.allocate_aligned(100, alignment);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % alignment, 0);
            assert!(heap.verify());
            unsafe { heap.free(ptr) };
            assert!(heap.verify());
        }
        assert_eq!(heap.state(), before);
    }

    #[test]
    fn coalescing_merges_neighbors() {
        let mut heap = arena_heap(64 * 1024);
        let blocks: Vec<_> = (0..5).map(|_| heap.allocate(8192)).collect();
        assert!(blocks.iter().all(|p| !p.is_null()));

        // Free every other allocation, then bridge the gap: the three free
        // neighbors must merge into one block large enough for 16 KiB.
        unsafe {
            heap.free(blocks[0]);
            heap.free(blocks[2]);
            heap.free(blocks[4]);
        }
        assert!(heap.verify());
        let fragmented = heap.state();
        assert!(fragmented.free_blocks >= 3);

        unsafe { heap.free(blocks[1]) };
        assert!(heap.verify());

        let big = heap.allocate(16384);
        assert!(!big.is_null());
        assert!(heap.verify());
    }

    // Dedicated contiguous arena for the growth test; only this test grows.
    static GROW_ARENA: IrqSpinLock<Option<(usize, usize)>> = IrqSpinLock::new(None);

    fn test_grow(min_bytes: usize) -> Option<(*mut u8, usize)> {
        let mut arena = GROW_ARENA.lock();
        let (cursor, end) = arena.as_mut()?;
        let length = min_bytes.next_multiple_of(4096);
        if *cursor + length > *end {
            return None;
        }
        let base = *cursor as *mut u8;
        *cursor += length;
        Some((base, length))
    }

    #[test]
    fn growth_satisfies_allocations_from_an_empty_heap() {
        let storage = Box::leak(vec![0u8; 512 * 1024].into_boxed_slice());
        let base = (storage.as_mut_ptr() as usize).next_multiple_of(4096);
        *GROW_ARENA.lock() = Some((base, base + 500 * 1024));

        let mut heap = Heap::empty();
        heap.register_grow_fn(test_grow);

        let mut blocks = Vec::new();
        for _ in 0..10 {
            let ptr = heap.allocate(8192);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % MIN_ALIGN, 0);
            assert!(heap.verify());
            blocks.push(ptr);
        }

        for ptr in blocks.iter().step_by(2) {
            unsafe { heap.free(*ptr) };
            assert!(heap.verify());
        }

        let big = heap.allocate(16384);
        assert!(!big.is_null());
        assert!(heap.verify());
    }

    #[test]
    fn exhausted_heap_without_growth_returns_null() {
        let mut heap = arena_heap(4096);
        assert!(heap.allocate(64 * 1024).is_null());
        assert!(heap.verify());
    }

    #[test]
    fn zero_sized_allocation_is_rejected() {
        let mut heap = arena_heap(4096);
        assert!(heap.allocate(0).is_null());
    }
}
