//! Heap allocate/free laws over the public heap API.

use quantum_kernel::mm::heap::{Heap, MIN_ALIGN};

fn arena_heap(bytes: usize) -> Heap {
    let base = Box::leak(vec![0u8; bytes + MIN_ALIGN].into_boxed_slice()).as_mut_ptr();
    let base = ((base as usize).next_multiple_of(MIN_ALIGN)) as *mut u8;
    let mut heap = Heap::empty();
    unsafe { heap.add_region(base, bytes) };
    heap
}

/// Allocate(n); Free(p); Allocate(n) returns a usable block and leaves the
/// heap verifying after every step.
#[test]
fn allocate_free_allocate_law() {
    let mut heap = arena_heap(128 * 1024);
    let initial = heap.state();

    let first = heap.allocate(2048);
    assert!(!first.is_null());
    assert!(heap.verify());

    unsafe { heap.free(first) };
    assert!(heap.verify());
    assert_eq!(heap.state(), initial);

    let second = heap.allocate(2048);
    assert!(!second.is_null());
    assert_eq!(second as usize % MIN_ALIGN, 0);
    assert!(heap.verify());
}

/// A mixed burst of sizes, freed in scrambled order, collapses back to one
/// free block.
#[test]
fn scrambled_frees_coalesce_fully() {
    let mut heap = arena_heap(256 * 1024);
    let initial = heap.state();
    assert_eq!(initial.free_blocks, 1);

    let sizes = [24usize, 8192, 160, 4096, 32, 2048, 640, 16384];
    let blocks: Vec<_> = sizes.iter().map(|&s| heap.allocate(s)).collect();
    assert!(blocks.iter().all(|p| !p.is_null()));
    assert!(heap.verify());

    for &index in &[5usize, 0, 7, 2, 6, 1, 4, 3] {
        unsafe { heap.free(blocks[index]) };
        assert!(heap.verify());
    }

    let end = heap.state();
    assert_eq!(end.free_blocks, 1);
    assert_eq!(end.free_bytes, initial.free_bytes);
}

/// Aligned allocations interleave with plain ones without corrupting
/// either's bookkeeping.
#[test]
fn aligned_and_plain_interleave() {
    let mut heap = arena_heap(256 * 1024);
    let initial = heap.state();

    let plain = heap.allocate(100);
    let aligned = heap.allocate_aligned(100, 4096);
    let plain2 = heap.allocate(100);
    assert!(!plain.is_null() && !aligned.is_null() && !plain2.is_null());
    assert_eq!(aligned as usize % 4096, 0);
    assert!(heap.verify());

    unsafe {
        heap.free(aligned);
        heap.free(plain);
        heap.free(plain2);
    }
    assert!(heap.verify());
    assert_eq!(heap.state(), initial);
}
