//! Heap allocator tests
//!
//! `Heap` carries no dependency on the global kernel state, so these run
//! against freestanding instances with no serialization needed.

use ember::heap::Heap;

#[test]
fn alloc_and_free_tracks_stats() {
    let mut heap = Heap::new();
    heap.init();

    let stats0 = heap.stats();
    assert_eq!(stats0.bytes_in_use, 0);
    assert_eq!(stats0.alloc_count, 0);

    let ptr = heap.alloc(64).expect("alloc should succeed");
    let stats1 = heap.stats();
    assert!(stats1.bytes_in_use > 0);
    assert_eq!(stats1.alloc_count, 1);
    assert_eq!(stats1.peak_bytes_in_use, stats1.bytes_in_use);

    unsafe { heap.free(ptr) };
    let stats2 = heap.stats();
    assert_eq!(stats2.bytes_in_use, 0);
    assert_eq!(stats2.free_count, 1);
    // Peak remembers the high-water mark even after freeing.
    assert_eq!(stats2.peak_bytes_in_use, stats1.bytes_in_use);
}

#[test]
fn zero_size_alloc_fails() {
    let mut heap = Heap::new();
    heap.init();
    assert!(heap.alloc(0).is_none());
}

#[test]
fn exhaustion_bumps_failure_count() {
    let mut heap = Heap::new();
    heap.init();

    assert!(heap.alloc(64 * 1024).is_none());
    assert_eq!(heap.stats().alloc_fail_count, 1);
}

#[test]
fn first_fit_reuses_lowest_address_free_block() {
    let mut heap = Heap::new();
    heap.init();

    let a = heap.alloc(256).unwrap();
    let b = heap.alloc(256).unwrap();
    let _c = heap.alloc(256).unwrap();

    unsafe { heap.free(a) };

    // A same-size allocation lands back in `a`'s block: it's the first
    // (lowest-address) free block that fits.
    let d = heap.alloc(256).unwrap();
    assert_eq!(d.as_ptr(), a.as_ptr());

    unsafe {
        heap.free(b);
        heap.free(d);
    }
}

#[test]
fn adjacent_frees_coalesce_into_one_block() {
    let mut heap = Heap::new();
    heap.init();

    let a = heap.alloc(512).unwrap();
    let b = heap.alloc(512).unwrap();

    unsafe {
        heap.free(a);
        heap.free(b);
    }

    // The two freed blocks should have coalesced with each other (and
    // with the remaining tail of the arena), so an allocation spanning
    // both original blocks now succeeds.
    assert!(heap.alloc(900).is_some());
}

#[test]
fn fragmentation_pct_reflects_free_block_count() {
    let mut heap = Heap::new();
    heap.init();
    assert_eq!(heap.fragmentation_pct(), 0);

    let a = heap.alloc(128).unwrap();
    let _b = heap.alloc(128).unwrap();
    let c = heap.alloc(128).unwrap();

    // Free the outer two but keep the middle allocated: `a` ends up an
    // isolated free block, `c` coalesces with the arena's tail, leaving
    // two disjoint free blocks instead of one.
    unsafe {
        heap.free(a);
        heap.free(c);
    }

    assert!(heap.fragmentation_pct() > 0);
}
