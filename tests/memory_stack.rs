//! Integration tests for the marker-based stack arena.

use stratum::allocator::{Allocator, MemoryUsage, Resettable, TrackedAllocator};
use stratum::arena::{MemoryStack, StackUnwinder, TemporaryAllocator};

#[test]
fn marker_discipline_over_many_frames() {
    let stack = MemoryStack::with_block_size(1024);
    let mut frames = Vec::new();

    for depth in 0..16 {
        frames.push(stack.top());
        stack.allocate(64 * (depth + 1), 8);
    }

    // Markers were captured in increasing order.
    for pair in frames.windows(2) {
        assert!(pair[0] < pair[1]);
    }

    // Unwind frame by frame, innermost first.
    for marker in frames.iter().rev() {
        stack.unwind(*marker);
        assert_eq!(stack.top(), *marker);
    }
    assert_eq!(stack.used_memory(), 0);
}

#[test]
fn unwind_caches_blocks_and_shrink_releases_them() {
    let stack = MemoryStack::with_block_size(256);
    let origin = stack.top();

    for _ in 0..32 {
        stack.allocate(200, 8);
    }
    let grown = stack.capacity() + stack.used_memory();

    stack.unwind(origin);
    // Everything the stack grew to is still cached for reuse.
    assert_eq!(stack.capacity(), grown);

    stack.shrink_to_fit();
    assert!(stack.capacity() < grown);

    // The stack is still usable after shrinking.
    let p = stack.allocate(64, 8);
    assert_eq!(p.as_ptr() as usize % 8, 0);
}

#[test]
fn allocations_do_not_overlap() {
    let stack = MemoryStack::with_block_size(512);
    let mut regions: Vec<(usize, usize)> = Vec::new();

    for i in 1..=64 {
        let size = (i * 7) % 96 + 1;
        let ptr = stack.allocate(size, 8).as_ptr() as usize;
        regions.push((ptr, size));
    }

    regions.sort();
    for pair in regions.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "allocations overlap");
    }
}

#[test]
fn reset_returns_to_origin() {
    let stack = MemoryStack::with_block_size(128);
    let origin = stack.top();
    for _ in 0..10 {
        stack.allocate(100, 8);
    }
    unsafe { stack.reset() };
    assert_eq!(stack.top(), origin);
}

#[test]
fn unwinder_guards_a_failing_scope() {
    let stack = MemoryStack::with_block_size(512);
    let before = stack.top();

    let result: Result<(), &str> = (|| {
        let scope = StackUnwinder::new(&stack);
        stack.allocate(128, 8);
        stack.allocate(128, 8);
        if stack.used_memory() > 0 {
            // Simulated failure: the scope unwinds on drop.
            return Err("parse failed");
        }
        scope.release();
        Ok(())
    })();

    assert!(result.is_err());
    assert_eq!(stack.top(), before);
}

#[test]
fn stack_serves_the_allocator_trait() {
    let stack = MemoryStack::with_block_size(1024);
    let layout = std::alloc::Layout::from_size_align(48, 16).unwrap();
    let block = unsafe { Allocator::allocate(&stack, layout).unwrap() };
    assert_eq!(block.len(), 48);
    assert_eq!(block.as_ptr().cast::<u8>() as usize % 16, 0);
    // Deallocate is a no-op for stack memory.
    unsafe { stack.deallocate(block.cast(), layout) };
}

#[test]
fn stack_over_tracked_heap_balances() {
    let upstream = TrackedAllocator::new("stack-upstream", stratum::allocator::HeapAllocator);
    {
        let stack = MemoryStack::with_upstream(512, &upstream);
        for _ in 0..8 {
            stack.allocate(256, 8);
        }
        assert!(upstream.live_bytes() > 0);
    }
    // Dropping the stack returned every block.
    assert_eq!(upstream.live_bytes(), 0);
}

#[test]
fn temporary_scopes_reclaim_per_thread() {
    let outer = TemporaryAllocator::new();
    let a = outer.allocate(256, 8);

    {
        let inner = TemporaryAllocator::new();
        let b = inner.allocate(256, 8);
        assert_ne!(a, b);
    }

    // Scratch from other threads never aliases ours.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(|| {
                let tmp = TemporaryAllocator::new();
                tmp.allocate(256, 8).as_ptr() as usize
            })
        })
        .collect();
    let mut addrs: Vec<usize> = handles
        .into_iter()
        .map(|h| h.join().expect("worker thread panicked"))
        .collect();
    addrs.push(a.as_ptr() as usize);
    addrs.sort();
    addrs.dedup();
    assert_eq!(addrs.len(), 5);
}
