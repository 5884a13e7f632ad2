//! Integration tests for the fixed-node pool and the size-classed pool
//! list.

use proptest::prelude::*;

use stratum::allocator::MemoryUsage;
use stratum::arena::{index_from_size, size_from_index, MemoryPool, MemoryPoolList};

#[test]
fn churn_twenty_five_nodes() {
    let pool = MemoryPool::new(40, MemoryPool::<stratum::allocator::HeapAllocator>::min_block_size(40, 25));
    let mut nodes = Vec::new();

    for _ in 0..25 {
        nodes.push(pool.try_allocate_node().expect("pool sized for 25 nodes"));
    }
    assert!(pool.try_allocate_node().is_err());

    // Free every other node, then reallocate them.
    let mut freed = Vec::new();
    for i in (0..25).step_by(2) {
        unsafe { pool.deallocate_node(nodes[i]) };
        freed.push(nodes[i]);
    }
    for _ in 0..freed.len() {
        pool.try_allocate_node().expect("freed nodes are available");
    }
    assert!(pool.try_allocate_node().is_err());
}

#[test]
fn growth_doubles_capacity() {
    let pool = MemoryPool::new(64, MemoryPool::<stratum::allocator::HeapAllocator>::min_block_size(64, 4));
    let first: Vec<_> = (0..4).map(|_| pool.allocate_node()).collect();
    assert_eq!(pool.capacity(), 0);

    // The next allocation grows by a doubled block.
    let grown = pool.allocate_node();
    assert_eq!(pool.capacity(), 7 * 64);

    unsafe {
        pool.deallocate_node(grown);
        for node in first {
            pool.deallocate_node(node);
        }
    }
}

#[test]
fn arrays_and_nodes_share_the_pool() {
    let pool = MemoryPool::new(16, MemoryPool::<stratum::allocator::HeapAllocator>::min_block_size(16, 16));
    let node = pool.allocate_node();
    let array = pool.try_allocate_array(8).expect("room for 8 contiguous");

    // The array occupies consecutive strides.
    let base = array.as_ptr() as usize;
    assert_ne!(base, node.as_ptr() as usize);

    unsafe {
        pool.deallocate_array(array, 8);
        pool.deallocate_node(node);
    }
    assert_eq!(pool.capacity(), 16 * 16);
}

#[test]
fn used_memory_tracks_outstanding_nodes() {
    let pool = MemoryPool::new(32, MemoryPool::<stratum::allocator::HeapAllocator>::min_block_size(32, 8));
    assert_eq!(pool.used_memory(), 0);
    let a = pool.allocate_node();
    let b = pool.allocate_node();
    assert_eq!(pool.used_memory(), 2 * 32);
    unsafe {
        pool.deallocate_node(a);
        pool.deallocate_node(b);
    }
    assert_eq!(pool.used_memory(), 0);
}

#[test]
fn pool_list_classes_match_the_log2_rule() {
    assert_eq!(index_from_size(1), 0);
    assert_eq!(index_from_size(2), 1);
    assert_eq!(index_from_size(3), 2);
    assert_eq!(index_from_size(4), 2);
    assert_eq!(index_from_size(5), 3);
    assert_eq!(index_from_size(8), 3);
    assert_eq!(index_from_size(9), 4);
    assert_eq!(index_from_size(16), 4);
    for i in 0..16 {
        assert_eq!(size_from_index(i), 1usize << i);
    }
}

#[test]
fn pool_list_serves_mixed_sizes() {
    let list = MemoryPoolList::new(128, 1024);
    let mut nodes = Vec::new();
    for size in [1usize, 3, 7, 12, 30, 65, 128] {
        nodes.push((list.allocate_node(size), size));
    }
    for (ptr, size) in nodes {
        unsafe { list.deallocate_node(ptr, size) };
    }
}

proptest! {
    /// Any interleaving of allocations and frees conserves nodes: after
    /// returning everything, the pool is back to full capacity.
    #[test]
    fn node_conservation(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
        let pool = MemoryPool::new(24, MemoryPool::<stratum::allocator::HeapAllocator>::min_block_size(24, 8));
        let mut live = Vec::new();

        for take in ops {
            if take {
                live.push(pool.allocate_node());
            } else if let Some(node) = live.pop() {
                unsafe { pool.deallocate_node(node) };
            }
        }

        let total = pool.used_memory() + pool.capacity();
        for node in live.drain(..) {
            unsafe { pool.deallocate_node(node) };
        }
        prop_assert_eq!(pool.used_memory(), 0);
        prop_assert_eq!(pool.capacity(), total);
    }

    /// Freed permutations leave every node reallocatable.
    #[test]
    fn permutation_reuse(order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()) {
        let pool = MemoryPool::new(16, MemoryPool::<stratum::allocator::HeapAllocator>::min_block_size(16, 12));
        let nodes: Vec<_> = (0..12)
            .map(|_| pool.try_allocate_node().expect("pool sized for 12"))
            .collect();

        for i in order {
            unsafe { pool.deallocate_node(nodes[i]) };
        }
        for _ in 0..12 {
            pool.try_allocate_node().expect("all nodes were freed");
        }
        prop_assert!(pool.try_allocate_node().is_err());
    }
}
