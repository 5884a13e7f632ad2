//! Buckets of [`MemoryPool`]s indexed by power-of-two size class.

use core::alloc::Layout;
use core::cell::RefCell;
use core::ptr::NonNull;

use crate::allocator::{Allocator, HeapAllocator, MemoryUsage, Resettable};
use crate::arena::pool::MemoryPool;
use crate::debug::AllocatorInfo;
use crate::error::{AllocError, AllocResult};

/// Bucket index for `size`: the exponent of the next power of two.
///
/// # Examples
/// ```
/// use stratum::arena::index_from_size;
///
/// assert_eq!(index_from_size(1), 0);
/// assert_eq!(index_from_size(2), 1);
/// assert_eq!(index_from_size(3), 2);
/// assert_eq!(index_from_size(4), 2);
/// assert_eq!(index_from_size(5), 3);
/// assert_eq!(index_from_size(9), 4);
/// ```
pub const fn index_from_size(size: usize) -> usize {
    assert!(size > 0, "size class of zero bytes");
    (usize::BITS - (size - 1).leading_zeros()) as usize
}

/// Node size served by bucket `index`.
///
/// Inverse of [`index_from_size`] on powers of two.
pub const fn size_from_index(index: usize) -> usize {
    1 << index
}

/// A set of node pools with power-of-two size classes.
///
/// Requests are rounded up to the next power of two and served by the
/// matching [`MemoryPool`]. Pools are created on first use of their class,
/// each drawing blocks from a clone of the upstream allocator.
pub struct MemoryPoolList<A: Allocator + Clone = HeapAllocator> {
    pools: RefCell<Vec<Option<MemoryPool<A>>>>,
    max_node_size: usize,
    block_size: usize,
    upstream: A,
}

impl MemoryPoolList<HeapAllocator> {
    /// Heap-backed pool list serving sizes up to `max_node_size`.
    pub fn new(max_node_size: usize, block_size: usize) -> Self {
        Self::with_upstream(max_node_size, block_size, HeapAllocator)
    }
}

impl<A: Allocator + Clone> MemoryPoolList<A> {
    /// Pool list whose pools draw blocks from clones of `upstream`.
    ///
    /// # Panics
    /// Panics if `max_node_size` is zero.
    pub fn with_upstream(max_node_size: usize, block_size: usize, upstream: A) -> Self {
        let classes = index_from_size(max_node_size) + 1;
        MemoryPoolList {
            pools: RefCell::new((0..classes).map(|_| None).collect()),
            max_node_size,
            block_size,
            upstream,
        }
    }

    /// Largest node size any bucket serves.
    pub fn max_node_size(&self) -> usize {
        self.max_node_size
    }

    /// Allocates a node of at least `size` bytes, growing the matching
    /// pool if needed. Aborts the process on upstream exhaustion.
    ///
    /// # Panics
    /// Panics if `size` is zero or exceeds the largest size class.
    pub fn allocate_node(&self, size: usize) -> NonNull<u8> {
        self.assert_in_range(size);
        self.with_pool(size, |pool| pool.allocate_node())
    }

    /// Allocates a node of at least `size` bytes from existing pool
    /// capacity, without growing.
    pub fn try_allocate_node(&self, size: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 || size > self.max_node_size {
            return Err(AllocError::exceeds_max_size(size, self.max_node_size));
        }
        self.with_pool(size, |pool| pool.try_allocate_node())
    }

    /// Returns a node obtained with the same `size` class.
    ///
    /// # Panics
    /// Panics if `ptr` does not come from this list's pool for `size`.
    ///
    /// # Safety
    /// `ptr` must come from [`MemoryPoolList::allocate_node`] (or the
    /// `try_` variant) with a size mapping to the same class, and must not
    /// be used afterwards.
    pub unsafe fn deallocate_node(&self, ptr: NonNull<u8>, size: usize) {
        self.assert_in_range(size);
        // SAFETY: forwarded caller contract.
        self.with_pool(size, |pool| unsafe { pool.deallocate_node(ptr) });
    }

    /// Non-panicking variant of [`MemoryPoolList::deallocate_node`].
    ///
    /// # Safety
    /// If `ptr` belongs to the class pool it must be a live allocation.
    pub unsafe fn try_deallocate_node(&self, ptr: NonNull<u8>, size: usize) -> bool {
        if size == 0 || size > self.max_node_size {
            return false;
        }
        // SAFETY: forwarded caller contract.
        self.with_pool(size, |pool| unsafe { pool.try_deallocate_node(ptr) })
    }

    /// Free bytes across all instantiated pools.
    pub fn capacity(&self) -> usize {
        let pools = self.pools.borrow();
        pools
            .iter()
            .flatten()
            .map(|pool| pool.capacity())
            .sum()
    }

    fn assert_in_range(&self, size: usize) {
        assert!(
            size > 0 && size <= self.max_node_size,
            "size {size} outside pool list classes (max {})",
            self.max_node_size
        );
    }

    fn with_pool<R>(&self, size: usize, f: impl FnOnce(&MemoryPool<A>) -> R) -> R {
        let index = index_from_size(size);
        let mut pools = self.pools.borrow_mut();
        let slot = &mut pools[index];
        if slot.is_none() {
            let node_size = size_from_index(index);
            *slot = Some(MemoryPool::with_upstream(
                node_size,
                self.block_size.max(node_size),
                self.upstream.clone(),
            ));
        }
        match slot.as_ref() {
            Some(pool) => f(pool),
            None => unreachable!("pool was just created"),
        }
    }
}

// SAFETY: delegates to the class pool chosen by size; classes never share
// nodes.
unsafe impl<A: Allocator + Clone> Allocator for MemoryPoolList<A> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        let size = layout.size();
        if size == 0 {
            // Dangling but well-aligned, matching std::alloc conventions.
            let dangling = NonNull::new(layout.align() as *mut u8)
                .ok_or_else(|| AllocError::invalid_alignment(layout.align()))?;
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }
        if size > self.max_node_size {
            return Err(AllocError::exceeds_max_size(size, self.max_node_size));
        }
        // SAFETY: forwarded caller contract; the class pool validates the
        // alignment.
        self.with_pool(size, |pool| unsafe { pool.allocate(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_node(ptr, layout.size()) };
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::with_address("MemoryPoolList", self)
    }
}

impl<A: Allocator + Clone> MemoryUsage for MemoryPoolList<A> {
    fn used_memory(&self) -> usize {
        let pools = self.pools.borrow();
        pools.iter().flatten().map(|pool| pool.used_memory()).sum()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }
}

impl<A: Allocator + Clone> Resettable for MemoryPoolList<A> {
    unsafe fn reset(&self) {
        let pools = self.pools.borrow();
        for pool in pools.iter().flatten() {
            // SAFETY: forwarded caller contract.
            unsafe { pool.reset() };
        }
    }
}

impl<A: Allocator + Clone> core::fmt::Debug for MemoryPoolList<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryPoolList")
            .field("max_node_size", &self.max_node_size)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes_round_trip() {
        for index in 0..10 {
            assert_eq!(index_from_size(size_from_index(index)), index);
        }
    }

    #[test]
    fn sizes_share_a_class() {
        assert_eq!(index_from_size(5), index_from_size(8));
        assert_ne!(index_from_size(8), index_from_size(9));
    }

    #[test]
    fn nodes_come_from_the_right_class() {
        let list = MemoryPoolList::new(64, 256);
        let small = list.allocate_node(3);
        let large = list.allocate_node(48);
        unsafe {
            list.deallocate_node(small, 3);
            // A different size in the same class frees through the same
            // pool.
            list.deallocate_node(large, 64);
        }
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let list = MemoryPoolList::new(32, 256);
        assert!(matches!(
            list.try_allocate_node(33),
            Err(AllocError::ExceedsMaxSize { .. })
        ));
    }
}
