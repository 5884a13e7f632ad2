//! Debug wrapper that fences, pattern-fills and leak-checks another
//! allocator.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::allocator::traits::{Allocator, MemoryUsage, PropagationPolicy};
use crate::debug::{
    debug_fill_free, debug_fill_new, fenced_size, AllocatorInfo, LeakCounter, FENCE_SIZE,
};
use crate::error::AllocResult;

/// Wraps any [`Allocator`] with debug instrumentation.
///
/// In debug builds every allocation is surrounded by fence bytes and
/// filled with the allocation pattern; deallocation verifies the fences
/// (reporting corruption through the process-wide handlers) and refills
/// with the freed pattern. A net byte counter reports leaks through the
/// leak handler when the wrapper is dropped. In release builds the fences
/// collapse to zero bytes and only the leak counter remains.
///
/// Fences require the user pointer at a fixed offset, so layouts aligned
/// beyond the fence width pass through unfenced.
#[derive(Debug)]
pub struct TrackedAllocator<A: Allocator> {
    inner: A,
    name: &'static str,
    leaks: LeakCounter,
}

impl<A: Allocator> TrackedAllocator<A> {
    /// Wraps `inner`, reporting under `name`.
    pub fn new(name: &'static str, inner: A) -> Self {
        TrackedAllocator {
            inner,
            name,
            leaks: LeakCounter::new(),
        }
    }

    /// The wrapped allocator.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Net bytes currently outstanding.
    pub fn live_bytes(&self) -> isize {
        self.leaks.live_bytes()
    }

    /// Highest net byte count observed over the wrapper's lifetime.
    pub fn peak_bytes(&self) -> usize {
        self.leaks.peak_bytes()
    }

    fn fences_apply(layout: Layout) -> bool {
        FENCE_SIZE != 0 && layout.align() <= FENCE_SIZE
    }

    fn fenced_layout(layout: Layout) -> AllocResult<Layout> {
        Layout::from_size_align(fenced_size(layout.size()), layout.align())
            .map_err(|_| crate::error::AllocError::size_overflow("debug fence"))
    }
}

// SAFETY: delegates to the inner allocator; the fence offset preserves the
// requested alignment because fences only apply when align <= FENCE_SIZE
// and FENCE_SIZE is a power of two.
unsafe impl<A: Allocator> Allocator for TrackedAllocator<A> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if !Self::fences_apply(layout) {
            // SAFETY: forwarded caller contract.
            let block = unsafe { self.inner.allocate(layout)? };
            self.leaks.on_allocate(layout.size());
            return Ok(block);
        }

        let fenced = Self::fenced_layout(layout)?;
        // SAFETY: forwarded caller contract.
        let block = unsafe { self.inner.allocate(fenced)? };
        // SAFETY: the block is writable for fenced_size(layout.size()).
        let user = unsafe { debug_fill_new(block.as_ptr().cast(), layout.size()) };
        self.leaks.on_allocate(layout.size());
        // SAFETY: user points into the just-allocated block.
        let user = unsafe { NonNull::new_unchecked(user) };
        Ok(NonNull::slice_from_raw_parts(user, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.leaks.on_deallocate(layout.size());

        if !Self::fences_apply(layout) {
            // SAFETY: forwarded caller contract.
            unsafe { self.inner.deallocate(ptr, layout) };
            return;
        }

        // SAFETY: ptr was produced by allocate above with this layout.
        let memory = unsafe { debug_fill_free(ptr.as_ptr(), layout.size(), &self.info()) };
        if let Ok(fenced) = Self::fenced_layout(layout) {
            // SAFETY: memory/fenced describe the original inner allocation.
            unsafe {
                self.inner
                    .deallocate(NonNull::new_unchecked(memory), fenced)
            };
        }
    }

    fn max_allocation_size(&self) -> usize {
        self.inner.max_allocation_size().saturating_sub(2 * FENCE_SIZE)
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::new(self.name)
    }
}

impl<A: Allocator> Drop for TrackedAllocator<A> {
    fn drop(&mut self) {
        self.leaks.check(&AllocatorInfo::new(self.name));
    }
}

impl<A: Allocator + MemoryUsage> MemoryUsage for TrackedAllocator<A> {
    fn used_memory(&self) -> usize {
        self.inner.used_memory()
    }

    fn available_memory(&self) -> Option<usize> {
        self.inner.available_memory()
    }
}

impl<A: Allocator + PropagationPolicy> PropagationPolicy for TrackedAllocator<A> {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    const PROPAGATE_ON_SWAP: bool = true;

    fn select_on_container_copy(&self) -> Self {
        TrackedAllocator::new(self.name, self.inner.select_on_container_copy())
    }

    fn allocator_eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;

    #[test]
    fn balanced_usage_leaves_no_leaks() {
        let tracked = TrackedAllocator::new("balanced", HeapAllocator);
        let layout = Layout::from_size_align(48, 8).unwrap();
        unsafe {
            let block = tracked.allocate(layout).unwrap();
            assert_eq!(tracked.live_bytes(), 48);
            tracked.deallocate(block.cast(), layout);
        }
        assert_eq!(tracked.live_bytes(), 0);
        assert_eq!(tracked.peak_bytes(), 48);
    }

    #[test]
    fn allocation_pattern_visible_in_debug() {
        let tracked = TrackedAllocator::new("patterned", HeapAllocator);
        let layout = Layout::from_size_align(8, 1).unwrap();
        unsafe {
            let block = tracked.allocate(layout).unwrap();
            if FENCE_SIZE != 0 {
                assert_eq!(block.as_ptr().cast::<u8>().read(), crate::debug::ALLOC_PATTERN);
            }
            tracked.deallocate(block.cast(), layout);
        }
    }

    #[test]
    fn overaligned_layouts_pass_through() {
        let tracked = TrackedAllocator::new("aligned", HeapAllocator);
        let layout = Layout::from_size_align(64, 64).unwrap();
        unsafe {
            let block = tracked.allocate(layout).unwrap();
            assert_eq!(block.as_ptr().cast::<u8>() as usize % 64, 0);
            tracked.deallocate(block.cast(), layout);
        }
    }
}
