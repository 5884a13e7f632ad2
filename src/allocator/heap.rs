//! General-purpose heap allocator backed by the platform allocator.

use core::alloc::Layout;
use core::ptr::NonNull;
use std::alloc::{GlobalAlloc, System};

use crate::allocator::traits::{
    validate_layout, Allocator, PropagationPolicy, ThreadSafeAllocator,
};
use crate::debug::AllocatorInfo;
use crate::error::{AllocError, AllocResult};

/// Stateless allocator over the platform heap (`std::alloc::System`).
///
/// Goes to the system allocator directly rather than through a registered
/// `#[global_allocator]`, so platform introspection such as
/// `malloc_usable_size` stays valid.
///
/// Every instance is interchangeable with every other, so it propagates
/// freely and compares equal. This is the default upstream allocator for
/// the arenas and containers in this crate.
///
/// # Examples
/// ```
/// use core::alloc::Layout;
/// use stratum::allocator::{Allocator, HeapAllocator};
///
/// let heap = HeapAllocator;
/// let layout = Layout::from_size_align(128, 16).unwrap();
/// unsafe {
///     let block = heap.allocate(layout).unwrap();
///     assert!(block.len() >= 128);
///     heap.deallocate(block.cast(), layout);
/// }
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapAllocator;

impl HeapAllocator {
    /// Creates a heap allocator. Equivalent to the unit value.
    pub const fn new() -> Self {
        HeapAllocator
    }
}

// SAFETY: System returns valid, aligned, exclusive memory or null; null
// is converted into an error below.
unsafe impl Allocator for HeapAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        validate_layout(layout)?;
        if layout.size() == 0 {
            // Dangling but well-aligned, matching std::alloc conventions.
            let dangling = NonNull::new(layout.align() as *mut u8)
                .ok_or_else(|| AllocError::invalid_alignment(layout.align()))?;
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }

        // SAFETY: layout validated and non-zero.
        let raw = unsafe { System.alloc(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| AllocError::allocation_failed(layout.size(), layout.align()))?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // SAFETY: caller contract, ptr came from allocate with this layout.
        unsafe { System.dealloc(ptr.as_ptr(), layout) };
    }

    unsafe fn allocate_at_least(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: same contract as allocate.
        let block = unsafe { self.allocate(layout)? };

        cfg_if::cfg_if! {
            if #[cfg(all(unix, not(miri)))] {
                if layout.size() != 0 {
                    // SAFETY: the pointer is a live malloc-family
                    // allocation.
                    let usable = unsafe {
                        libc::malloc_usable_size(block.as_ptr().cast::<libc::c_void>())
                    };
                    if usable > block.len() {
                        return Ok(NonNull::slice_from_raw_parts(block.cast(), usable));
                    }
                }
                Ok(block)
            } else {
                Ok(block)
            }
        }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        validate_layout(new_layout)?;

        // realloc keeps the alignment of the original layout only.
        if old_layout.align() == new_layout.align()
            && old_layout.size() != 0
            && new_layout.size() != 0
        {
            // SAFETY: caller contract plus the alignment check above.
            let raw =
                unsafe { System.realloc(ptr.as_ptr(), old_layout, new_layout.size()) };
            let new_ptr = NonNull::new(raw).ok_or_else(|| {
                AllocError::allocation_failed(new_layout.size(), new_layout.align())
            })?;
            return Ok(NonNull::slice_from_raw_parts(new_ptr, new_layout.size()));
        }

        // SAFETY: forwarded caller contract.
        unsafe { default_reallocate(self, ptr, old_layout, new_layout) }
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::new("HeapAllocator")
    }
}

/// Allocate-copy-deallocate fallback used when `realloc` cannot be applied.
///
/// # Safety
/// Same contract as [`Allocator::reallocate`].
unsafe fn default_reallocate<A: Allocator + ?Sized>(
    alloc: &A,
    ptr: NonNull<u8>,
    old_layout: Layout,
    new_layout: Layout,
) -> AllocResult<NonNull<[u8]>> {
    // SAFETY: forwarded caller contract.
    let new_ptr = unsafe { alloc.allocate(new_layout)? };
    let copy = old_layout.size().min(new_layout.size());
    if copy > 0 {
        // SAFETY: disjoint live regions valid for `copy` bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr().cast::<u8>(), copy);
        }
    }
    // SAFETY: forwarded caller contract.
    unsafe { alloc.deallocate(ptr, old_layout) };
    Ok(new_ptr)
}

// SAFETY: the global allocator is thread-safe and HeapAllocator is
// stateless.
unsafe impl ThreadSafeAllocator for HeapAllocator {}

impl PropagationPolicy for HeapAllocator {
    fn select_on_container_copy(&self) -> Self {
        *self
    }
}

/// Allocator over a dedicated Win32 heap created with `HeapCreate`.
///
/// Unlike [`HeapAllocator`] this owns its heap, so dropping the allocator
/// releases every allocation made from it at once.
#[cfg(windows)]
pub use win32::Win32HeapAllocator;

#[cfg(windows)]
mod win32 {
    use super::*;
    use winapi::um::heapapi::{HeapAlloc, HeapCreate, HeapDestroy, HeapFree};
    use winapi::um::winnt::HANDLE;

    #[derive(Debug)]
    pub struct Win32HeapAllocator {
        heap: HANDLE,
    }

    impl Win32HeapAllocator {
        /// Creates a growable private heap with the given initial size.
        pub fn new(initial_size: usize) -> AllocResult<Self> {
            // SAFETY: HeapCreate with no serialization flags and max size 0
            // (growable) is always a valid call.
            let heap = unsafe { HeapCreate(0, initial_size, 0) };
            if heap.is_null() {
                return Err(AllocError::allocation_failed(initial_size, 1));
            }
            Ok(Win32HeapAllocator { heap })
        }
    }

    // SAFETY: HeapAlloc on a serialized heap returns valid exclusive
    // memory aligned to MEMORY_ALLOCATION_ALIGNMENT; larger alignments are
    // rejected below.
    unsafe impl Allocator for Win32HeapAllocator {
        unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
            validate_layout(layout)?;
            if layout.align() > crate::utils::MAX_ALIGNMENT {
                return Err(AllocError::invalid_alignment(layout.align()));
            }
            // SAFETY: heap handle is live for the lifetime of self.
            let raw = unsafe { HeapAlloc(self.heap, 0, layout.size().max(1)) };
            let ptr = NonNull::new(raw.cast::<u8>())
                .ok_or_else(|| AllocError::allocation_failed(layout.size(), layout.align()))?;
            Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
            // SAFETY: caller contract, ptr is a live HeapAlloc block.
            unsafe { HeapFree(self.heap, 0, ptr.as_ptr().cast()) };
        }

        fn info(&self) -> AllocatorInfo {
            AllocatorInfo::with_address("Win32HeapAllocator", self)
        }
    }

    impl Drop for Win32HeapAllocator {
        fn drop(&mut self) {
            // SAFETY: the handle came from HeapCreate and is destroyed once.
            unsafe { HeapDestroy(self.heap) };
        }
    }

    // SAFETY: HeapAlloc serializes access unless HEAP_NO_SERIALIZE is set,
    // which we never set.
    unsafe impl Send for Win32HeapAllocator {}
    unsafe impl Sync for Win32HeapAllocator {}
    unsafe impl ThreadSafeAllocator for Win32HeapAllocator {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free() {
        let heap = HeapAllocator::new();
        let layout = Layout::from_size_align(256, 32).unwrap();
        unsafe {
            let block = heap.allocate(layout).unwrap();
            assert!(block.len() >= 256);
            assert_eq!(block.as_ptr().cast::<u8>() as usize % 32, 0);
            heap.deallocate(block.cast(), layout);
        }
    }

    #[test]
    fn zero_sized_allocation() {
        let heap = HeapAllocator;
        let layout = Layout::from_size_align(0, 8).unwrap();
        unsafe {
            let block = heap.allocate(layout).unwrap();
            assert_eq!(block.len(), 0);
            heap.deallocate(block.cast(), layout);
        }
    }

    #[test]
    fn reallocate_preserves_prefix() {
        let heap = HeapAllocator;
        let old = Layout::from_size_align(16, 8).unwrap();
        let new = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let block = heap.allocate(old).unwrap();
            let p = block.as_ptr().cast::<u8>();
            for i in 0..16 {
                p.add(i).write(i as u8);
            }
            let grown = heap.reallocate(block.cast(), old, new).unwrap();
            let q = grown.as_ptr().cast::<u8>();
            for i in 0..16 {
                assert_eq!(q.add(i).read(), i as u8);
            }
            heap.deallocate(grown.cast(), new);
        }
    }

    #[cfg(unix)]
    #[test]
    fn allocate_at_least_reports_usable_size() {
        let heap = HeapAllocator;
        let layout = Layout::from_size_align(24, 8).unwrap();
        unsafe {
            let block = heap.allocate_at_least(layout).unwrap();
            assert!(block.len() >= 24);
            heap.deallocate(block.cast(), layout);
        }
    }
}
