//! Core allocator traits.
//!
//! [`Allocator`] is the uniform interface every memory source in this crate
//! implements: low-level heap/static allocators, arenas and pools alike.
//! Containers consume it together with [`PropagationPolicy`], which tells
//! them at compile time whether an allocator instance travels with its
//! container on copy, move and swap.
//!
//! # Safety
//!
//! All unsafe traits here impose the usual allocator contracts: returned
//! pointers are valid, aligned and exclusive; deallocation must receive the
//! pointer and layout of a live allocation from the same instance; a
//! deallocated pointer must never be used again.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::debug::AllocatorInfo;
use crate::error::{AllocError, AllocResult};

/// Validates layout parameters before they reach an allocator.
#[inline]
pub(crate) fn validate_layout(layout: Layout) -> AllocResult<()> {
    if !layout.align().is_power_of_two() {
        return Err(AllocError::invalid_alignment(layout.align()));
    }
    if layout.size() > isize::MAX as usize - (layout.align() - 1) {
        return Err(AllocError::size_overflow("layout padding"));
    }
    Ok(())
}

/// Raw memory allocator.
///
/// # Safety
/// Implementors must return pointers that are valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and disjoint from
/// every other live allocation of the same instance.
pub unsafe trait Allocator {
    /// Allocates memory for `layout`. The returned slice pointer reports
    /// the usable size, which is at least `layout.size()`.
    ///
    /// # Safety
    /// The returned memory is uninitialized; the caller must initialize it
    /// before reading and must deallocate it with the same layout.
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// Deallocates a previous allocation. Zero-sized layouts are a no-op.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this instance with this exact
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Like [`Allocator::allocate`], but allocators that can cheaply report
    /// extra usable capacity (e.g. `malloc_usable_size`) return the true
    /// size in the slice length so callers may use the slack.
    ///
    /// Memory obtained here is still deallocated with the *requested*
    /// layout.
    ///
    /// # Safety
    /// Same contract as [`Allocator::allocate`].
    unsafe fn allocate_at_least(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: same contract as allocate.
        unsafe { self.allocate(layout) }
    }

    /// Resizes an allocation, preserving the first
    /// `min(old_layout.size(), new_layout.size())` bytes.
    ///
    /// # Safety
    /// `ptr`/`old_layout` must describe a live allocation of this instance;
    /// on success the old pointer is invalid.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        validate_layout(new_layout)?;

        if old_layout.size() == new_layout.size() && old_layout.align() == new_layout.align() {
            return Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()));
        }

        // SAFETY: forwarded caller contract; new_layout validated above.
        let new_ptr = unsafe { self.allocate(new_layout)? };

        let copy = old_layout.size().min(new_layout.size());
        if copy > 0 {
            // SAFETY: both regions are valid for `copy` bytes and disjoint
            // (the new allocation is distinct from the old one).
            unsafe {
                core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr().cast::<u8>(), copy);
            }
        }

        // SAFETY: forwarded caller contract; contents already copied out.
        unsafe { self.deallocate(ptr, old_layout) };
        Ok(new_ptr)
    }

    /// Grows an allocation.
    ///
    /// # Safety
    /// Same contract as [`Allocator::reallocate`]; `new_layout.size()`
    /// must not be smaller than `old_layout.size()`.
    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        debug_assert!(new_layout.size() >= old_layout.size());
        // SAFETY: forwarded caller contract.
        unsafe { self.reallocate(ptr, old_layout, new_layout) }
    }

    /// Shrinks an allocation.
    ///
    /// # Safety
    /// Same contract as [`Allocator::reallocate`]; `new_layout.size()`
    /// must not be larger than `old_layout.size()`.
    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        debug_assert!(new_layout.size() <= old_layout.size());
        // SAFETY: forwarded caller contract.
        unsafe { self.reallocate(ptr, old_layout, new_layout) }
    }

    /// Upper bound on a single request. Requests above this fail with
    /// [`AllocError::ExceedsMaxSize`].
    fn max_allocation_size(&self) -> usize {
        isize::MAX as usize
    }

    /// Identifying information for diagnostics and misuse reports.
    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::new("<anonymous allocator>")
    }
}

/// Marker for allocators that may be called concurrently from several
/// threads.
///
/// # Safety
/// Implementors must synchronize all internal state; concurrent mixed
/// allocate/deallocate calls must uphold the [`Allocator`] contract.
pub unsafe trait ThreadSafeAllocator: Allocator + Send + Sync {}

/// Compile-time propagation flags consulted by allocator-aware containers.
///
/// Mirrors the standard allocator-aware container semantics: each flag
/// decides whether the allocator instance travels with the elements on the
/// corresponding container operation. Stateless allocators keep the
/// defaults (always propagate, always equal); stateful allocators compare
/// by identity and usually disable propagation.
pub trait PropagationPolicy: Sized {
    /// Propagate the allocator on container copy-assignment (`clone_from`).
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = true;
    /// Propagate the allocator on container move-assignment.
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    /// Propagate the allocator on container swap.
    const PROPAGATE_ON_SWAP: bool = true;

    /// The allocator a copy-constructed container starts with.
    fn select_on_container_copy(&self) -> Self;

    /// Whether two instances can free each other's allocations.
    /// Stateless allocators are always equal.
    fn allocator_eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Memory usage observation for arenas and pools.
pub trait MemoryUsage {
    /// Bytes currently handed out.
    fn used_memory(&self) -> usize;

    /// Bytes still available, if bounded.
    fn available_memory(&self) -> Option<usize>;

    /// Total capacity, if bounded.
    fn total_memory(&self) -> Option<usize> {
        self.available_memory()
            .map(|available| self.used_memory() + available)
    }
}

/// Allocators that can discard every outstanding allocation at once.
pub trait Resettable {
    /// Resets the allocator to its initial state.
    ///
    /// # Safety
    /// Every pointer previously returned by this instance becomes invalid;
    /// the caller must guarantee none are used afterwards.
    unsafe fn reset(&self);
}

// SAFETY: forwards every call to the underlying allocator, preserving its
// contract unchanged.
unsafe impl<T: Allocator + ?Sized> Allocator for &T {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn allocate_at_least(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).allocate_at_least(layout) }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).reallocate(ptr, old_layout, new_layout) }
    }

    fn max_allocation_size(&self) -> usize {
        (**self).max_allocation_size()
    }

    fn info(&self) -> AllocatorInfo {
        (**self).info()
    }
}

// A shared reference is a borrowed handle to one instance: copies of the
// reference are interchangeable, distinct instances are not.
impl<T: Allocator + ?Sized> PropagationPolicy for &T {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;

    fn select_on_container_copy(&self) -> Self {
        *self
    }

    fn allocator_eq(&self, other: &Self) -> bool {
        core::ptr::eq(*self as *const T as *const u8, *other as *const T as *const u8)
    }
}

impl<T: MemoryUsage + ?Sized> MemoryUsage for &T {
    fn used_memory(&self) -> usize {
        (**self).used_memory()
    }

    fn available_memory(&self) -> Option<usize> {
        (**self).available_memory()
    }

    fn total_memory(&self) -> Option<usize> {
        (**self).total_memory()
    }
}
