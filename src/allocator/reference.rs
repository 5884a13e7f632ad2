//! Shared and type-erased allocator handles.
//!
//! [`SharedAllocator`] is a cheap clonable handle to one allocator
//! instance; [`AnyAllocator`] erases the concrete type behind a boxed
//! trait object so containers with different upstream allocators can share
//! a type.

use core::alloc::Layout;
use core::ptr::NonNull;
use std::sync::Arc;

use dyn_clone::DynClone;

use crate::allocator::traits::{Allocator, PropagationPolicy, ThreadSafeAllocator};
use crate::debug::AllocatorInfo;
use crate::error::AllocResult;

/// Clonable handle to a single shared allocator instance.
///
/// All clones allocate from the same underlying instance, so any clone can
/// free memory obtained through any other. The instance is dropped when
/// the last handle goes away.
#[derive(Debug)]
pub struct SharedAllocator<A: Allocator>(Arc<A>);

impl<A: Allocator> SharedAllocator<A> {
    pub fn new(inner: A) -> Self {
        SharedAllocator(Arc::new(inner))
    }

    /// The shared instance.
    pub fn get(&self) -> &A {
        &self.0
    }

    /// Whether both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<A: Allocator> Clone for SharedAllocator<A> {
    fn clone(&self) -> Self {
        SharedAllocator(Arc::clone(&self.0))
    }
}

// SAFETY: forwards to the shared instance; Arc keeps it alive for as long
// as any allocation can be outstanding through a handle.
unsafe impl<A: Allocator> Allocator for SharedAllocator<A> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.deallocate(ptr, layout) }
    }

    unsafe fn allocate_at_least(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.allocate_at_least(layout) }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.reallocate(ptr, old_layout, new_layout) }
    }

    fn max_allocation_size(&self) -> usize {
        self.0.max_allocation_size()
    }

    fn info(&self) -> AllocatorInfo {
        self.0.info()
    }
}

// SAFETY: the inner allocator is itself thread-safe.
unsafe impl<A: ThreadSafeAllocator> ThreadSafeAllocator for SharedAllocator<A> {}

impl<A: Allocator> PropagationPolicy for SharedAllocator<A> {
    // Handles are identity-bearing: keep each container's handle on copy
    // assignment, move the handle on move assignment and swap.
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    const PROPAGATE_ON_SWAP: bool = true;

    fn select_on_container_copy(&self) -> Self {
        self.clone()
    }

    fn allocator_eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// Object-safe allocator surface backing [`AnyAllocator`].
pub trait ErasedAllocator: DynClone + core::fmt::Debug {
    /// # Safety
    /// Same contract as [`Allocator::allocate`].
    unsafe fn erased_allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// # Safety
    /// Same contract as [`Allocator::deallocate`].
    unsafe fn erased_deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    fn erased_max_allocation_size(&self) -> usize;

    fn erased_info(&self) -> AllocatorInfo;

    /// Whether the other erased allocator is the same instance or an
    /// interchangeable one. Allocators of different concrete types are
    /// never interchangeable.
    fn erased_eq(&self, other: &dyn ErasedAllocator) -> bool;

    fn as_any(&self) -> &dyn core::any::Any;
}

dyn_clone::clone_trait_object!(ErasedAllocator);

impl<A> ErasedAllocator for A
where
    A: Allocator + PropagationPolicy + Clone + core::fmt::Debug + 'static,
{
    unsafe fn erased_allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.allocate(layout) }
    }

    unsafe fn erased_deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate(ptr, layout) }
    }

    fn erased_max_allocation_size(&self) -> usize {
        self.max_allocation_size()
    }

    fn erased_info(&self) -> AllocatorInfo {
        self.info()
    }

    fn erased_eq(&self, other: &dyn ErasedAllocator) -> bool {
        match other.as_any().downcast_ref::<A>() {
            Some(other) => self.allocator_eq(other),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

/// Type-erased clonable allocator.
///
/// # Examples
/// ```
/// use stratum::allocator::{AnyAllocator, HeapAllocator};
///
/// let any = AnyAllocator::new(HeapAllocator);
/// let copy = any.clone();
/// let block = any.try_allocate(64, 8).unwrap();
/// unsafe { copy.deallocate_raw(block.cast(), 64, 8) };
/// ```
#[derive(Debug, Clone)]
pub struct AnyAllocator(Box<dyn ErasedAllocator>);

impl AnyAllocator {
    pub fn new<A>(inner: A) -> Self
    where
        A: Allocator + PropagationPolicy + Clone + core::fmt::Debug + 'static,
    {
        AnyAllocator(Box::new(inner))
    }

    /// Fallible allocation from raw size and alignment.
    pub fn try_allocate(&self, size: usize, align: usize) -> AllocResult<NonNull<[u8]>> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| crate::error::AllocError::invalid_layout("size overflows alignment"))?;
        // SAFETY: layout just constructed; caller owns the result.
        unsafe { self.0.erased_allocate(layout) }
    }

    /// Deallocation counterpart of [`AnyAllocator::try_allocate`].
    ///
    /// # Safety
    /// `ptr` must come from this allocator (or a clone of it) with the same
    /// size and alignment.
    pub unsafe fn deallocate_raw(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if let Ok(layout) = Layout::from_size_align(size, align) {
            // SAFETY: forwarded caller contract.
            unsafe { self.0.erased_deallocate(ptr, layout) };
        }
    }
}

// SAFETY: forwards to the erased instance.
unsafe impl Allocator for AnyAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.erased_allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.erased_deallocate(ptr, layout) }
    }

    fn max_allocation_size(&self) -> usize {
        self.0.erased_max_allocation_size()
    }

    fn info(&self) -> AllocatorInfo {
        self.0.erased_info()
    }
}

impl PropagationPolicy for AnyAllocator {
    const PROPAGATE_ON_COPY_ASSIGNMENT: bool = false;
    const PROPAGATE_ON_MOVE_ASSIGNMENT: bool = true;
    const PROPAGATE_ON_SWAP: bool = true;

    fn select_on_container_copy(&self) -> Self {
        self.clone()
    }

    fn allocator_eq(&self, other: &Self) -> bool {
        self.0.erased_eq(&*other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;

    #[test]
    fn shared_handles_alias_one_instance() {
        let shared = SharedAllocator::new(HeapAllocator);
        let other = shared.clone();
        assert!(shared.ptr_eq(&other));
        assert!(shared.allocator_eq(&other));

        let distinct = SharedAllocator::new(HeapAllocator);
        assert!(!shared.ptr_eq(&distinct));
    }

    #[test]
    fn erased_allocation_round_trip() {
        let any = AnyAllocator::new(HeapAllocator);
        let block = any.try_allocate(128, 16).unwrap();
        assert!(block.len() >= 128);
        unsafe { any.deallocate_raw(block.cast(), 128, 16) };
    }

    #[test]
    fn erased_clone_is_independent_but_compatible() {
        let any = AnyAllocator::new(HeapAllocator);
        let copy = any.clone();
        let block = copy.try_allocate(32, 8).unwrap();
        unsafe { any.deallocate_raw(block.cast(), 32, 8) };
    }
}
