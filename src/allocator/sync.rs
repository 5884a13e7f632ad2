//! Pluggable locking for single-threaded allocators.
//!
//! Arenas in this crate use interior mutability and are not `Sync`.
//! [`LockedAllocator`] wraps one together with a [`RawMutex`] so it can be
//! shared across threads; [`NoMutex`] is the zero-cost default for
//! single-threaded use.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::allocator::traits::{Allocator, MemoryUsage, Resettable, ThreadSafeAllocator};
use crate::debug::AllocatorInfo;
use crate::error::AllocResult;

/// Minimal lock interface over which [`LockedAllocator`] is generic.
///
/// # Safety
/// `lock` must provide mutual exclusion until the matching `unlock`, and
/// `try_lock` returning `true` counts as a `lock`.
pub unsafe trait RawMutex: Default {
    fn lock(&self);
    fn unlock(&self);
    fn try_lock(&self) -> bool;
}

/// Marker for [`RawMutex`] impls that really exclude concurrent holders.
///
/// [`LockedAllocator`] is only `Sync` over an `ExclusiveMutex`.
/// [`NoMutex`] does not implement it, so its wrappers cannot leave the
/// thread they were built on:
///
/// ```compile_fail
/// use stratum::allocator::{LockedAllocator, NoMutex};
/// use stratum::arena::MemoryStack;
///
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<LockedAllocator<MemoryStack, NoMutex>>();
/// ```
///
/// # Safety
/// `lock` must block (or spin) until no other thread holds the mutex.
pub unsafe trait ExclusiveMutex: RawMutex {}

/// No-op lock for single-threaded use. Always acquires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMutex;

// SAFETY: with no concurrency there is nothing to exclude.
unsafe impl RawMutex for NoMutex {
    #[inline]
    fn lock(&self) {}
    #[inline]
    fn unlock(&self) {}
    #[inline]
    fn try_lock(&self) -> bool {
        true
    }
}

/// Spin lock, for contexts where blocking primitives are unavailable.
#[derive(Debug, Default)]
pub struct SpinMutex(spin::Mutex<()>);

// SAFETY: spin::Mutex provides mutual exclusion; we leak the guard on lock
// and reconstruct the unlock with force_unlock.
unsafe impl RawMutex for SpinMutex {
    fn lock(&self) {
        core::mem::forget(self.0.lock());
    }

    fn unlock(&self) {
        // SAFETY: called only by LockGuard after a successful lock.
        unsafe { self.0.force_unlock() };
    }

    fn try_lock(&self) -> bool {
        match self.0.try_lock() {
            Some(guard) => {
                core::mem::forget(guard);
                true
            }
            None => false,
        }
    }
}

// SAFETY: spin::Mutex blocks competing lockers until unlock.
unsafe impl ExclusiveMutex for SpinMutex {}

/// OS-backed lock via `parking_lot`, the default for multi-threaded use.
#[derive(Debug, Default)]
pub struct BlockingMutex(parking_lot::Mutex<()>);

// SAFETY: parking_lot::Mutex provides mutual exclusion; raw unlock pairs
// with the forgotten guard from lock.
unsafe impl RawMutex for BlockingMutex {
    fn lock(&self) {
        core::mem::forget(self.0.lock());
    }

    fn unlock(&self) {
        // SAFETY: called only after a successful lock on this thread.
        unsafe { self.0.force_unlock() };
    }

    fn try_lock(&self) -> bool {
        match self.0.try_lock() {
            Some(guard) => {
                core::mem::forget(guard);
                true
            }
            None => false,
        }
    }
}

// SAFETY: parking_lot::Mutex blocks competing lockers until unlock.
unsafe impl ExclusiveMutex for BlockingMutex {}

struct LockGuard<'a, M: RawMutex>(&'a M);

impl<'a, M: RawMutex> LockGuard<'a, M> {
    fn acquire(mutex: &'a M) -> Self {
        mutex.lock();
        LockGuard(mutex)
    }
}

impl<M: RawMutex> Drop for LockGuard<'_, M> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

/// Serializes access to a non-thread-safe allocator.
///
/// Every trait call acquires the mutex for its duration. With the default
/// [`NoMutex`] this compiles down to the bare allocator; with
/// [`BlockingMutex`] or [`SpinMutex`] the wrapper becomes `Sync` and
/// implements [`ThreadSafeAllocator`].
///
/// # Examples
/// ```
/// use stratum::allocator::{BlockingMutex, LockedAllocator};
/// use stratum::arena::MemoryStack;
///
/// let stack = MemoryStack::with_block_size(4096);
/// let shared: LockedAllocator<_, BlockingMutex> = LockedAllocator::new(stack);
/// std::thread::scope(|s| {
///     s.spawn(|| {
///         let _ = shared.try_allocate(64, 8);
///     });
/// });
/// ```
#[derive(Debug, Default)]
pub struct LockedAllocator<A, M: RawMutex = NoMutex> {
    inner: A,
    mutex: M,
}

impl<A, M: RawMutex> LockedAllocator<A, M> {
    /// Wraps `inner` with a freshly created mutex.
    pub fn new(inner: A) -> Self {
        LockedAllocator {
            inner,
            mutex: M::default(),
        }
    }

    /// Runs `f` with the lock held.
    pub fn with_lock<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        let _guard = LockGuard::acquire(&self.mutex);
        f(&self.inner)
    }

    /// Runs `f` with the lock held, or returns `None` if it is contended.
    pub fn try_with_lock<R>(&self, f: impl FnOnce(&A) -> R) -> Option<R> {
        if !self.mutex.try_lock() {
            return None;
        }
        let guard = LockGuard(&self.mutex);
        let result = f(&self.inner);
        drop(guard);
        Some(result)
    }

    /// Consumes the wrapper, returning the allocator.
    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Allocator, M: RawMutex> LockedAllocator<A, M> {
    /// Fallible allocation helper that holds the lock for the call.
    pub fn try_allocate(&self, size: usize, align: usize) -> AllocResult<NonNull<[u8]>> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| crate::error::AllocError::invalid_layout("size overflows alignment"))?;
        // SAFETY: locked exclusive access to the inner allocator.
        self.with_lock(|inner| unsafe { inner.allocate(layout) })
    }
}

// SAFETY: all access to the inner allocator is serialized by the mutex.
unsafe impl<A: Allocator, M: RawMutex> Allocator for LockedAllocator<A, M> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract under the lock.
        self.with_lock(|inner| unsafe { inner.allocate(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract under the lock.
        self.with_lock(|inner| unsafe { inner.deallocate(ptr, layout) })
    }

    unsafe fn allocate_at_least(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract under the lock.
        self.with_lock(|inner| unsafe { inner.allocate_at_least(layout) })
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarded caller contract under the lock.
        self.with_lock(|inner| unsafe { inner.reallocate(ptr, old_layout, new_layout) })
    }

    fn max_allocation_size(&self) -> usize {
        self.with_lock(|inner| inner.max_allocation_size())
    }

    fn info(&self) -> AllocatorInfo {
        self.with_lock(|inner| inner.info())
    }
}

impl<A: MemoryUsage, M: RawMutex> MemoryUsage for LockedAllocator<A, M> {
    fn used_memory(&self) -> usize {
        self.with_lock(|inner| inner.used_memory())
    }

    fn available_memory(&self) -> Option<usize> {
        self.with_lock(|inner| inner.available_memory())
    }
}

impl<A: Resettable, M: RawMutex> Resettable for LockedAllocator<A, M> {
    unsafe fn reset(&self) {
        // SAFETY: forwarded caller contract under the lock.
        self.with_lock(|inner| unsafe { inner.reset() })
    }
}

// SAFETY: the mutex serializes all interior mutability of A. Sync demands
// an ExclusiveMutex so a NoMutex wrapper can never be shared: without real
// mutual exclusion a Cell/RefCell-based inner allocator would race.
unsafe impl<A: Send, M: RawMutex + Send> Send for LockedAllocator<A, M> {}
unsafe impl<A: Send, M: ExclusiveMutex + Sync> Sync for LockedAllocator<A, M> {}

// SAFETY: Sync via the exclusive mutex, Send via A: Send.
unsafe impl<A: Allocator + Send, M: ExclusiveMutex + Send + Sync> ThreadSafeAllocator
    for LockedAllocator<A, M>
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;

    #[test]
    fn no_mutex_passes_through() {
        let locked: LockedAllocator<HeapAllocator> = LockedAllocator::new(HeapAllocator);
        let block = locked.try_allocate(32, 8).unwrap();
        unsafe { locked.deallocate(block.cast(), Layout::from_size_align(32, 8).unwrap()) };
    }

    #[test]
    fn only_real_mutexes_make_wrappers_shareable() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<LockedAllocator<crate::arena::MemoryStack, SpinMutex>>();
        assert_sync::<LockedAllocator<crate::arena::MemoryStack, BlockingMutex>>();
    }

    #[test]
    fn try_with_lock_reports_contention() {
        let locked: LockedAllocator<HeapAllocator, SpinMutex> =
            LockedAllocator::new(HeapAllocator);
        locked.mutex.lock();
        assert!(locked.try_with_lock(|_| ()).is_none());
        locked.mutex.unlock();
        assert!(locked.try_with_lock(|_| ()).is_some());
    }
}
