//! Per-thread scratch allocation.
//!
//! Each thread owns a lazily created [`MemoryStack`];
//! [`TemporaryAllocator`] opens a scope on it, and dropping the scope
//! unwinds everything allocated inside. Scopes must nest strictly, which
//! the drop order of local variables already guarantees.

use core::alloc::Layout;
use core::cell::Cell;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::allocator::{Allocator, HeapAllocator};
use crate::arena::stack::{Marker, MemoryStack};
use crate::debug::AllocatorInfo;
use crate::error::AllocResult;

/// First-block size of a thread's scratch stack unless overridden with
/// [`TemporaryAllocator::set_initial_size`].
pub const DEFAULT_TEMP_STACK_SIZE: usize = 16 * 1024;

static INITIAL_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_TEMP_STACK_SIZE);

thread_local! {
    static TEMP_STACK: MemoryStack<HeapAllocator> =
        MemoryStack::with_block_size(INITIAL_SIZE.load(Ordering::Relaxed));
    static TEMP_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Scope on the calling thread's scratch stack.
///
/// Allocations live until the scope is dropped; the drop unwinds the
/// thread's stack back to where the scope began. Scopes are strictly
/// LIFO and tied to their thread, so the type is neither `Send` nor
/// `Sync`.
///
/// # Examples
/// ```
/// use stratum::arena::TemporaryAllocator;
///
/// let tmp = TemporaryAllocator::new();
/// let buf = tmp.allocate(1024, 8);
/// // use buf for scratch work...
/// drop(tmp); // buf is invalid from here
/// # let _ = buf;
/// ```
pub struct TemporaryAllocator {
    marker: Marker,
    depth: usize,
    _not_send: PhantomData<*mut u8>,
}

impl TemporaryAllocator {
    /// Opens a scope on this thread's scratch stack.
    pub fn new() -> Self {
        let marker = TEMP_STACK.with(|stack| stack.top());
        let depth = TEMP_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current + 1);
            current
        });
        TemporaryAllocator {
            marker,
            depth,
            _not_send: PhantomData,
        }
    }

    /// Allocates scratch memory valid until this scope is dropped. Aborts
    /// the process on upstream exhaustion.
    pub fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        TEMP_STACK.with(|stack| stack.allocate(size, align))
    }

    /// Fallible variant of [`TemporaryAllocator::allocate`].
    pub fn try_allocate(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        TEMP_STACK.with(|stack| stack.try_allocate(size, align))
    }

    /// Bytes this thread's scratch stack can serve without growing.
    pub fn capacity() -> usize {
        TEMP_STACK.with(|stack| stack.capacity())
    }

    /// Sets the first-block size of scratch stacks created after this
    /// call, returning the previous value.
    ///
    /// Threads whose stack already exists keep their block size, so the
    /// override is best installed before any scope is opened, like the
    /// misuse handlers in [`crate::debug`].
    pub fn set_initial_size(bytes: usize) -> usize {
        INITIAL_SIZE.swap(bytes, Ordering::Relaxed)
    }

    /// First-block size freshly created scratch stacks will use.
    pub fn initial_size() -> usize {
        INITIAL_SIZE.load(Ordering::Relaxed)
    }
}

impl Default for TemporaryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TemporaryAllocator {
    fn drop(&mut self) {
        TEMP_DEPTH.with(|depth| {
            assert_eq!(
                depth.get(),
                self.depth + 1,
                "temporary scopes must be dropped in LIFO order"
            );
            depth.set(self.depth);
        });
        TEMP_STACK.with(|stack| stack.unwind(self.marker));
    }
}

// SAFETY: bump allocation on the thread-local stack; dropping the scope
// invalidates its allocations, which the no-op deallocate reflects.
unsafe impl Allocator for TemporaryAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        let ptr = self.try_allocate(layout.size(), layout.align())?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // Scratch memory is reclaimed when the scope drops.
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::new("TemporaryAllocator")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_reclaims_on_drop() {
        let before = TEMP_STACK.with(|stack| stack.top());
        {
            let tmp = TemporaryAllocator::new();
            tmp.allocate(512, 8);
            assert_ne!(TEMP_STACK.with(|stack| stack.top()), before);
        }
        assert_eq!(TEMP_STACK.with(|stack| stack.top()), before);
    }

    #[test]
    fn scopes_nest() {
        let outer = TemporaryAllocator::new();
        let a = outer.allocate(64, 8);
        {
            let inner = TemporaryAllocator::new();
            let b = inner.allocate(64, 8);
            assert_ne!(a, b);
        }
        // The outer allocation is still live after the inner scope ends.
        let c = outer.allocate(64, 8);
        assert_ne!(a, c);
    }

    #[test]
    fn initial_size_applies_to_new_threads() {
        let previous = TemporaryAllocator::set_initial_size(64 * 1024);
        let capacity = std::thread::spawn(|| {
            let tmp = TemporaryAllocator::new();
            tmp.allocate(8, 8);
            TemporaryAllocator::capacity()
        })
        .join();
        TemporaryAllocator::set_initial_size(previous);
        let capacity = match capacity {
            Ok(capacity) => capacity,
            Err(_) => panic!("worker thread panicked"),
        };
        assert!(capacity >= 64 * 1024 - 64);
    }

    #[test]
    fn threads_get_independent_stacks() {
        let tmp = TemporaryAllocator::new();
        let here = tmp.allocate(64, 8).as_ptr() as usize;
        let there = std::thread::spawn(|| {
            let tmp = TemporaryAllocator::new();
            tmp.allocate(64, 8).as_ptr() as usize
        });
        let there = match there.join() {
            Ok(addr) => addr,
            Err(_) => panic!("worker thread panicked"),
        };
        assert_ne!(here, there);
    }
}
