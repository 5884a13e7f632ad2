//! Allocation out of a fixed, caller-provided byte buffer.
//!
//! [`StaticStorage`] reserves the bytes (on the stack or embedded in
//! another object) and [`StaticAllocator`] bumps through them.
//! Nothing is ever returned to the buffer before the allocator is reset or
//! dropped, which makes it suitable for build-then-freeze data and for
//! environments without a heap.

use core::alloc::Layout;
use core::cell::{Cell, UnsafeCell};
use core::ptr::NonNull;

use crate::allocator::traits::{validate_layout, Allocator, MemoryUsage, Resettable};
use crate::debug::AllocatorInfo;
use crate::error::{AllocError, AllocResult};
use crate::utils::{align_up, MAX_ALIGNMENT};

/// Fixed backing storage for a [`StaticAllocator`].
///
/// The buffer is aligned to [`MAX_ALIGNMENT`], so any fundamental alignment
/// request can be served from offset zero.
#[repr(C, align(16))]
pub struct StaticStorage<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
}

// align(16) above must cover every fundamental alignment.
const _: () = assert!(MAX_ALIGNMENT <= 16);

impl<const N: usize> StaticStorage<N> {
    /// Creates zero-initialized storage.
    pub const fn new() -> Self {
        StaticStorage {
            buffer: UnsafeCell::new([0; N]),
        }
    }

    /// Capacity in bytes.
    pub const fn size(&self) -> usize {
        N
    }

    fn start(&self) -> *mut u8 {
        self.buffer.get().cast()
    }
}

impl<const N: usize> Default for StaticStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: a shared StaticStorage exposes no access to its buffer; the
// bytes are only reachable through StaticAllocator, which requires an
// exclusive borrow.
unsafe impl<const N: usize> Sync for StaticStorage<N> {}

/// Bump allocator over a [`StaticStorage`] buffer.
///
/// Allocation advances a cursor; deallocation is a no-op. The allocator
/// borrows the storage exclusively, so the storage outlives every
/// allocation and only one allocator can bump a given buffer at a time:
///
/// ```compile_fail
/// use stratum::allocator::{StaticAllocator, StaticStorage};
///
/// let mut storage = StaticStorage::<64>::new();
/// let a = StaticAllocator::new(&mut storage);
/// let b = StaticAllocator::new(&mut storage);
/// let _ = (a, b);
/// ```
///
/// # Examples
/// ```
/// use core::alloc::Layout;
/// use stratum::allocator::{Allocator, StaticAllocator, StaticStorage};
///
/// let mut storage = StaticStorage::<1024>::new();
/// let alloc = StaticAllocator::new(&mut storage);
/// let block = unsafe { alloc.allocate(Layout::new::<u64>()).unwrap() };
/// assert_eq!(block.len(), 8);
/// ```
pub struct StaticAllocator<'s> {
    start: *mut u8,
    size: usize,
    top: Cell<usize>,
    _storage: core::marker::PhantomData<&'s mut ()>,
}

impl<'s> StaticAllocator<'s> {
    /// Creates an allocator over `storage`. The cursor starts at zero.
    ///
    /// The exclusive borrow guarantees no second allocator (and no direct
    /// access) touches the buffer while this one is alive.
    pub fn new<const N: usize>(storage: &'s mut StaticStorage<N>) -> Self {
        StaticAllocator {
            start: storage.start(),
            size: N,
            top: Cell::new(0),
            _storage: core::marker::PhantomData,
        }
    }

    /// Bytes consumed so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.top.get()
    }

    /// Bytes remaining for an alignment-1 request.
    pub fn remaining(&self) -> usize {
        self.size - self.top.get()
    }
}

// SAFETY: bump allocation from an exclusive buffer; each block is disjoint
// because the cursor only moves forward.
unsafe impl Allocator for StaticAllocator<'_> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        validate_layout(layout)?;

        let base = self.start as usize;
        let cursor = base + self.top.get();
        let aligned = align_up(cursor, layout.align());
        let end = aligned
            .checked_add(layout.size())
            .ok_or_else(|| AllocError::size_overflow("static buffer cursor"))?;

        if end > base + self.size {
            return Err(AllocError::exhausted("static buffer"));
        }

        self.top.set(end - base);
        // SAFETY: aligned lies within the live buffer and is non-null.
        let ptr = unsafe { NonNull::new_unchecked(aligned as *mut u8) };
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // Individual deallocation is not supported; memory is reclaimed on
        // reset or when the storage goes out of scope.
    }

    fn max_allocation_size(&self) -> usize {
        self.size
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::with_address("StaticAllocator", self)
    }
}

impl MemoryUsage for StaticAllocator<'_> {
    fn used_memory(&self) -> usize {
        self.top.get()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.remaining())
    }
}

impl Resettable for StaticAllocator<'_> {
    unsafe fn reset(&self) {
        self.top.set(0);
    }
}
