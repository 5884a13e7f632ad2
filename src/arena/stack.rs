//! Stack-ordered arena with markers.
//!
//! [`MemoryStack`] allocates by bumping through a list of upstream blocks
//! and reclaims in LIFO order: [`MemoryStack::top`] captures a [`Marker`],
//! [`MemoryStack::unwind`] rolls every later allocation back at once.
//! Unwound blocks stay cached for reuse; [`MemoryStack::shrink_to_fit`]
//! returns them to the upstream allocator.

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use crate::allocator::{Allocator, HeapAllocator, MemoryUsage, Resettable};
use crate::debug::{AllocatorInfo, ALLOC_PATTERN, FREED_PATTERN};
use crate::error::{oom_abort, AllocError, AllocResult};
use crate::utils::{align_up, MAX_ALIGNMENT};

/// Default size of the first upstream block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Factor by which successive upstream blocks grow.
const GROWTH_FACTOR: usize = 2;

/// Debug-fill behavior of a [`MemoryStack`].
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Byte written over freshly allocated regions, if any.
    pub alloc_pattern: Option<u8>,
    /// Byte written over regions invalidated by unwinding, if any.
    pub free_pattern: Option<u8>,
}

impl Default for StackConfig {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::debug()
        } else {
            Self::production()
        }
    }
}

impl StackConfig {
    /// No fill patterns.
    pub fn production() -> Self {
        Self {
            alloc_pattern: None,
            free_pattern: None,
        }
    }

    /// Fill fresh memory with [`ALLOC_PATTERN`] and unwound memory with
    /// [`FREED_PATTERN`] so stale reads stand out.
    pub fn debug() -> Self {
        Self {
            alloc_pattern: Some(ALLOC_PATTERN),
            free_pattern: Some(FREED_PATTERN),
        }
    }
}

/// Position in a [`MemoryStack`], captured by [`MemoryStack::top`].
///
/// Markers from one stack are totally ordered: a marker taken later
/// compares greater than (or equal to, if nothing was allocated in
/// between) one taken earlier. Unwinding is only valid toward smaller
/// markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Marker {
    index: usize,
    offset: usize,
}

struct Block {
    ptr: NonNull<u8>,
    size: usize,
}

impl Block {
    fn layout(&self) -> Layout {
        // SAFETY: the block was allocated with exactly this layout.
        unsafe { Layout::from_size_align_unchecked(self.size, MAX_ALIGNMENT) }
    }

    fn start(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

/// Arena with stack-ordered reclamation.
///
/// Allocation bumps a cursor through the current block, advancing to a
/// cached or freshly allocated block when the current one is exhausted.
/// Block sizes double with each upstream allocation.
///
/// Individual allocations are never freed; memory returns in bulk through
/// [`MemoryStack::unwind`] or when the stack is dropped.
///
/// # Examples
/// ```
/// use stratum::arena::MemoryStack;
///
/// let stack = MemoryStack::with_block_size(1024);
/// let before = stack.top();
/// let a = stack.allocate(100, 8);
/// let b = stack.allocate(200, 8);
/// assert_ne!(a, b);
/// stack.unwind(before);
/// assert_eq!(stack.top(), before);
/// ```
pub struct MemoryStack<A: Allocator = HeapAllocator> {
    blocks: RefCell<Vec<Block>>,
    index: Cell<usize>,
    offset: Cell<usize>,
    next_size: Cell<usize>,
    config: StackConfig,
    upstream: A,
}

impl MemoryStack<HeapAllocator> {
    /// Heap-backed stack with the default initial block size.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Heap-backed stack whose first block holds `block_size` bytes.
    pub fn with_block_size(block_size: usize) -> Self {
        Self::with_upstream(block_size, HeapAllocator)
    }
}

impl Default for MemoryStack<HeapAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator> MemoryStack<A> {
    /// Stack drawing its blocks from `upstream`. No memory is allocated
    /// until the first allocation request.
    pub fn with_upstream(block_size: usize, upstream: A) -> Self {
        Self::with_config(block_size, StackConfig::default(), upstream)
    }

    /// Stack with an explicit [`StackConfig`].
    pub fn with_config(block_size: usize, config: StackConfig, upstream: A) -> Self {
        MemoryStack {
            blocks: RefCell::new(Vec::new()),
            index: Cell::new(0),
            offset: Cell::new(0),
            next_size: Cell::new(block_size.max(MAX_ALIGNMENT)),
            config,
            upstream,
        }
    }

    /// Smallest block size able to serve one allocation of `byte_size`
    /// bytes at any fundamental alignment.
    pub const fn min_block_size(byte_size: usize) -> usize {
        // Blocks are MAX_ALIGNMENT-aligned, so no leading padding is ever
        // needed for fundamental alignments.
        align_up(byte_size, MAX_ALIGNMENT)
    }

    /// Allocates `size` bytes at `align`. Aborts the process on upstream
    /// exhaustion; use [`MemoryStack::try_allocate`] to observe failure.
    pub fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        match self.try_allocate(size, align) {
            Ok(ptr) => ptr,
            Err(_) => match Layout::from_size_align(size, align) {
                Ok(layout) => oom_abort(layout),
                Err(_) => panic!("invalid allocation request: size {size}, align {align}"),
            },
        }
    }

    /// Fallible variant of [`MemoryStack::allocate`].
    pub fn try_allocate(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(AllocError::invalid_alignment(align));
        }

        loop {
            if let Some(ptr) = self.bump_current(size, align)? {
                return Ok(ptr);
            }
            self.advance_block(size, align)?;
        }
    }

    /// Current position. Allocating moves the top strictly upward, so a
    /// marker taken afterwards compares greater.
    pub fn top(&self) -> Marker {
        Marker {
            index: self.index.get(),
            offset: self.offset.get(),
        }
    }

    /// Rolls the stack back to `marker`, invalidating every allocation
    /// made since it was captured. Blocks emptied by the unwind stay
    /// cached for future allocations.
    ///
    /// # Panics
    /// Panics if `marker` lies above the current top or does not belong to
    /// this stack (detection of foreign markers is best-effort).
    ///
    /// # Safety note
    /// The memory behind invalidated pointers may be reused by later
    /// allocations; callers must not touch them afterwards. Taking `&self`
    /// keeps this safe-to-call because the stack only ever hands out raw
    /// pointers, never references tied to its lifetime.
    pub fn unwind(&self, marker: Marker) {
        let top = self.top();
        assert!(
            marker <= top,
            "cannot unwind forward: marker {marker:?} is above top {top:?}"
        );

        let blocks = self.blocks.borrow();
        assert!(
            marker.index < blocks.len() || (marker.index == 0 && marker.offset == 0),
            "marker does not belong to this stack"
        );
        if marker.index < blocks.len() {
            assert!(
                marker.offset <= blocks[marker.index].size,
                "marker does not belong to this stack"
            );
        }

        if let Some(pattern) = self.config.free_pattern {
            self.fill_unwound(&blocks, marker, pattern);
        }
        drop(blocks);

        self.index.set(marker.index);
        self.offset.set(marker.offset);
    }

    /// Returns cached blocks above the current position to the upstream
    /// allocator. Live allocations are unaffected.
    pub fn shrink_to_fit(&self) {
        let mut blocks = self.blocks.borrow_mut();
        let keep = if blocks.is_empty() {
            0
        } else {
            self.index.get() + 1
        };
        while blocks.len() > keep {
            let block = match blocks.pop() {
                Some(block) => block,
                None => break,
            };
            // SAFETY: the block is above the cursor, so nothing live
            // points into it.
            unsafe { self.upstream.deallocate(block.ptr, block.layout()) };
        }
    }

    /// Bytes still available without touching the upstream allocator:
    /// the rest of the current block plus all cached blocks.
    pub fn capacity(&self) -> usize {
        let blocks = self.blocks.borrow();
        if blocks.is_empty() {
            return 0;
        }
        let index = self.index.get();
        let mut capacity = blocks[index].size - self.offset.get();
        for block in &blocks[index + 1..] {
            capacity += block.size;
        }
        capacity
    }

    /// The upstream allocator blocks are drawn from.
    pub fn upstream(&self) -> &A {
        &self.upstream
    }

    fn bump_current(&self, size: usize, align: usize) -> AllocResult<Option<NonNull<u8>>> {
        let blocks = self.blocks.borrow();
        let index = self.index.get();
        let block = match blocks.get(index) {
            Some(block) => block,
            None => return Ok(None),
        };

        let cursor = block.start() + self.offset.get();
        let aligned = align_up(cursor, align);
        let end = aligned
            .checked_add(size)
            .ok_or_else(|| AllocError::size_overflow("stack cursor"))?;
        if end > block.start() + block.size {
            return Ok(None);
        }

        self.offset.set(end - block.start());
        let ptr = aligned as *mut u8;
        if let Some(pattern) = self.config.alloc_pattern {
            if size > 0 {
                // SAFETY: the region was just reserved from the live block.
                unsafe { core::ptr::write_bytes(ptr, pattern, size) };
            }
        }
        // SAFETY: aligned points into a live block, hence non-null.
        Ok(Some(unsafe { NonNull::new_unchecked(ptr) }))
    }

    fn advance_block(&self, size: usize, align: usize) -> AllocResult<()> {
        let mut blocks = self.blocks.borrow_mut();
        // Worst case the request needs `align - 1` bytes of padding when
        // `align` exceeds the block alignment.
        let needed = size
            .checked_add(align.saturating_sub(MAX_ALIGNMENT))
            .ok_or_else(|| AllocError::size_overflow("block size"))?;

        let next = if blocks.is_empty() { 0 } else { self.index.get() + 1 };
        if let Some(block) = blocks.get(next) {
            if block.size >= needed {
                self.index.set(next);
                self.offset.set(0);
                return Ok(());
            }
            // The cached block is too small for this request. Replace it
            // and everything after it with one large enough; keeping them
            // would break the monotonic marker order.
            while blocks.len() > next {
                let block = match blocks.pop() {
                    Some(block) => block,
                    None => break,
                };
                // SAFETY: blocks above the cursor hold no live data.
                unsafe { self.upstream.deallocate(block.ptr, block.layout()) };
            }
        }

        let block_size = self.next_size.get().max(Self::min_block_size(needed));
        let layout = Layout::from_size_align(block_size, MAX_ALIGNMENT)
            .map_err(|_| AllocError::size_overflow("block layout"))?;
        // SAFETY: layout is valid; the block is owned by this stack.
        let memory = unsafe { self.upstream.allocate(layout)? };
        blocks.push(Block {
            ptr: memory.cast(),
            size: block_size,
        });
        tracing::trace!(block_size, blocks = blocks.len(), "memory stack grew");
        self.next_size
            .set(block_size.saturating_mul(GROWTH_FACTOR));
        self.index.set(blocks.len() - 1);
        self.offset.set(0);
        Ok(())
    }

    fn fill_unwound(&self, blocks: &[Block], marker: Marker, pattern: u8) {
        let top_index = self.index.get();
        for (i, block) in blocks
            .iter()
            .enumerate()
            .take(top_index + 1)
            .skip(marker.index)
        {
            let from = if i == marker.index { marker.offset } else { 0 };
            let to = if i == top_index {
                self.offset.get()
            } else {
                block.size
            };
            if to > from {
                // SAFETY: [from, to) was previously handed out from this
                // live block and is being invalidated now.
                unsafe {
                    core::ptr::write_bytes(block.ptr.as_ptr().add(from), pattern, to - from)
                };
            }
        }
    }
}

// SAFETY: bump allocation; blocks are exclusively owned and every returned
// region is disjoint. Deallocation is deferred to unwind/drop, which the
// no-op deallocate documents.
unsafe impl<A: Allocator> Allocator for MemoryStack<A> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        let ptr = self.try_allocate(layout.size(), layout.align())?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // Stack memory is reclaimed through unwind, not per allocation.
    }

    fn max_allocation_size(&self) -> usize {
        self.upstream.max_allocation_size()
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::with_address("MemoryStack", self)
    }
}

impl<A: Allocator> MemoryUsage for MemoryStack<A> {
    fn used_memory(&self) -> usize {
        let blocks = self.blocks.borrow();
        if blocks.is_empty() {
            return 0;
        }
        let mut used = self.offset.get();
        for block in &blocks[..self.index.get()] {
            used += block.size;
        }
        used
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }
}

impl<A: Allocator> Resettable for MemoryStack<A> {
    unsafe fn reset(&self) {
        self.unwind(Marker {
            index: 0,
            offset: 0,
        });
    }
}

impl<A: Allocator> Drop for MemoryStack<A> {
    fn drop(&mut self) {
        let mut blocks = self.blocks.borrow_mut();
        for block in blocks.drain(..) {
            // SAFETY: dropping the stack invalidates all its allocations.
            unsafe { self.upstream.deallocate(block.ptr, block.layout()) };
        }
    }
}

// SAFETY: the stack exclusively owns its blocks; the raw block pointers
// move with it. Interior mutability keeps it !Sync.
unsafe impl<A: Allocator + Send> Send for MemoryStack<A> {}

impl<A: Allocator> core::fmt::Debug for MemoryStack<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryStack")
            .field("top", &self.top())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_strictly_ordered() {
        let stack = MemoryStack::with_block_size(512);
        let m0 = stack.top();
        stack.allocate(64, 8);
        let m1 = stack.top();
        stack.allocate(64, 8);
        let m2 = stack.top();
        assert!(m0 < m1 && m1 < m2);
    }

    #[test]
    fn unwind_restores_position() {
        let stack = MemoryStack::with_block_size(512);
        stack.allocate(32, 8);
        let marker = stack.top();
        stack.allocate(128, 8);
        stack.unwind(marker);
        assert_eq!(stack.top(), marker);
    }

    #[test]
    #[should_panic(expected = "cannot unwind forward")]
    fn unwind_forward_panics() {
        let stack = MemoryStack::with_block_size(512);
        let early = stack.top();
        stack.allocate(32, 8);
        let late = stack.top();
        stack.unwind(early);
        stack.unwind(late);
    }

    #[test]
    fn grows_across_blocks() {
        let stack = MemoryStack::with_block_size(128);
        for _ in 0..10 {
            stack.allocate(100, 8);
        }
        assert!(stack.used_memory() >= 1000);
    }

    #[test]
    fn unwound_blocks_stay_cached() {
        let stack = MemoryStack::with_block_size(64);
        let origin = stack.top();
        for _ in 0..8 {
            stack.allocate(64, 8);
        }
        stack.unwind(origin);
        assert!(stack.capacity() >= 64 * 8);
    }

    #[test]
    fn shrink_to_fit_releases_cached_blocks() {
        let stack = MemoryStack::with_block_size(64);
        let origin = stack.top();
        for _ in 0..8 {
            stack.allocate(64, 8);
        }
        stack.unwind(origin);
        stack.shrink_to_fit();
        assert!(stack.capacity() <= 64);
    }

    #[test]
    fn debug_config_fills_unwound_memory() {
        let stack = MemoryStack::with_config(256, StackConfig::debug(), HeapAllocator);
        let marker = stack.top();
        let ptr = stack.allocate(16, 8);
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0xAB, 16) };
        stack.unwind(marker);
        // The block stays cached in the stack, so the bytes are readable,
        // just stale.
        assert_eq!(unsafe { ptr.as_ptr().read() }, FREED_PATTERN);
    }

    #[test]
    fn respects_alignment() {
        let stack = MemoryStack::with_block_size(512);
        stack.allocate(1, 1);
        let ptr = stack.allocate(16, 64);
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
    }
}
