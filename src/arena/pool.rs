//! Fixed-size node pool.
//!
//! [`MemoryPool`] carves upstream blocks into equally sized nodes and
//! hands them out in O(free-map scan) with no per-node header. Free nodes
//! are tracked in a per-block bitmap, which keeps freed memory untouched
//! and makes contiguous-run searches for array allocation cheap.

use core::alloc::Layout;
use core::cell::RefCell;
use core::ptr::NonNull;

use crate::allocator::{Allocator, HeapAllocator, MemoryUsage, Resettable};
use crate::debug::{AllocatorInfo, ALLOC_PATTERN, FREED_PATTERN};
use crate::error::{oom_abort, AllocError, AllocResult};
use crate::utils::{align_up, is_pointer_in_range, MAX_ALIGNMENT};

const GROWTH_FACTOR: usize = 2;

const BITS: usize = u64::BITS as usize;

/// Debug-fill behavior of a [`MemoryPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Byte written over freshly allocated runs, if any.
    pub alloc_pattern: Option<u8>,
    /// Byte written over deallocated runs, if any.
    pub free_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::debug()
        } else {
            Self::production()
        }
    }
}

impl PoolConfig {
    /// No fill patterns.
    pub fn production() -> Self {
        Self {
            alloc_pattern: None,
            free_pattern: None,
        }
    }

    /// Fill fresh runs with [`ALLOC_PATTERN`] and freed runs with
    /// [`FREED_PATTERN`] so stale reads stand out.
    pub fn debug() -> Self {
        Self {
            alloc_pattern: Some(ALLOC_PATTERN),
            free_pattern: Some(FREED_PATTERN),
        }
    }
}

/// Alignment a pool of `node_size` guarantees for every node.
const fn node_alignment(node_size: usize) -> usize {
    if node_size >= MAX_ALIGNMENT {
        MAX_ALIGNMENT
    } else {
        node_size.next_power_of_two()
    }
}

struct PoolBlock {
    ptr: NonNull<u8>,
    nodes: usize,
    /// Bit set = node free. One bit per node, lowest index first.
    free: Vec<u64>,
    free_count: usize,
}

impl PoolBlock {
    fn is_free(&self, node: usize) -> bool {
        self.free[node / BITS] & (1 << (node % BITS)) != 0
    }

    fn mark_used(&mut self, node: usize) {
        self.free[node / BITS] &= !(1 << (node % BITS));
        self.free_count -= 1;
    }

    fn mark_free(&mut self, node: usize) {
        self.free[node / BITS] |= 1 << (node % BITS);
        self.free_count += 1;
    }

    /// Lowest free node index, if any.
    fn first_free(&self) -> Option<usize> {
        for (word_index, &word) in self.free.iter().enumerate() {
            if word != 0 {
                let node = word_index * BITS + word.trailing_zeros() as usize;
                if node < self.nodes {
                    return Some(node);
                }
            }
        }
        None
    }

    /// Lowest start of `count` consecutive free nodes, if any.
    fn first_free_run(&self, count: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_len = 0;
        for node in 0..self.nodes {
            if self.is_free(node) {
                if run_len == 0 {
                    run_start = node;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }
}

struct PoolInner {
    blocks: Vec<PoolBlock>,
    next_nodes: usize,
}

/// Pool allocator for fixed-size nodes.
///
/// All nodes of one pool share a size and alignment. Node allocation never
/// touches the upstream allocator while a free node exists; the `try_`
/// variants additionally refuse to grow, reporting exhaustion instead.
///
/// Array allocation ([`MemoryPool::allocate_array`]) finds the lowest
/// addressed run of contiguous free nodes, so interleaved node churn does
/// not permanently fragment the pool.
///
/// # Examples
/// ```
/// use stratum::arena::MemoryPool;
/// use stratum::allocator::HeapAllocator;
///
/// let pool = MemoryPool::new(32, MemoryPool::<HeapAllocator>::min_block_size(32, 16));
/// let a = pool.allocate_node();
/// let b = pool.allocate_node();
/// assert_ne!(a, b);
/// unsafe {
///     pool.deallocate_node(a);
///     pool.deallocate_node(b);
/// }
/// ```
pub struct MemoryPool<A: Allocator = HeapAllocator> {
    inner: RefCell<PoolInner>,
    node_size: usize,
    stride: usize,
    config: PoolConfig,
    upstream: A,
}

impl MemoryPool<HeapAllocator> {
    /// Heap-backed pool. `block_size` bounds the first upstream block; see
    /// [`MemoryPool::min_block_size`] for the size needed to hold a given
    /// node count.
    pub fn new(node_size: usize, block_size: usize) -> Self {
        Self::with_upstream(node_size, block_size, HeapAllocator)
    }
}

impl<A: Allocator> MemoryPool<A> {
    /// Pool drawing its blocks from `upstream`. No memory is allocated
    /// until the first node request.
    ///
    /// # Panics
    /// Panics if `node_size` is zero.
    pub fn with_upstream(node_size: usize, block_size: usize, upstream: A) -> Self {
        Self::with_config(node_size, block_size, PoolConfig::default(), upstream)
    }

    /// Pool with an explicit [`PoolConfig`].
    ///
    /// # Panics
    /// Panics if `node_size` is zero.
    pub fn with_config(
        node_size: usize,
        block_size: usize,
        config: PoolConfig,
        upstream: A,
    ) -> Self {
        assert!(node_size > 0, "pool node size must be non-zero");
        let stride = align_up(node_size, node_alignment(node_size));
        MemoryPool {
            inner: RefCell::new(PoolInner {
                blocks: Vec::new(),
                next_nodes: (block_size / stride).max(1),
            }),
            node_size,
            stride,
            config,
            upstream,
        }
    }

    /// Smallest block size holding `node_count` nodes of `node_size`.
    pub const fn min_block_size(node_size: usize, node_count: usize) -> usize {
        align_up(node_size, node_alignment(node_size)) * node_count
    }

    /// Size passed at construction. Every node holds at least this many
    /// bytes.
    pub fn node_size(&self) -> usize {
        self.node_size
    }

    /// Alignment of every node.
    pub fn node_alignment(&self) -> usize {
        node_alignment(self.node_size)
    }

    /// Allocates one node, growing from upstream if the pool is full.
    /// Aborts the process on upstream exhaustion.
    pub fn allocate_node(&self) -> NonNull<u8> {
        match self.grow_and_allocate(1) {
            Ok(ptr) => ptr,
            Err(_) => match Layout::from_size_align(self.stride, self.node_alignment()) {
                Ok(layout) => oom_abort(layout),
                Err(_) => unreachable!("stride layout is always valid"),
            },
        }
    }

    /// Allocates one node from existing capacity. Never grows; returns an
    /// error when every node is in use.
    pub fn try_allocate_node(&self) -> AllocResult<NonNull<u8>> {
        let mut inner = self.inner.borrow_mut();
        self.take_run(&mut inner, 1)
            .ok_or_else(|| AllocError::exhausted("memory pool"))
    }

    /// Allocates `count` contiguous nodes, growing if no block holds such
    /// a run. Aborts the process on upstream exhaustion.
    ///
    /// # Panics
    /// Panics if `count` is zero.
    pub fn allocate_array(&self, count: usize) -> NonNull<u8> {
        assert!(count > 0, "array allocation of zero nodes");
        match self.grow_and_allocate(count) {
            Ok(ptr) => ptr,
            Err(_) => match Layout::from_size_align(
                self.stride.saturating_mul(count),
                self.node_alignment(),
            ) {
                Ok(layout) => oom_abort(layout),
                Err(_) => panic!("array of {count} nodes overflows layout"),
            },
        }
    }

    /// Allocates `count` contiguous nodes from existing capacity, without
    /// growing.
    pub fn try_allocate_array(&self, count: usize) -> AllocResult<NonNull<u8>> {
        assert!(count > 0, "array allocation of zero nodes");
        let mut inner = self.inner.borrow_mut();
        self.take_run(&mut inner, count)
            .ok_or_else(|| AllocError::exhausted("memory pool"))
    }

    /// Returns one node to the pool.
    ///
    /// # Panics
    /// Panics if `ptr` does not address a node of this pool, or if the
    /// node is already free.
    ///
    /// # Safety
    /// `ptr` must come from this pool's allocation methods and must not be
    /// used afterwards.
    pub unsafe fn deallocate_node(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_run(ptr, 1) };
    }

    /// Non-panicking variant of [`MemoryPool::deallocate_node`]. Returns
    /// `false` and leaves the pool untouched if `ptr` is foreign.
    ///
    /// # Safety
    /// If `ptr` belongs to this pool it must be a live node allocation.
    pub unsafe fn try_deallocate_node(&self, ptr: NonNull<u8>) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_deallocate_run(ptr, 1) }
    }

    /// Returns `count` contiguous nodes starting at `ptr` to the pool.
    ///
    /// # Panics
    /// Panics if the run does not belong to this pool or is not fully
    /// live.
    ///
    /// # Safety
    /// `ptr`/`count` must describe a live array allocation from this pool.
    pub unsafe fn deallocate_array(&self, ptr: NonNull<u8>, count: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_run(ptr, count) };
    }

    /// Non-panicking variant of [`MemoryPool::deallocate_array`].
    ///
    /// # Safety
    /// If the run belongs to this pool it must be a live array allocation.
    pub unsafe fn try_deallocate_array(&self, ptr: NonNull<u8>, count: usize) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_deallocate_run(ptr, count) }
    }

    /// Bytes allocatable without growing.
    pub fn capacity(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .blocks
            .iter()
            .map(|block| block.free_count * self.stride)
            .sum()
    }

    /// Bytes the next upstream block will provide.
    pub fn next_capacity(&self) -> usize {
        self.inner.borrow().next_nodes * self.stride
    }

    /// The upstream allocator blocks are drawn from.
    pub fn upstream(&self) -> &A {
        &self.upstream
    }

    fn grow_and_allocate(&self, count: usize) -> AllocResult<NonNull<u8>> {
        let mut inner = self.inner.borrow_mut();
        if let Some(ptr) = self.take_run(&mut inner, count) {
            return Ok(ptr);
        }

        let nodes = inner.next_nodes.max(count);
        let size = self
            .stride
            .checked_mul(nodes)
            .ok_or_else(|| AllocError::size_overflow("pool block"))?;
        let layout = Layout::from_size_align(size, self.node_alignment())
            .map_err(|_| AllocError::size_overflow("pool block layout"))?;
        // SAFETY: layout is valid; the block is owned by this pool.
        let memory = unsafe { self.upstream.allocate(layout)? };

        let words = nodes.div_ceil(BITS);
        let mut free = vec![u64::MAX; words];
        // Clear the tail bits past the last node.
        if nodes % BITS != 0 {
            free[words - 1] = (1u64 << (nodes % BITS)) - 1;
        }
        inner.blocks.push(PoolBlock {
            ptr: memory.cast(),
            nodes,
            free,
            free_count: nodes,
        });
        inner.next_nodes = nodes.saturating_mul(GROWTH_FACTOR);
        tracing::trace!(nodes, size, blocks = inner.blocks.len(), "memory pool grew");

        Ok(self
            .take_run(&mut inner, count)
            .unwrap_or_else(|| unreachable!("fresh block holds the run")))
    }

    fn take_run(&self, inner: &mut PoolInner, count: usize) -> Option<NonNull<u8>> {
        for block in &mut inner.blocks {
            if block.free_count < count {
                continue;
            }
            let start = if count == 1 {
                block.first_free()
            } else {
                block.first_free_run(count)
            };
            if let Some(start) = start {
                for node in start..start + count {
                    block.mark_used(node);
                }
                // SAFETY: start is within the live block.
                let ptr = unsafe { block.ptr.as_ptr().add(start * self.stride) };
                if let Some(pattern) = self.config.alloc_pattern {
                    // SAFETY: the run was just reserved.
                    unsafe { core::ptr::write_bytes(ptr, pattern, count * self.stride) };
                }
                // SAFETY: derived from a NonNull block pointer.
                return Some(unsafe { NonNull::new_unchecked(ptr) });
            }
        }
        None
    }

    /// # Safety
    /// Caller contract of the public deallocation methods.
    unsafe fn deallocate_run(&self, ptr: NonNull<u8>, count: usize) {
        // SAFETY: forwarded caller contract.
        let returned = unsafe { self.try_deallocate_run(ptr, count) };
        assert!(
            returned,
            "pointer {ptr:?} does not belong to this pool"
        );
    }

    /// # Safety
    /// Caller contract of the public deallocation methods.
    unsafe fn try_deallocate_run(&self, ptr: NonNull<u8>, count: usize) -> bool {
        let mut inner = self.inner.borrow_mut();
        let addr = ptr.as_ptr() as usize;
        for block in &mut inner.blocks {
            let start = block.ptr.as_ptr() as usize;
            let end = block.nodes * self.stride;
            // SAFETY: end is one past the block's last byte.
            let end_ptr = unsafe { block.ptr.as_ptr().add(end) };
            if !is_pointer_in_range(ptr.as_ptr(), block.ptr.as_ptr(), end_ptr) {
                continue;
            }
            if (addr - start) % self.stride != 0 {
                return false;
            }
            let first = (addr - start) / self.stride;
            if first + count > block.nodes {
                return false;
            }
            for node in first..first + count {
                assert!(
                    !block.is_free(node),
                    "double free of pool node at {ptr:?}"
                );
            }
            if let Some(pattern) = self.config.free_pattern {
                // SAFETY: the run lies within the live block.
                unsafe { core::ptr::write_bytes(ptr.as_ptr(), pattern, count * self.stride) };
            }
            for node in first..first + count {
                block.mark_free(node);
            }
            return true;
        }
        false
    }
}

// SAFETY: nodes are disjoint by construction; layouts up to the node
// stride and alignment map onto node allocations, larger sizes onto
// contiguous runs.
unsafe impl<A: Allocator> Allocator for MemoryPool<A> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if layout.align() > self.node_alignment() {
            return Err(AllocError::invalid_alignment(layout.align()));
        }
        if layout.size() == 0 {
            // Dangling but well-aligned, matching std::alloc conventions.
            let dangling = NonNull::new(layout.align() as *mut u8)
                .ok_or_else(|| AllocError::invalid_alignment(layout.align()))?;
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }
        let count = layout.size().div_ceil(self.stride);
        let ptr = if count == 1 {
            let mut inner = self.inner.borrow_mut();
            match self.take_run(&mut inner, 1) {
                Some(ptr) => ptr,
                None => {
                    drop(inner);
                    self.grow_and_allocate(1)?
                }
            }
        } else {
            self.grow_and_allocate(count)?
        };
        Ok(NonNull::slice_from_raw_parts(ptr, count * self.stride))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        let count = layout.size().div_ceil(self.stride);
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_run(ptr, count) };
    }

    fn max_allocation_size(&self) -> usize {
        self.upstream.max_allocation_size()
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::with_address("MemoryPool", self)
    }
}

impl<A: Allocator> MemoryUsage for MemoryPool<A> {
    fn used_memory(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .blocks
            .iter()
            .map(|block| (block.nodes - block.free_count) * self.stride)
            .sum()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }
}

impl<A: Allocator> Resettable for MemoryPool<A> {
    unsafe fn reset(&self) {
        let mut inner = self.inner.borrow_mut();
        for block in &mut inner.blocks {
            for word in &mut block.free {
                *word = u64::MAX;
            }
            let words = block.free.len();
            if block.nodes % BITS != 0 {
                block.free[words - 1] = (1u64 << (block.nodes % BITS)) - 1;
            }
            block.free_count = block.nodes;
        }
    }
}

impl<A: Allocator> Drop for MemoryPool<A> {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        for block in inner.blocks.drain(..) {
            let size = block.nodes * self.stride;
            // SAFETY: the layout matches the block allocation; dropping
            // the pool invalidates all nodes.
            unsafe {
                let layout =
                    Layout::from_size_align_unchecked(size, node_alignment(self.node_size));
                self.upstream.deallocate(block.ptr, layout);
            }
        }
    }
}

// SAFETY: the pool exclusively owns its blocks; the raw block pointers
// move with it. Interior mutability keeps it !Sync.
unsafe impl<A: Allocator + Send> Send for MemoryPool<A> {}

impl<A: Allocator> core::fmt::Debug for MemoryPool<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("node_size", &self.node_size)
            .field("stride", &self.stride)
            .field("capacity", &self.capacity())
            .finish()
    }
}
