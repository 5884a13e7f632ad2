//! Composable memory allocators, arenas and allocator-aware containers.
//!
//! The crate is organized in three layers:
//!
//! - **Allocators** ([`allocator`]): the [`Allocator`](allocator::Allocator)
//!   trait and the low-level sources that implement it, from the plain
//!   process heap to fixed static buffers, plus wrappers for tracking,
//!   locking, sharing and type erasure.
//! - **Arenas** ([`arena`]): bulk-reclaimed allocators layered on any
//!   upstream source: the marker-based [`MemoryStack`](arena::MemoryStack),
//!   fixed-node [`MemoryPool`](arena::MemoryPool), size-classed
//!   [`MemoryPoolList`](arena::MemoryPoolList) and per-thread
//!   [`TemporaryAllocator`](arena::TemporaryAllocator).
//! - **Containers** ([`containers`]): [`StaticVec`](containers::StaticVec)
//!   with inline storage and the allocator-aware
//!   [`Vector`](containers::Vector), built on the raw-memory primitives in
//!   [`uninit`].
//!
//! # Quick start
//!
//! ```
//! use stratum::arena::MemoryStack;
//! use stratum::containers::Vector;
//!
//! let arena = MemoryStack::with_block_size(4096);
//! let frame = arena.top();
//!
//! let mut scores = Vector::new_in(&arena);
//! scores.extend_from_slice(&[10, 25, 40]);
//! assert_eq!(scores.iter().sum::<i32>(), 75);
//!
//! drop(scores);
//! arena.unwind(frame);
//! ```
//!
//! # Error handling
//!
//! Trait-level operations return [`AllocResult`](error::AllocResult).
//! Convenience paths that have no room for an error (`Vector::push`,
//! `MemoryStack::allocate`) log the failed layout and abort the process;
//! every such path has a `try_` sibling that surfaces the
//! [`AllocError`](error::AllocError) instead. Misuse of a safe API, such
//! as unwinding a stack forward or indexing past the end, panics.

pub mod allocator;
pub mod arena;
pub mod containers;
pub mod debug;
pub mod error;
pub mod uninit;
pub mod utils;

/// Strictest alignment the allocators in this crate guarantee without an
/// explicit alignment request.
pub use utils::MAX_ALIGNMENT;

/// The commonly used subset of the crate.
pub mod prelude {
    pub use crate::allocator::{
        Allocator, HeapAllocator, MemoryUsage, PropagationPolicy, Resettable,
    };
    pub use crate::arena::{MemoryPool, MemoryStack, StackUnwinder, TemporaryAllocator};
    pub use crate::containers::{StaticVec, Vector};
    pub use crate::error::{AllocError, AllocResult};
}
