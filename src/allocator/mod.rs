//! Allocator traits and the low-level allocators built on them.

mod heap;
mod reference;
mod static_buf;
mod sync;
mod tracked;
mod traits;

pub use heap::HeapAllocator;
#[cfg(windows)]
pub use heap::Win32HeapAllocator;
pub use reference::{AnyAllocator, ErasedAllocator, SharedAllocator};
pub use static_buf::{StaticAllocator, StaticStorage};
pub use sync::{BlockingMutex, ExclusiveMutex, LockedAllocator, NoMutex, RawMutex, SpinMutex};
pub use tracked::TrackedAllocator;
pub use traits::{
    Allocator, MemoryUsage, PropagationPolicy, Resettable, ThreadSafeAllocator,
};
