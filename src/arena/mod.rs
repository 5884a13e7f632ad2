//! Arena-style allocators: stack, pool, pool list and thread-local
//! scratch.

mod pool;
mod pool_list;
mod stack;
mod temporary;
mod unwinder;

pub use pool::{MemoryPool, PoolConfig};
pub use pool_list::{index_from_size, size_from_index, MemoryPoolList};
pub use stack::{Marker, MemoryStack, StackConfig, DEFAULT_BLOCK_SIZE};
pub use temporary::{TemporaryAllocator, DEFAULT_TEMP_STACK_SIZE};
pub use unwinder::StackUnwinder;
