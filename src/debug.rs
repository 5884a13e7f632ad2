//! Debug instrumentation shared by the allocators: fence bytes, fill
//! patterns, leak accounting and the process-wide misuse handlers.
//!
//! All fencing and filling compiles away in release builds; the handler
//! registry is always present so embedders can observe leak reports coming
//! from instrumented allocators.

use core::fmt;
use core::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::utils::atomic_max;

/// Byte pattern written over freshly allocated memory in debug builds.
pub const ALLOC_PATTERN: u8 = 0xCC;
/// Byte pattern written over deallocated memory in debug builds.
pub const FREED_PATTERN: u8 = 0xDD;
/// Byte pattern used for the fences around debug allocations.
pub const FENCE_PATTERN: u8 = 0xFD;

/// Size of one fence in bytes. Zero in release builds, where fencing is
/// compiled out entirely.
pub const FENCE_SIZE: usize = if cfg!(debug_assertions) {
    core::mem::size_of::<usize>()
} else {
    0
};

/// Adds the fence overhead to a user-requested size.
#[inline]
pub const fn fenced_size(size: usize) -> usize {
    size + 2 * FENCE_SIZE
}

/// Identifies an allocator in diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorInfo {
    /// Human-readable allocator name.
    pub name: &'static str,
    /// Address of the allocator instance, if it is stateful.
    pub address: Option<usize>,
}

impl AllocatorInfo {
    /// Info for a stateless allocator.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            address: None,
        }
    }

    /// Info for a stateful allocator instance.
    pub fn with_address<T>(name: &'static str, instance: &T) -> Self {
        Self {
            name,
            address: Some(instance as *const T as usize),
        }
    }
}

impl fmt::Display for AllocatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "allocator {} (at {addr:#x})", self.name),
            None => write!(f, "allocator {}", self.name),
        }
    }
}

/// Called when an instrumented allocator is dropped with a non-zero net
/// byte count. Positive means leaked bytes, negative means more bytes were
/// deallocated than ever allocated.
pub type LeakHandler = fn(&AllocatorInfo, isize);

/// Called when a deallocation receives a pointer the allocator never
/// produced, or one whose fence bytes are missing.
pub type InvalidPointerHandler = fn(&AllocatorInfo, *const u8);

/// Called when the trailing fence of an allocation was overwritten.
/// Arguments: start of the allocation, its usable size, address of the
/// corrupted byte.
pub type BufferOverflowHandler = fn(*const u8, usize, *const u8);

fn default_leak_handler(info: &AllocatorInfo, amount: isize) {
    if amount > 0 {
        tracing::error!(%info, amount, "leaked bytes detected at teardown");
    } else {
        tracing::error!(%info, amount, "deallocated more bytes than ever allocated");
    }
    std::process::abort()
}

fn default_invalid_pointer_handler(info: &AllocatorInfo, ptr: *const u8) {
    tracing::error!(%info, ptr = ptr as usize, "deallocation received invalid pointer");
    std::process::abort()
}

fn default_buffer_overflow_handler(memory: *const u8, node_size: usize, ptr: *const u8) {
    tracing::error!(
        memory = memory as usize,
        node_size,
        corrupted = ptr as usize,
        "buffer overflow detected on deallocation"
    );
    std::process::abort()
}

static LEAK_HANDLER: RwLock<LeakHandler> = parking_lot::const_rwlock(default_leak_handler);
static INVALID_POINTER_HANDLER: RwLock<InvalidPointerHandler> =
    parking_lot::const_rwlock(default_invalid_pointer_handler);
static BUFFER_OVERFLOW_HANDLER: RwLock<BufferOverflowHandler> =
    parking_lot::const_rwlock(default_buffer_overflow_handler);

/// Replaces the process-wide leak handler, returning the previous one.
///
/// Must be installed before the first instrumented allocator is dropped;
/// the default reports through `tracing` and aborts.
pub fn set_leak_handler(handler: LeakHandler) -> LeakHandler {
    core::mem::replace(&mut *LEAK_HANDLER.write(), handler)
}

/// Returns the current leak handler.
pub fn leak_handler() -> LeakHandler {
    *LEAK_HANDLER.read()
}

/// Replaces the process-wide invalid-pointer handler, returning the
/// previous one.
pub fn set_invalid_pointer_handler(handler: InvalidPointerHandler) -> InvalidPointerHandler {
    core::mem::replace(&mut *INVALID_POINTER_HANDLER.write(), handler)
}

/// Returns the current invalid-pointer handler.
pub fn invalid_pointer_handler() -> InvalidPointerHandler {
    *INVALID_POINTER_HANDLER.read()
}

/// Replaces the process-wide buffer-overflow handler, returning the
/// previous one.
pub fn set_buffer_overflow_handler(handler: BufferOverflowHandler) -> BufferOverflowHandler {
    core::mem::replace(&mut *BUFFER_OVERFLOW_HANDLER.write(), handler)
}

/// Returns the current buffer-overflow handler.
pub fn buffer_overflow_handler() -> BufferOverflowHandler {
    *BUFFER_OVERFLOW_HANDLER.read()
}

/// Net live-byte counter for one instrumented allocator.
///
/// `on_allocate`/`on_deallocate` record raw byte counts; [`LeakCounter::check`]
/// reports any imbalance to the leak handler.
#[derive(Debug, Default)]
pub struct LeakCounter {
    net: AtomicIsize,
    peak: AtomicUsize,
}

impl LeakCounter {
    /// A counter starting at zero.
    pub const fn new() -> Self {
        Self {
            net: AtomicIsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Records `bytes` allocated.
    #[inline]
    pub fn on_allocate(&self, bytes: usize) {
        let net = self.net.fetch_add(bytes as isize, Ordering::Relaxed) + bytes as isize;
        if net > 0 {
            atomic_max(&self.peak, net as usize);
        }
    }

    /// Records `bytes` deallocated.
    #[inline]
    pub fn on_deallocate(&self, bytes: usize) {
        self.net.fetch_sub(bytes as isize, Ordering::Relaxed);
    }

    /// Current net live bytes (positive means outstanding allocations).
    #[inline]
    pub fn live_bytes(&self) -> isize {
        self.net.load(Ordering::Relaxed)
    }

    /// Highest net live-byte count observed so far.
    #[inline]
    pub fn peak_bytes(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Invokes the leak handler if the counter is non-zero.
    pub fn check(&self, info: &AllocatorInfo) {
        let net = self.live_bytes();
        if net != 0 {
            leak_handler()(info, net);
        }
    }
}

/// Writes the leading fence, fills the user region with the allocation
/// pattern and writes the trailing fence. Returns the user pointer.
///
/// `memory` must point to at least [`fenced_size`]`(size)` writable bytes.
///
/// # Safety
/// `memory` must be valid for writes of `fenced_size(size)` bytes.
#[inline]
pub unsafe fn debug_fill_new(memory: *mut u8, size: usize) -> *mut u8 {
    if FENCE_SIZE == 0 {
        return memory;
    }
    // SAFETY: caller guarantees the fenced region is writable.
    unsafe {
        core::ptr::write_bytes(memory, FENCE_PATTERN, FENCE_SIZE);
        let user = memory.add(FENCE_SIZE);
        core::ptr::write_bytes(user, ALLOC_PATTERN, size);
        core::ptr::write_bytes(user.add(size), FENCE_PATTERN, FENCE_SIZE);
        user
    }
}

/// Verifies both fences around `user`, fills the region with the freed
/// pattern and returns the start of the fenced region.
///
/// Fence corruption after the user region reports through the
/// buffer-overflow handler; corruption before it reports through the
/// invalid-pointer handler (the pointer itself is suspect).
///
/// # Safety
/// `user` must have been produced by [`debug_fill_new`] with the same `size`.
#[inline]
pub unsafe fn debug_fill_free(user: *mut u8, size: usize, info: &AllocatorInfo) -> *mut u8 {
    if FENCE_SIZE == 0 {
        return user;
    }
    // SAFETY: caller guarantees user came from debug_fill_new(size), so the
    // fenced region surrounds it.
    unsafe {
        let memory = user.sub(FENCE_SIZE);
        for i in 0..FENCE_SIZE {
            if *memory.add(i) != FENCE_PATTERN {
                invalid_pointer_handler()(info, user);
                break;
            }
        }
        let trailing = user.add(size);
        for i in 0..FENCE_SIZE {
            if *trailing.add(i) != FENCE_PATTERN {
                buffer_overflow_handler()(memory, size, trailing.add(i));
                break;
            }
        }
        core::ptr::write_bytes(user, FREED_PATTERN, size);
        memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_round_trip() {
        let mut buffer = vec![0u8; fenced_size(16)];
        let info = AllocatorInfo::new("test");
        unsafe {
            let user = debug_fill_new(buffer.as_mut_ptr(), 16);
            if FENCE_SIZE > 0 {
                assert_eq!(*user, ALLOC_PATTERN);
            }
            let back = debug_fill_free(user, 16, &info);
            assert_eq!(back, buffer.as_mut_ptr());
        }
    }

    #[test]
    fn leak_counter_balances() {
        let counter = LeakCounter::new();
        counter.on_allocate(128);
        counter.on_allocate(64);
        counter.on_deallocate(192);
        assert_eq!(counter.live_bytes(), 0);
        assert_eq!(counter.peak_bytes(), 192);
        // Balanced counter must not invoke the handler.
        counter.check(&AllocatorInfo::new("balanced"));
    }

    #[test]
    fn corrupted_trailing_fence_reports_overflow() {
        use core::sync::atomic::AtomicUsize;
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn recording(_memory: *const u8, _size: usize, _corrupted: *const u8) {
            CALLS.fetch_add(1, Ordering::Relaxed);
        }

        if FENCE_SIZE == 0 {
            return;
        }
        let previous = set_buffer_overflow_handler(recording);
        let mut buffer = vec![0u8; fenced_size(8)];
        let info = AllocatorInfo::new("corrupt");
        unsafe {
            let user = debug_fill_new(buffer.as_mut_ptr(), 8);
            *user.add(8) = 0;
            debug_fill_free(user, 8, &info);
        }
        set_buffer_overflow_handler(previous);
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn info_display() {
        let info = AllocatorInfo::new("heap");
        assert_eq!(info.to_string(), "allocator heap");
    }
}
