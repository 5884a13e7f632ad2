//! Algorithms over uninitialized memory.
//!
//! Relocation moves values between memory regions as raw bytes. Rust
//! moves are untracked bitwise copies, so relocation is a plain memory
//! copy here; after the call the source region is uninitialized and must
//! not be dropped or read.
//!
//! The `uninit_fill`/`uninit_copy` family initializes raw regions from
//! clones and is panic safe: if a clone panics, every element initialized
//! so far is dropped before the panic propagates.

use core::ptr;

/// Drops the partially initialized prefix if a clone panics.
struct InitGuard<T> {
    dst: *mut T,
    initialized: usize,
}

impl<T> Drop for InitGuard<T> {
    fn drop(&mut self) {
        // SAFETY: exactly `initialized` elements at dst are live.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.dst, self.initialized));
        }
    }
}

/// Relocates `count` values from `src` to `dst`. The regions may overlap.
///
/// After the call the values live at `dst`; the bytes at `src` are
/// uninitialized.
///
/// # Safety
/// `src` must hold `count` initialized values; `dst` must be valid for
/// writes of `count` values and properly aligned. The source values must
/// not be used or dropped afterwards.
#[inline]
pub unsafe fn relocate<T>(src: *mut T, dst: *mut T, count: usize) {
    // SAFETY: forwarded caller contract; ptr::copy handles overlap.
    unsafe { ptr::copy(src, dst, count) }
}

/// Relocates `count` values between disjoint regions.
///
/// # Safety
/// Same as [`relocate`], and the regions must not overlap.
#[inline]
pub unsafe fn relocate_no_overlap<T>(src: *mut T, dst: *mut T, count: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr::copy_nonoverlapping(src, dst, count) }
}

/// Relocates `count` values to a higher, possibly overlapping address.
/// The natural direction for opening a gap inside an array.
///
/// # Safety
/// Same as [`relocate`].
#[inline]
pub unsafe fn relocate_backward<T>(src: *mut T, dst: *mut T, count: usize) {
    // SAFETY: forwarded caller contract; ptr::copy copies backward when
    // dst is above src.
    unsafe { ptr::copy(src, dst, count) }
}

/// Relocates a single value.
///
/// # Safety
/// `src` must hold an initialized value, `dst` must be valid for a write
/// of `T`; the source value must not be used or dropped afterwards.
#[inline]
pub unsafe fn relocate_at<T>(src: *mut T, dst: *mut T) {
    // SAFETY: forwarded caller contract.
    unsafe { dst.write(src.read()) }
}

/// Drops `count` values in place.
///
/// # Safety
/// The range must hold `count` initialized values, not used afterwards.
#[inline]
pub unsafe fn destroy_range<T>(first: *mut T, count: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(first, count)) }
}

/// Initializes `count` slots at `dst` with clones of `value`.
///
/// Panic safe: a panicking clone drops the already initialized prefix.
///
/// # Safety
/// `dst` must be valid for writes of `count` values and properly aligned;
/// the slots are treated as uninitialized (nothing is dropped first).
pub unsafe fn uninit_fill<T: Clone>(dst: *mut T, count: usize, value: &T) {
    let mut guard = InitGuard {
        dst,
        initialized: 0,
    };
    for i in 0..count {
        // SAFETY: dst is valid for `count` writes.
        unsafe { dst.add(i).write(value.clone()) };
        guard.initialized = i + 1;
    }
    core::mem::forget(guard);
}

/// Initializes slots at `dst` with clones of `src`, in order.
///
/// Panic safe: a panicking clone drops the already initialized prefix.
///
/// # Safety
/// `dst` must be valid for writes of `src.len()` values, properly
/// aligned, and must not overlap `src`; the slots are treated as
/// uninitialized.
pub unsafe fn uninit_copy<T: Clone>(src: &[T], dst: *mut T) {
    let mut guard = InitGuard {
        dst,
        initialized: 0,
    };
    for (i, value) in src.iter().enumerate() {
        // SAFETY: dst is valid for src.len() writes and does not alias src.
        unsafe { dst.add(i).write(value.clone()) };
        guard.initialized = i + 1;
    }
    core::mem::forget(guard);
}

/// Bitwise bulk copy for `Copy` element types. Never panics.
///
/// # Safety
/// `dst` must be valid for writes of `src.len()` values, properly
/// aligned, and must not overlap `src`.
#[inline]
pub unsafe fn uninit_copy_no_overlap<T: Copy>(src: &[T], dst: *mut T) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static LIVE: AtomicUsize = AtomicUsize::new(0);

    /// Counts live instances so tests can assert relocation neither drops
    /// nor duplicates values.
    struct Tracked(u32);

    impl Tracked {
        fn new(value: u32) -> Self {
            LIVE.fetch_add(1, Ordering::SeqCst);
            Tracked(value)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            LIVE.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn relocate_preserves_live_count() {
        let before = LIVE.load(Ordering::SeqCst);
        let mut src: Vec<Tracked> = (0..8).map(Tracked::new).collect();
        let mut dst: Vec<core::mem::MaybeUninit<Tracked>> = Vec::with_capacity(8);

        unsafe {
            relocate_no_overlap(src.as_mut_ptr(), dst.as_mut_ptr().cast(), 8);
            src.set_len(0);
            dst.set_len(8);
        }
        assert_eq!(LIVE.load(Ordering::SeqCst), before + 8);

        for (i, slot) in dst.iter().enumerate() {
            assert_eq!(unsafe { slot.assume_init_ref() }.0, i as u32);
        }
        unsafe { destroy_range(dst.as_mut_ptr().cast::<Tracked>(), 8) };
        assert_eq!(LIVE.load(Ordering::SeqCst), before);
    }

    #[test]
    fn overlapping_relocate_shifts_right() {
        let mut values = vec![1u32, 2, 3, 4, 0];
        let ptr = values.as_mut_ptr();
        unsafe { relocate_backward(ptr, ptr.add(1), 4) };
        // Slot 0 is now logically a gap; overwrite it.
        values[0] = 0;
        assert_eq!(values, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn fill_panic_drops_initialized_prefix() {
        // Separate counters so parallel tests cannot interleave with LIVE.
        static CLONES_LEFT: AtomicUsize = AtomicUsize::new(3);
        static CLONES_LIVE: AtomicUsize = AtomicUsize::new(0);

        struct PanickyClone;
        impl Clone for PanickyClone {
            fn clone(&self) -> Self {
                if CLONES_LEFT.fetch_sub(1, Ordering::SeqCst) == 0 {
                    panic!("clone failure");
                }
                CLONES_LIVE.fetch_add(1, Ordering::SeqCst);
                PanickyClone
            }
        }
        impl Drop for PanickyClone {
            fn drop(&mut self) {
                CLONES_LIVE.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let mut slots: Vec<core::mem::MaybeUninit<PanickyClone>> = Vec::with_capacity(8);
        let template = PanickyClone;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
            uninit_fill(slots.as_mut_ptr().cast::<PanickyClone>(), 8, &template);
        }));
        assert!(result.is_err());
        // Clones made before the panic were dropped by the guard.
        assert_eq!(CLONES_LIVE.load(Ordering::SeqCst), 0);
        // The template was constructed outside the counter.
        core::mem::forget(template);
        let _ = &mut slots;
    }

    #[test]
    fn copy_clones_in_order() {
        let src = vec![String::from("a"), String::from("b")];
        let mut dst: Vec<core::mem::MaybeUninit<String>> = Vec::with_capacity(2);
        unsafe {
            uninit_copy(&src, dst.as_mut_ptr().cast());
            dst.set_len(2);
        }
        assert_eq!(unsafe { dst[0].assume_init_ref() }, "a");
        assert_eq!(unsafe { dst[1].assume_init_ref() }, "b");
        unsafe { destroy_range(dst.as_mut_ptr().cast::<String>(), 2) };
        unsafe { dst.set_len(0) };
    }
}
