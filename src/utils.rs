//! Alignment and arithmetic helpers used throughout the crate.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Maximum alignment any allocator in this crate guarantees without an
/// explicit request: the alignment of the largest fundamental scalar.
pub const MAX_ALIGNMENT: usize = core::mem::align_of::<u128>();

/// Aligns a value up to the nearest multiple of `alignment`.
///
/// # Examples
/// ```
/// use stratum::utils::align_up;
///
/// assert_eq!(align_up(7, 8), 8);
/// assert_eq!(align_up(8, 8), 8);
/// assert_eq!(align_up(9, 8), 16);
/// ```
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Aligns a value down to the nearest multiple of `alignment`.
#[inline(always)]
pub const fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Checks whether `value` is a multiple of `alignment`.
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Checks whether a pointer is aligned to `alignment`.
#[inline(always)]
pub fn is_aligned_ptr<T>(ptr: *const T, alignment: usize) -> bool {
    is_aligned(ptr as usize, alignment)
}

/// Padding needed to bring `value` up to `alignment`.
#[inline(always)]
pub const fn padding_needed(value: usize, alignment: usize) -> usize {
    align_up(value, alignment) - value
}

/// Atomically raises `atom` to `value` if `value` is larger.
#[inline]
pub fn atomic_max(atom: &AtomicUsize, value: usize) {
    let mut current = atom.load(Ordering::Relaxed);
    while value > current {
        match atom.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Checks whether `ptr` lies within `[begin, end)`.
#[inline]
pub fn is_pointer_in_range<T>(ptr: *const T, begin: *const T, end: *const T) -> bool {
    let addr = ptr as usize;
    addr >= begin as usize && addr < end as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_down(31, 16), 16);
        assert!(is_aligned(64, 64));
        assert!(!is_aligned(65, 64));
        assert_eq!(padding_needed(13, 8), 3);
        assert_eq!(padding_needed(16, 8), 0);
    }

    #[test]
    fn atomic_max_raises_only() {
        let atom = AtomicUsize::new(10);
        atomic_max(&atom, 5);
        assert_eq!(atom.load(Ordering::Relaxed), 10);
        atomic_max(&atom, 20);
        assert_eq!(atom.load(Ordering::Relaxed), 20);
    }
}
