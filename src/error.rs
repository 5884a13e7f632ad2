//! Allocation error type shared by every allocator in the crate.
//!
//! Two failure tiers exist:
//! - recoverable exhaustion and parameter errors, reported as [`AllocError`]
//!   through `AllocResult`;
//! - unrecoverable exhaustion on infallible paths, routed through
//!   [`oom_abort`] which never unwinds.

use core::alloc::Layout;

/// Result alias used throughout the crate.
pub type AllocResult<T> = Result<T, AllocError>;

/// Memory allocation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The underlying memory source could not satisfy the request.
    #[error("allocation of {size} bytes (align {align}) failed")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A size computation overflowed `usize`.
    #[error("size computation overflowed: {context}")]
    SizeOverflow {
        /// What was being computed.
        context: &'static str,
    },

    /// Alignment was not a power of two.
    #[error("invalid alignment: {align} is not a power of two")]
    InvalidAlignment {
        /// The offending alignment.
        align: usize,
    },

    /// Layout parameters were rejected by the allocator.
    #[error("invalid layout: {reason}")]
    InvalidLayout {
        /// Why the layout was rejected.
        reason: &'static str,
    },

    /// The request exceeds the allocator's maximum supported size.
    #[error("allocation of {size} bytes exceeds maximum of {max} bytes")]
    ExceedsMaxSize {
        /// Requested size in bytes.
        size: usize,
        /// Maximum size this allocator supports.
        max: usize,
    },

    /// A fixed-capacity allocator (pool, static buffer) ran out of space.
    #[error("{what} exhausted")]
    Exhausted {
        /// Which resource ran out.
        what: &'static str,
    },
}

impl AllocError {
    /// The memory source could not satisfy a request of `size`/`align`.
    #[inline]
    pub fn allocation_failed(size: usize, align: usize) -> Self {
        Self::AllocationFailed { size, align }
    }

    /// A size computation overflowed.
    #[inline]
    pub fn size_overflow(context: &'static str) -> Self {
        Self::SizeOverflow { context }
    }

    /// Alignment is not a power of two.
    #[inline]
    pub fn invalid_alignment(align: usize) -> Self {
        Self::InvalidAlignment { align }
    }

    /// Layout parameters were rejected.
    #[inline]
    pub fn invalid_layout(reason: &'static str) -> Self {
        Self::InvalidLayout { reason }
    }

    /// Request exceeds the allocator's maximum.
    #[inline]
    pub fn exceeds_max_size(size: usize, max: usize) -> Self {
        Self::ExceedsMaxSize { size, max }
    }

    /// A fixed-capacity resource ran out.
    #[inline]
    pub fn exhausted(what: &'static str) -> Self {
        Self::Exhausted { what }
    }
}

/// Terminates the process after an unrecoverable allocation failure.
///
/// Infallible allocation paths (arena growth, container push) have no
/// strategy for recovering from exhaustion; they log the failed layout and
/// abort without unwinding.
#[cold]
#[inline(never)]
pub fn oom_abort(layout: Layout) -> ! {
    tracing::error!(
        size = layout.size(),
        align = layout.align(),
        "unrecoverable allocation failure, aborting"
    );
    std::process::abort()
}

/// Panics after an arithmetic overflow while computing an allocation
/// size. Overflow is a usage error, not an environment failure, so it
/// panics rather than aborting. Always checked, even in release builds.
#[cold]
#[inline(never)]
pub fn capacity_overflow() -> ! {
    panic!("capacity overflow: allocation size exceeds isize::MAX bytes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = AllocError::allocation_failed(64, 8);
        assert_eq!(err.to_string(), "allocation of 64 bytes (align 8) failed");

        let err = AllocError::exhausted("memory pool");
        assert_eq!(err.to_string(), "memory pool exhausted");
    }

    #[test]
    fn error_equality() {
        assert_eq!(
            AllocError::invalid_alignment(3),
            AllocError::invalid_alignment(3)
        );
        assert_ne!(
            AllocError::invalid_alignment(3),
            AllocError::invalid_alignment(5)
        );
    }
}
