//! Scope-based unwinding for [`MemoryStack`].

use crate::allocator::Allocator;
use crate::arena::stack::{Marker, MemoryStack};

/// Unwinds a [`MemoryStack`] to a captured marker when dropped.
///
/// Captures the stack top on construction; on drop (including during a
/// panic) everything allocated since is rolled back. Call
/// [`StackUnwinder::release`] to keep the allocations instead, or
/// [`StackUnwinder::unwind`] to roll back early.
///
/// # Examples
/// ```
/// use stratum::arena::{MemoryStack, StackUnwinder};
///
/// let stack = MemoryStack::with_block_size(1024);
/// let before = stack.top();
/// {
///     let _scope = StackUnwinder::new(&stack);
///     stack.allocate(256, 8);
/// }
/// assert_eq!(stack.top(), before);
/// ```
pub struct StackUnwinder<'s, A: Allocator> {
    stack: &'s MemoryStack<A>,
    marker: Marker,
    armed: bool,
}

impl<'s, A: Allocator> StackUnwinder<'s, A> {
    /// Captures the current top of `stack`.
    pub fn new(stack: &'s MemoryStack<A>) -> Self {
        StackUnwinder {
            stack,
            marker: stack.top(),
            armed: true,
        }
    }

    /// Whether dropping this unwinder will roll the stack back.
    pub fn will_unwind(&self) -> bool {
        self.armed
    }

    /// The marker the stack will be rolled back to.
    pub fn marker(&self) -> Marker {
        self.marker
    }

    /// The stack this unwinder guards.
    pub fn stack(&self) -> &'s MemoryStack<A> {
        self.stack
    }

    /// Rolls back now and disarms the unwinder.
    pub fn unwind(mut self) {
        self.armed = false;
        self.stack.unwind(self.marker);
    }

    /// Disarms the unwinder, keeping all allocations made in the scope.
    pub fn release(mut self) {
        self.armed = false;
    }
}

impl<A: Allocator> Drop for StackUnwinder<'_, A> {
    fn drop(&mut self) {
        if self.armed {
            self.stack.unwind(self.marker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_unwinds() {
        let stack = MemoryStack::with_block_size(256);
        let before = stack.top();
        {
            let _scope = StackUnwinder::new(&stack);
            stack.allocate(64, 8);
            assert_ne!(stack.top(), before);
        }
        assert_eq!(stack.top(), before);
    }

    #[test]
    fn release_keeps_allocations() {
        let stack = MemoryStack::with_block_size(256);
        let before = stack.top();
        let scope = StackUnwinder::new(&stack);
        stack.allocate(64, 8);
        scope.release();
        assert_ne!(stack.top(), before);
    }

    #[test]
    fn explicit_unwind_disarms() {
        let stack = MemoryStack::with_block_size(256);
        let before = stack.top();
        let scope = StackUnwinder::new(&stack);
        stack.allocate(64, 8);
        assert!(scope.will_unwind());
        scope.unwind();
        assert_eq!(stack.top(), before);
    }

    #[test]
    fn unwinds_on_panic() {
        let stack = MemoryStack::with_block_size(256);
        let before = stack.top();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = StackUnwinder::new(&stack);
            stack.allocate(64, 8);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(stack.top(), before);
    }
}
