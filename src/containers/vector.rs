//! Growable vector parameterized over an [`Allocator`].

use core::alloc::Layout;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::allocator::{Allocator, HeapAllocator, PropagationPolicy};
use crate::error::{capacity_overflow, oom_abort, AllocError, AllocResult};
use crate::uninit::{destroy_range, relocate, relocate_backward, uninit_copy, uninit_fill};

const MIN_CAPACITY: usize = 4;

/// Contiguous growable array drawing its buffer from an [`Allocator`].
///
/// Capacity doubles on growth and adopts any slack the allocator reports
/// through `allocate_at_least`. The allocator travels with the vector
/// according to its [`PropagationPolicy`].
///
/// The convenience API aborts the process when the allocator is
/// exhausted; `try_` variants surface the error instead. Exceeding
/// `isize::MAX` bytes panics in all builds.
///
/// # Examples
/// ```
/// use stratum::containers::Vector;
///
/// let mut v: Vector<i32> = Vector::new();
/// v.push(1);
/// v.push(2);
/// assert_eq!(v.as_slice(), &[1, 2]);
/// ```
pub struct Vector<T, A: Allocator + PropagationPolicy = HeapAllocator> {
    ptr: NonNull<T>,
    cap: usize,
    len: usize,
    alloc: A,
}

impl<T> Vector<T, HeapAllocator> {
    /// An empty heap-backed vector. Allocates on first push.
    pub const fn new() -> Self {
        Self::new_in(HeapAllocator)
    }

    /// Heap-backed vector with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_in(capacity, HeapAllocator)
    }
}

impl<T> Default for Vector<T, HeapAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Allocator + PropagationPolicy> Vector<T, A> {
    /// An empty vector using `alloc`. Allocates on first push.
    pub const fn new_in(alloc: A) -> Self {
        Vector {
            ptr: NonNull::dangling(),
            cap: if mem::size_of::<T>() == 0 {
                usize::MAX
            } else {
                0
            },
            len: 0,
            alloc,
        }
    }

    /// Vector using `alloc` with room for `capacity` elements.
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        let mut vec = Self::new_in(alloc);
        vec.reserve(capacity);
        vec
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements the vector can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// The allocator this vector draws from.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first len slots are initialized.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: the first len slots are initialized.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Appends `value`. Aborts the process on allocator exhaustion.
    pub fn push(&mut self, value: T) {
        if self.len == self.cap {
            self.reserve(1);
        }
        // SAFETY: len < cap after the reserve.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Appends `value`, surfacing allocator exhaustion.
    pub fn try_push(&mut self, value: T) -> AllocResult<()> {
        if self.len == self.cap {
            self.try_reserve(1)?;
        }
        // SAFETY: len < cap after the reserve.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    /// Removes and returns the last element.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: the slot at the new len was initialized and is now
        // excluded.
        Some(unsafe { self.ptr.as_ptr().add(self.len).read() })
    }

    /// Inserts `value` at `index`, shifting later elements right.
    ///
    /// # Panics
    /// Panics if `index > len`.
    pub fn insert(&mut self, index: usize, value: T) {
        assert!(index <= self.len, "insertion index {index} out of bounds (len {})", self.len);
        if self.len == self.cap {
            self.reserve(1);
        }
        // SAFETY: index <= len < cap; the shifted tail stays in bounds.
        unsafe {
            let base = self.ptr.as_ptr().add(index);
            relocate_backward(base, base.add(1), self.len - index);
            base.write(value);
        }
        self.len += 1;
    }

    /// Removes and returns the element at `index`, shifting later
    /// elements left.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn remove(&mut self, index: usize) -> T {
        assert!(index < self.len, "removal index {index} out of bounds (len {})", self.len);
        // SAFETY: index < len, so the slot is initialized; the tail shift
        // stays within the initialized region.
        unsafe {
            let base = self.ptr.as_ptr().add(index);
            let value = base.read();
            relocate(base.add(1), base, self.len - index - 1);
            self.len -= 1;
            value
        }
    }

    /// Removes the element at `index` by moving the last element into its
    /// place. O(1), does not preserve order.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn swap_remove(&mut self, index: usize) -> T {
        assert!(index < self.len, "removal index {index} out of bounds (len {})", self.len);
        let last = self.len - 1;
        // SAFETY: both slots are initialized; the vacated last slot is
        // excluded by the shorter len.
        unsafe {
            let value = self.ptr.as_ptr().add(index).read();
            if index != last {
                let moved = self.ptr.as_ptr().add(last).read();
                self.ptr.as_ptr().add(index).write(moved);
            }
            self.len = last;
            value
        }
    }

    /// Shortens the vector to `len`, dropping the removed elements.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let dropped = self.len - len;
        self.len = len;
        // SAFETY: the truncated tail was initialized and is now excluded.
        unsafe { destroy_range(self.ptr.as_ptr().add(len), dropped) };
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Resizes to `new_len`, filling new slots with clones of `value`.
    /// Aborts the process on allocator exhaustion.
    pub fn resize(&mut self, new_len: usize, value: T)
    where
        T: Clone,
    {
        if new_len <= self.len {
            self.truncate(new_len);
            return;
        }
        let fresh = new_len - self.len;
        self.reserve(fresh);
        let len = self.len;
        // SAFETY: the destination slots are within capacity and
        // uninitialized; uninit_fill cleans up its prefix on panic and len
        // still excludes those slots.
        unsafe { uninit_fill(self.ptr.as_ptr().add(len), fresh, &value) };
        self.len = new_len;
    }

    /// Ensures room for `additional` more elements.
    ///
    /// # Panics
    /// Panics if the required capacity overflows `isize::MAX` bytes;
    /// aborts the process on allocator exhaustion.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            match err {
                AllocError::SizeOverflow { .. } | AllocError::ExceedsMaxSize { .. } => {
                    capacity_overflow()
                }
                _ => match Layout::array::<T>(self.len.saturating_add(additional)) {
                    Ok(layout) => oom_abort(layout),
                    Err(_) => capacity_overflow(),
                },
            }
        }
    }

    /// Fallible variant of [`Vector::reserve`].
    pub fn try_reserve(&mut self, additional: usize) -> AllocResult<()> {
        let needed = self
            .len
            .checked_add(additional)
            .ok_or_else(|| AllocError::size_overflow("vector capacity"))?;
        if needed <= self.cap {
            return Ok(());
        }
        self.grow_to(needed)
    }

    /// Releases unused capacity. Aborts the process if the allocator
    /// cannot provide the smaller buffer.
    pub fn shrink_to_fit(&mut self) {
        if mem::size_of::<T>() == 0 || self.cap == self.len {
            return;
        }
        if self.len == 0 {
            self.release_buffer();
            return;
        }

        let old_layout = match Layout::array::<T>(self.cap) {
            Ok(layout) => layout,
            Err(_) => capacity_overflow(),
        };
        let new_layout = match Layout::array::<T>(self.len) {
            Ok(layout) => layout,
            Err(_) => capacity_overflow(),
        };
        // SAFETY: the buffer is a live allocation with old_layout.
        let block =
            match unsafe { self.alloc.reallocate(self.ptr.cast(), old_layout, new_layout) } {
                Ok(block) => block,
                Err(_) => oom_abort(new_layout),
            };
        self.ptr = block.cast();
        self.cap = self.len;
    }

    /// Appends clones of every element in `other`. Aborts the process on
    /// allocator exhaustion.
    pub fn extend_from_slice(&mut self, other: &[T])
    where
        T: Clone,
    {
        self.reserve(other.len());
        let len = self.len;
        // SAFETY: the destination slots are within capacity and
        // uninitialized; uninit_copy drops its prefix if a clone panics,
        // and len still excludes those slots.
        unsafe { uninit_copy(other, self.ptr.as_ptr().add(len)) };
        self.len = len + other.len();
    }

    fn grow_to(&mut self, min_cap: usize) -> AllocResult<()> {
        debug_assert!(min_cap > self.cap);
        if mem::size_of::<T>() == 0 {
            // ZST vectors report usize::MAX capacity from construction.
            return Err(AllocError::size_overflow("vector capacity"));
        }

        let new_cap = self
            .cap
            .saturating_mul(2)
            .max(min_cap)
            .max(MIN_CAPACITY);
        let new_layout = Layout::array::<T>(new_cap)
            .map_err(|_| AllocError::size_overflow("vector capacity"))?;
        if new_layout.size() > self.alloc.max_allocation_size() {
            return Err(AllocError::exceeds_max_size(
                new_layout.size(),
                self.alloc.max_allocation_size(),
            ));
        }

        let block = if self.cap == 0 {
            // SAFETY: fresh allocation, layout validated by construction.
            unsafe { self.alloc.allocate_at_least(new_layout)? }
        } else {
            let old_layout = Layout::array::<T>(self.cap)
                .map_err(|_| AllocError::size_overflow("vector capacity"))?;
            // SAFETY: the buffer is a live allocation with old_layout.
            unsafe { self.alloc.reallocate(self.ptr.cast(), old_layout, new_layout)? }
        };

        self.ptr = block.cast();
        // Adopt slack the allocator handed back beyond the request.
        self.cap = (block.len() / mem::size_of::<T>()).max(new_cap);
        Ok(())
    }

    fn release_buffer(&mut self) {
        if mem::size_of::<T>() == 0 || self.cap == 0 {
            return;
        }
        if let Ok(layout) = Layout::array::<T>(self.cap) {
            // SAFETY: the buffer is a live allocation with this layout and
            // holds no live elements beyond len (callers cleared first).
            unsafe { self.alloc.deallocate(self.ptr.cast(), layout) };
        }
        self.ptr = NonNull::dangling();
        self.cap = 0;
    }
}

impl<T, A: Allocator + PropagationPolicy> Drop for Vector<T, A> {
    fn drop(&mut self) {
        self.clear();
        self.release_buffer();
    }
}

impl<T, A: Allocator + PropagationPolicy> Deref for Vector<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A: Allocator + PropagationPolicy> DerefMut for Vector<T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Clone, A: Allocator + PropagationPolicy> Clone for Vector<T, A> {
    fn clone(&self) -> Self {
        let mut clone = Self::new_in(self.alloc.select_on_container_copy());
        clone.extend_from_slice(self.as_slice());
        clone
    }

    fn clone_from(&mut self, source: &Self) {
        self.clear();
        if A::PROPAGATE_ON_COPY_ASSIGNMENT && !self.alloc.allocator_eq(&source.alloc) {
            // The incoming allocator cannot free our buffer; release it
            // with the current allocator first.
            self.release_buffer();
            self.alloc = source.alloc.select_on_container_copy();
        }
        self.extend_from_slice(source.as_slice());
    }
}

impl<T: core::fmt::Debug, A: Allocator + PropagationPolicy> core::fmt::Debug for Vector<T, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq, A: Allocator + PropagationPolicy> PartialEq for Vector<T, A> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, A: Allocator + PropagationPolicy> Eq for Vector<T, A> {}

impl<T, A: Allocator + PropagationPolicy> Extend<T> for Vector<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.push(value);
        }
    }
}

impl<T> FromIterator<T> for Vector<T, HeapAllocator> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut vec = Self::new();
        vec.extend(iter);
        vec
    }
}

impl<'a, T, A: Allocator + PropagationPolicy> IntoIterator for &'a Vector<T, A> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'a, T, A: Allocator + PropagationPolicy> IntoIterator for &'a mut Vector<T, A> {
    type Item = &'a mut T;
    type IntoIter = core::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

// SAFETY: the vector owns its elements and allocator; sending it sends
// both.
unsafe impl<T: Send, A: Allocator + PropagationPolicy + Send> Send for Vector<T, A> {}
unsafe impl<T: Sync, A: Allocator + PropagationPolicy + Sync> Sync for Vector<T, A> {}
