//! Fixed-capacity vector with inline storage.

use core::ops::{Deref, DerefMut};
use core::ptr;

use crate::uninit::{
    destroy_range, relocate, relocate_backward, uninit_copy, uninit_fill, UninitStorage,
};

/// Vector whose `N` elements live inline, with no heap allocation.
///
/// The length is tracked separately from the storage, so only the first
/// `len` slots are ever initialized. Exceeding the capacity through the
/// panicking API is a programming error; [`StaticVec::try_push`] reports
/// fullness by handing the value back instead.
///
/// # Examples
/// ```
/// use stratum::containers::StaticVec;
///
/// let mut v: StaticVec<i32, 4> = StaticVec::new();
/// v.push(1);
/// v.push(2);
/// assert_eq!(v.as_slice(), &[1, 2]);
/// assert_eq!(v.pop(), Some(2));
/// ```
pub struct StaticVec<T, const N: usize> {
    storage: [UninitStorage<T>; N],
    len: usize,
}

impl<T, const N: usize> StaticVec<T, N> {
    /// An empty vector. No elements are constructed.
    pub const fn new() -> Self {
        StaticVec {
            storage: [const { UninitStorage::uninit() }; N],
            len: 0,
        }
    }

    /// A vector holding clones of `slice`.
    ///
    /// # Panics
    /// Panics if `slice` has more than `N` elements.
    pub fn from_slice(slice: &[T]) -> Self
    where
        T: Clone,
    {
        let mut vec = Self::new();
        vec.extend_from_slice(slice);
        vec
    }

    /// A vector holding `count` clones of `value`.
    ///
    /// # Panics
    /// Panics if `count > N`.
    pub fn from_elem(value: T, count: usize) -> Self
    where
        T: Clone,
    {
        let mut vec = Self::new();
        vec.resize(count, value);
        vec
    }

    /// Always `N`.
    pub const fn capacity(&self) -> usize {
        N
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first len slots are initialized.
        unsafe { core::slice::from_raw_parts(self.storage.as_ptr().cast(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: the first len slots are initialized.
        unsafe { core::slice::from_raw_parts_mut(self.storage.as_mut_ptr().cast(), self.len) }
    }

    fn slot(&mut self, index: usize) -> *mut T {
        // SAFETY: callers pass index <= N.
        unsafe { self.storage.as_mut_ptr().cast::<T>().add(index) }
    }

    /// Appends `value`.
    ///
    /// # Panics
    /// Panics if the vector is full.
    pub fn push(&mut self, value: T) {
        if let Err(_value) = self.try_push(value) {
            panic!("capacity overflow: StaticVec holds at most {N} elements");
        }
    }

    /// Appends `value`, or returns it when the vector is full.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        if self.len == N {
            return Err(value);
        }
        let len = self.len;
        // SAFETY: slot len < N is uninitialized.
        unsafe { self.slot(len).write(value) };
        self.len = len + 1;
        Ok(())
    }

    /// Removes and returns the last element.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        let len = self.len;
        // SAFETY: slot len was initialized and is now out of bounds.
        Some(unsafe { self.slot(len).read() })
    }

    /// Inserts `value` at `index`, shifting later elements right.
    ///
    /// # Panics
    /// Panics if the vector is full or `index > len`.
    pub fn insert(&mut self, index: usize, value: T) {
        assert!(self.len < N, "capacity overflow: StaticVec holds at most {N} elements");
        assert!(index <= self.len, "insertion index {index} out of bounds (len {})", self.len);

        let base = self.slot(index);
        // SAFETY: shifts the initialized tail one slot right; the last
        // destination slot is within capacity.
        unsafe {
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

        let base = self.slot(index);
        // SAFETY: index < len, so the slot is initialized; the tail shift
        // stays within the initialized region.
        unsafe {
            let value = base.read();
            relocate(base.add(1), base, self.len - index - 1);
            self.len -= 1;
            value
        }
    }

    /// Removes the element at `index` by swapping the last element into
    /// its place. O(1), does not preserve order.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn swap_remove(&mut self, index: usize) -> T {
        assert!(index < self.len, "removal index {index} out of bounds (len {})", self.len);

        let last = self.len - 1;
        // SAFETY: both slots are initialized; after the read the vacated
        // last slot is excluded by the shorter len.
        unsafe {
            let value = self.slot(index).read();
            if index != last {
                let moved = self.slot(last).read();
                self.slot(index).write(moved);
            }
            self.len = last;
            value
        }
    }

    /// Shortens the vector to `len`, dropping the removed elements.
    /// No-op if `len` is not smaller than the current length.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let dropped = self.len - len;
        self.len = len;
        // SAFETY: the truncated tail was initialized and is now excluded.
        unsafe { destroy_range(self.slot(len), dropped) };
    }

    /// Drops every element.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Removes the elements in `range`, shifting later elements left.
    ///
    /// # Panics
    /// Panics if the range is out of bounds or decreasing.
    pub fn remove_range(&mut self, range: core::ops::Range<usize>) {
        assert!(range.start <= range.end, "range start {} after end {}", range.start, range.end);
        assert!(range.end <= self.len, "range end {} out of bounds (len {})", range.end, self.len);

        let removed = range.end - range.start;
        if removed == 0 {
            return;
        }
        let tail = self.len - range.end;
        // SAFETY: the range is initialized; the tail shift stays within the
        // initialized region and len is shortened afterwards.
        unsafe {
            destroy_range(self.slot(range.start), removed);
            relocate(self.slot(range.end), self.slot(range.start), tail);
        }
        self.len -= removed;
    }

    /// Resizes to `new_len`, filling new slots with clones of `value`.
    ///
    /// # Panics
    /// Panics if `new_len > N`.
    pub fn resize(&mut self, new_len: usize, value: T)
    where
        T: Clone,
    {
        assert!(new_len <= N, "capacity overflow: StaticVec holds at most {N} elements");
        if new_len <= self.len {
            self.truncate(new_len);
            return;
        }
        let fresh = new_len - self.len;
        let len = self.len;
        // SAFETY: the destination slots are within capacity and
        // uninitialized; uninit_fill cleans up its prefix on panic and len
        // still excludes those slots.
        unsafe { uninit_fill(self.slot(len), fresh, &value) };
        self.len = new_len;
    }

    /// Keeps only the elements for which `keep` returns true, preserving
    /// order. If `keep` panics, the remaining elements are leaked rather
    /// than dropped twice.
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, mut keep: F) {
        let len = self.len;
        self.len = 0;
        let mut write = 0;
        for read in 0..len {
            // SAFETY: read < len, so the slot is initialized. Each element
            // is read exactly once; kept ones land at write <= read.
            unsafe {
                let value = self.slot(read).read();
                if keep(&value) {
                    if write != read {
                        self.slot(write).write(value);
                    } else {
                        core::mem::forget(value);
                    }
                    write += 1;
                }
            }
        }
        self.len = write;
    }

    /// Appends clones of every element in `other`.
    ///
    /// # Panics
    /// Panics if the elements do not fit.
    pub fn extend_from_slice(&mut self, other: &[T])
    where
        T: Clone,
    {
        assert!(
            other.len() <= N - self.len,
            "capacity overflow: StaticVec holds at most {N} elements"
        );
        let len = self.len;
        // SAFETY: the destination slots are within capacity and
        // uninitialized; uninit_copy drops its prefix if a clone panics,
        // and len still excludes those slots.
        unsafe { uninit_copy(other, self.slot(len)) };
        self.len = len + other.len();
    }
}

impl<T, const N: usize> Drop for StaticVec<T, N> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T, const N: usize> Default for StaticVec<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Deref for StaticVec<T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, const N: usize> DerefMut for StaticVec<T, N> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Clone, const N: usize> Clone for StaticVec<T, N> {
    fn clone(&self) -> Self {
        let mut clone = Self::new();
        clone.extend_from_slice(self.as_slice());
        clone
    }

    fn clone_from(&mut self, source: &Self) {
        self.clear();
        self.extend_from_slice(source.as_slice());
    }
}

impl<T: core::fmt::Debug, const N: usize> core::fmt::Debug for StaticVec<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq, const N: usize, const M: usize> PartialEq<StaticVec<T, M>>
    for StaticVec<T, N>
{
    fn eq(&self, other: &StaticVec<T, M>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, const N: usize> Eq for StaticVec<T, N> {}

impl<T: PartialOrd, const N: usize> PartialOrd for StaticVec<T, N> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        self.as_slice().partial_cmp(other.as_slice())
    }
}

impl<T: Ord, const N: usize> Ord for StaticVec<T, N> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl<T: core::hash::Hash, const N: usize> core::hash::Hash for StaticVec<T, N> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state)
    }
}

impl<T, const N: usize> Extend<T> for StaticVec<T, N> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<T, const N: usize> FromIterator<T> for StaticVec<T, N> {
    /// # Panics
    /// Panics if the iterator yields more than `N` elements.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut vec = Self::new();
        vec.extend(iter);
        vec
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a StaticVec<T, N> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a mut StaticVec<T, N> {
    type Item = &'a mut T;
    type IntoIter = core::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

impl<T, const N: usize> IntoIterator for StaticVec<T, N> {
    type Item = T;
    type IntoIter = IntoIter<T, N>;

    fn into_iter(self) -> IntoIter<T, N> {
        let vec = core::mem::ManuallyDrop::new(self);
        // SAFETY: moving the storage out; the original is never dropped.
        let storage = unsafe { ptr::read(&vec.storage) };
        IntoIter {
            storage,
            front: 0,
            back: vec.len,
        }
    }
}

/// Owning iterator over a [`StaticVec`]. Elements not yet yielded are
/// dropped with the iterator.
pub struct IntoIter<T, const N: usize> {
    storage: [UninitStorage<T>; N],
    front: usize,
    back: usize,
}

impl<T, const N: usize> Iterator for IntoIter<T, N> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        let front = self.front;
        self.front += 1;
        // SAFETY: slots in [front, back) are initialized; front is now
        // excluded from that range.
        Some(unsafe { self.storage[front].assume_init_read() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<T, const N: usize> DoubleEndedIterator for IntoIter<T, N> {
    fn next_back(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        // SAFETY: the slot at the new back is initialized and now
        // excluded.
        Some(unsafe { self.storage[self.back].assume_init_read() })
    }
}

impl<T, const N: usize> ExactSizeIterator for IntoIter<T, N> {}

impl<T, const N: usize> Drop for IntoIter<T, N> {
    fn drop(&mut self) {
        for i in self.front..self.back {
            // SAFETY: unyielded slots are still initialized.
            unsafe { self.storage[i].assume_init_drop() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trip() {
        let mut v: StaticVec<u32, 4> = StaticVec::new();
        assert!(v.is_empty());
        v.push(1);
        v.push(2);
        v.push(3);
        assert_eq!(v.len(), 3);
        assert_eq!(v.pop(), Some(3));
        assert_eq!(v.as_slice(), &[1, 2]);
    }

    #[test]
    fn try_push_returns_value_when_full() {
        let mut v: StaticVec<u32, 2> = StaticVec::new();
        assert!(v.try_push(1).is_ok());
        assert!(v.try_push(2).is_ok());
        assert_eq!(v.try_push(3), Err(3));
        assert_eq!(v.len(), 2);
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn push_past_capacity_panics() {
        let mut v: StaticVec<u32, 1> = StaticVec::new();
        v.push(1);
        v.push(2);
    }

    #[test]
    fn insert_and_remove_shift() {
        let mut v: StaticVec<u32, 8> = StaticVec::new();
        v.extend_from_slice(&[1, 2, 4]);
        v.insert(2, 3);
        assert_eq!(v.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(v.remove(0), 1);
        assert_eq!(v.as_slice(), &[2, 3, 4]);
    }

    #[test]
    fn swap_remove_is_unordered() {
        let mut v: StaticVec<u32, 4> = StaticVec::new();
        v.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(v.swap_remove(0), 1);
        assert_eq!(v.as_slice(), &[4, 2, 3]);
    }

    #[test]
    fn drop_destroys_elements() {
        use std::rc::Rc;
        let tracker = Rc::new(());
        {
            let mut v: StaticVec<Rc<()>, 4> = StaticVec::new();
            v.push(Rc::clone(&tracker));
            v.push(Rc::clone(&tracker));
            assert_eq!(Rc::strong_count(&tracker), 3);
        }
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn into_iter_yields_and_drops() {
        use std::rc::Rc;
        let tracker = Rc::new(());
        let mut v: StaticVec<Rc<()>, 4> = StaticVec::new();
        for _ in 0..3 {
            v.push(Rc::clone(&tracker));
        }
        let mut iter = v.into_iter();
        let first = iter.next();
        assert!(first.is_some());
        drop(iter); // remaining two are dropped here
        drop(first);
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn whole_struct_swap_with_unequal_lengths() {
        let mut a: StaticVec<String, 4> = StaticVec::from_slice(&[String::from("x")]);
        let mut b: StaticVec<String, 4> =
            StaticVec::from_slice(&[String::from("y"), String::from("z")]);
        core::mem::swap(&mut a, &mut b);
        assert_eq!(a.as_slice(), &["y", "z"]);
        assert_eq!(b.as_slice(), &["x"]);
    }

    #[test]
    fn remove_range_shifts_tail() {
        let mut v: StaticVec<u32, 8> = StaticVec::from_slice(&[1, 2, 3, 4, 5]);
        v.remove_range(1..4);
        assert_eq!(v.as_slice(), &[1, 5]);
        v.remove_range(0..0);
        assert_eq!(v.as_slice(), &[1, 5]);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let mut v: StaticVec<u32, 8> = StaticVec::from_slice(&[1, 2]);
        v.resize(5, 9);
        assert_eq!(v.as_slice(), &[1, 2, 9, 9, 9]);
        v.resize(1, 0);
        assert_eq!(v.as_slice(), &[1]);
    }

    #[test]
    fn retain_keeps_order() {
        let mut v: StaticVec<u32, 8> = StaticVec::from_slice(&[1, 2, 3, 4, 5, 6]);
        v.retain(|n| n % 2 == 0);
        assert_eq!(v.as_slice(), &[2, 4, 6]);
    }

    #[test]
    fn retain_drops_rejected_elements() {
        use std::rc::Rc;
        let tracker = Rc::new(());
        let mut v: StaticVec<(u32, Rc<()>), 4> = StaticVec::new();
        for i in 0..4 {
            v.push((i, Rc::clone(&tracker)));
        }
        v.retain(|(i, _)| *i < 2);
        assert_eq!(v.len(), 2);
        assert_eq!(Rc::strong_count(&tracker), 3);
    }

    #[test]
    fn clone_is_deep() {
        let mut v: StaticVec<String, 4> = StaticVec::new();
        v.push(String::from("a"));
        let w = v.clone();
        assert_eq!(v, w);
        assert_ne!(v[0].as_ptr(), w[0].as_ptr());
    }
}
