//! Typed uninitialized storage.

use core::mem::MaybeUninit;

/// A slot with the size and alignment of `T` whose contents may be
/// uninitialized.
///
/// A thin wrapper over [`MaybeUninit`] that the containers in this crate
/// use for their backing arrays. The wrapper never drops a contained
/// value; whoever initialized the slot is responsible for
/// [`UninitStorage::assume_init_drop`] or moving the value out.
#[repr(transparent)]
pub struct UninitStorage<T>(MaybeUninit<T>);

impl<T> UninitStorage<T> {
    /// An uninitialized slot.
    #[inline]
    pub const fn uninit() -> Self {
        UninitStorage(MaybeUninit::uninit())
    }

    /// A slot holding `value`.
    #[inline]
    pub const fn new(value: T) -> Self {
        UninitStorage(MaybeUninit::new(value))
    }

    /// Pointer to the slot. Valid for writes of `T` whether or not the
    /// slot is initialized.
    #[inline]
    pub const fn as_ptr(&self) -> *const T {
        self.0.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.0.as_mut_ptr()
    }

    /// Initializes the slot, returning a reference to the value. Any
    /// previous value is overwritten without being dropped.
    #[inline]
    pub fn write(&mut self, value: T) -> &mut T {
        self.0.write(value)
    }

    /// # Safety
    /// The slot must be initialized.
    #[inline]
    pub unsafe fn assume_init_ref(&self) -> &T {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.assume_init_ref() }
    }

    /// # Safety
    /// The slot must be initialized.
    #[inline]
    pub unsafe fn assume_init_mut(&mut self) -> &mut T {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.assume_init_mut() }
    }

    /// Moves the value out, leaving the slot uninitialized.
    ///
    /// # Safety
    /// The slot must be initialized, and must not be read again unless
    /// rewritten.
    #[inline]
    pub unsafe fn assume_init_read(&self) -> T {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.assume_init_read() }
    }

    /// Drops the value in place, leaving the slot uninitialized.
    ///
    /// # Safety
    /// The slot must be initialized, and must not be read again unless
    /// rewritten.
    #[inline]
    pub unsafe fn assume_init_drop(&mut self) {
        // SAFETY: forwarded caller contract.
        unsafe { self.0.assume_init_drop() }
    }
}

impl<T> Default for UninitStorage<T> {
    fn default() -> Self {
        Self::uninit()
    }
}

impl<T> core::fmt::Debug for UninitStorage<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("UninitStorage(..)")
    }
}
