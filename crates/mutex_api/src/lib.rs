//! The lock interface shared by the generic kernel-support crates.
//!
//! The buffer cache and the allocators do not care whether their state is
//! guarded by a spin lock, a sleep lock, or `std::sync::Mutex` in a host
//! test. They only need "new, lock, guard". This trait is that surface.

#![no_std]

use core::ops::DerefMut;

/// A mutual-exclusion lock owning the data it protects.
pub trait Mutex {
    /// The protected data.
    type Data;

    /// RAII guard; releases the lock on drop.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Wraps `data` in a new unlocked lock.
    fn new(data: Self::Data) -> Self;

    /// Blocks until the lock is held.
    fn lock(&self) -> Self::Guard<'_>;

    /// Runs `f` with the lock held.
    fn with_lock<T>(&self, f: impl FnOnce(&mut Self::Data) -> T) -> T {
        f(&mut *self.lock())
    }
}
