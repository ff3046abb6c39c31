//! A cell that is written exactly once, during phased boot initialization.
//!
//! Subsystems that must exist before the first trap (scheduler, page
//! allocator, block cache) are created by an explicit call from the boot
//! path and published through one of these cells; there is no lazy
//! initialization anywhere in the kernel.

#![cfg_attr(not(test), no_std)]

use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;

/// A write-once cell.
///
/// `init` may be raced from several harts; exactly one writer wins and the
/// value becomes visible to every `get` that observes the ready state.
pub struct OnceInit<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T> Sync for OnceInit<T> where T: Send {}

impl<T> OnceInit<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Stores `value` if the cell is still empty.
    ///
    /// Returns the rejected value when another writer got there first.
    pub fn try_init(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(READY, Ordering::Release);
        Ok(())
    }

    /// Stores `value`.
    ///
    /// # Panics
    ///
    /// Panics if the cell was already initialized.
    #[track_caller]
    pub fn init(&self, value: T) {
        assert!(self.try_init(value).is_ok(), "OnceInit written twice");
    }

    /// Returns the value, or `None` before initialization completes.
    pub fn try_get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) != READY {
            return None;
        }
        Some(unsafe { (*self.value.get()).assume_init_ref() })
    }

    /// Returns the value.
    ///
    /// # Panics
    ///
    /// Panics if the cell is not yet initialized.
    #[track_caller]
    pub fn get(&self) -> &T {
        self.try_get().expect("OnceInit read before init")
    }
}

impl<T> Default for OnceInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for OnceInit<T> {
    fn drop(&mut self) {
        if self.state.load(Ordering::Acquire) == READY {
            unsafe {
                (*self.value.get()).assume_init_drop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    use super::*;

    #[test]
    fn init_then_get() {
        let cell = OnceInit::new();
        assert!(cell.try_get().is_none());
        cell.init(7_u32);
        assert_eq!(*cell.get(), 7);
    }

    #[test]
    fn second_writer_loses() {
        let cell = OnceInit::new();
        cell.init("first");
        assert_eq!(cell.try_init("second"), Err("second"));
        assert_eq!(*cell.get(), "first");
    }

    #[test]
    #[should_panic]
    fn get_before_init_panics() {
        let cell = OnceInit::<u32>::new();
        let _ = cell.get();
    }

    #[test]
    fn racing_writers_agree() {
        let cell = Arc::new(OnceInit::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cell.try_init(i).ok().map(|()| i)
                })
            })
            .collect();

        let winners: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(*cell.get(), winners[0]);
    }
}
