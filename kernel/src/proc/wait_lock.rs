//! The process-global wait lock and the parent links it guards.
//!
//! Parent pointers form the one cross-slot relationship in the process
//! table; guarding them with a single lock (taken before any per-process
//! lock) keeps `exit`'s parent wakeup and `wait`'s scan from missing each
//! other.

use core::{cell::UnsafeCell, ptr::NonNull};

use crate::sync::{SpinLock, SpinLockGuard};

use super::Proc;

pub(super) struct WaitLock {}

static WAIT_LOCK: SpinLock<WaitLock> = SpinLock::new(WaitLock {});

pub(super) fn lock() -> SpinLockGuard<'static, WaitLock> {
    WAIT_LOCK.lock()
}

/// A parent link, readable and writable only with the wait lock held.
pub(super) struct ParentLink(UnsafeCell<Option<NonNull<Proc>>>);

unsafe impl Sync for ParentLink {}

impl ParentLink {
    pub(super) const fn none() -> Self {
        Self(UnsafeCell::new(None))
    }

    pub(super) fn get(&self, _wait: &mut SpinLockGuard<WaitLock>) -> Option<NonNull<Proc>> {
        unsafe { *self.0.get() }
    }

    pub(super) fn set(
        &self,
        parent: Option<NonNull<Proc>>,
        _wait: &mut SpinLockGuard<WaitLock>,
    ) {
        unsafe {
            *self.0.get() = parent;
        }
    }

    /// Clears the link without the wait lock.
    ///
    /// Only valid while freeing a slot no other process can reach.
    pub(super) unsafe fn clear(&self) {
        unsafe {
            *self.0.get() = None;
        }
    }
}
