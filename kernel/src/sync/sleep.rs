use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use mutex_api::Mutex;

use crate::{
    proc::{self, Pid},
    sync::Chan,
};

use super::SpinLock;

struct SleepState {
    held: bool,
    /// Holder, for debugging.
    owner: Pid,
}

/// A lock that parks the process while contended.
///
/// Held across disk I/O and other long waits; acquisition itself may sleep,
/// so a sleep lock must never be taken with a spin lock held.
pub struct SleepLock<T> {
    state: SpinLock<SleepState>,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SleepLock<T> where T: Send {}

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: SpinLock::new(SleepState {
                held: false,
                owner: Pid::INVALID,
            }),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, sleeping while another process holds it.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut state = self.state.lock();
        while state.held {
            state = proc::sleep(Chan::of(self), state);
        }
        state.held = true;
        state.owner = proc::current_pid();
        drop(state);
        SleepLockGuard { lock: self }
    }

    /// Acquires the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.held {
            return None;
        }
        state.held = true;
        state.owner = proc::current_pid();
        drop(state);
        Some(SleepLockGuard { lock: self })
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        state.held = false;
        state.owner = Pid::INVALID;
        proc::wakeup(Chan::of(self));
    }
}

impl<T> Mutex for SleepLock<T> {
    type Data = T;
    type Guard<'a>
        = SleepLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> SleepLockGuard<'_, T> {
        self.lock()
    }
}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

unsafe impl<T> Send for SleepLockGuard<'_, T> where T: Send {}
unsafe impl<T> Sync for SleepLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}
