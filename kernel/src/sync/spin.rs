use core::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use mutex_api::Mutex;

use crate::{cpu, interrupt, proc};

use super::Chan;

const NO_HART: usize = usize::MAX;

struct RawSpinLock {
    locked: AtomicBool,
    /// Hart currently holding the lock, for the re-entrancy check.
    owner: AtomicUsize,
}

impl RawSpinLock {
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_HART),
        }
    }

    fn acquire(&self) {
        // Interrupts stay off for the whole critical section; an interrupt
        // handler reacquiring this lock on the same hart would spin forever.
        interrupt::push_off().forget();

        assert!(!self.holding(), "spin lock reacquired on the same hart");

        // Acquire ordering keeps the critical section's loads and stores
        // from being hoisted above the lock.
        while self.locked.swap(true, Ordering::Acquire) {
            hint::spin_loop();
        }
        self.owner.store(cpu::id(), Ordering::Relaxed);
    }

    fn release(&self) {
        assert!(self.holding(), "spin lock released by a non-holder");
        self.owner.store(NO_HART, Ordering::Relaxed);
        // Release ordering publishes the critical section's stores before
        // the lock is seen free.
        self.locked.store(false, Ordering::Release);

        unsafe {
            interrupt::pop_off();
        }
    }

    /// Whether this hart holds the lock. Interrupts must be off.
    fn holding(&self) -> bool {
        assert!(!interrupt::is_enabled());
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == cpu::id()
    }
}

/// A spin lock owning `T`.
pub struct SpinLock<T> {
    raw: RawSpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.acquire();
        SpinLockGuard { lock: self }
    }

    /// Materializes a guard for a lock this thread already holds.
    ///
    /// # Safety
    ///
    /// The lock must be held by this thread with no live guard — the
    /// scheduler hand-off, where the lock crosses a context switch.
    pub(crate) unsafe fn steal_guard(&self) -> SpinLockGuard<'_, T> {
        assert!(self.raw.holding());
        SpinLockGuard { lock: self }
    }
}

impl<T> Mutex for SpinLock<T> {
    type Data = T;
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Send for SpinLockGuard<'_, T> where T: Send {}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// The lock this guard came from; lets `proc::sleep` reacquire it after
    /// waking.
    pub(crate) fn into_lock(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }
}

/// A condition variable for use with [`SpinLock`].
///
/// The counter stamps each `notify`, so a wakeup between observing the
/// condition and sleeping is never lost.
pub struct CondVar {
    seq: AtomicU64,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
        }
    }

    /// Releases `guard`, sleeps until a notify, reacquires and returns it.
    pub fn wait<'a, T>(&self, mut guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let seen = self.seq.load(Ordering::Relaxed);
        loop {
            guard = proc::sleep(Chan::of(&self.seq), guard);
            if self.seq.load(Ordering::Relaxed) != seen {
                return guard;
            }
        }
    }

    /// Wakes every waiter.
    ///
    /// The caller must hold the lock the waiters passed to `wait`.
    pub fn notify(&self) {
        self.seq.fetch_add(1, Ordering::Relaxed);
        proc::wakeup(Chan::of(&self.seq));
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
