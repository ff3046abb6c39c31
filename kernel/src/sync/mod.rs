//! Kernel mutual exclusion.
//!
//! Two tiers, per the locking discipline used throughout: a spin lock for
//! short critical sections with interrupts disabled, and a sleep lock for
//! long-held exclusive access (buffers, inodes) that parks the process
//! instead of spinning. A sleep lock is never acquired while a spin lock is
//! held, except through `proc::sleep`'s atomic lock hand-off.

pub use self::{
    sleep::{SleepLock, SleepLockGuard},
    spin::{CondVar, SpinLock, SpinLockGuard},
};

mod sleep;
mod spin;

/// An opaque wait-channel token.
///
/// `proc::sleep` and `proc::wakeup` agree on tokens and nothing else; by
/// convention a token is the address of the condition it stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chan(usize);

impl Chan {
    /// Token for the condition represented by `obj`.
    pub fn of<T>(obj: &T) -> Self {
        Self(core::ptr::from_ref(obj).addr())
    }
}
