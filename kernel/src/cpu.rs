//! Per-hart state.

use core::{arch::asm, cell::UnsafeCell, ptr::NonNull};

use nv6_kernel_params::NCPU;

use crate::{
    interrupt,
    proc::{Context, Pid, Proc},
};

static CPUS: [Cpu; NCPU] = [const { Cpu::new() }; NCPU];

/// State private to one hart.
///
/// Fields are only touched by the owning hart with interrupts disabled, so
/// plain `UnsafeCell` suffices.
pub struct Cpu {
    /// Process currently running here, if any.
    proc: UnsafeCell<Option<NonNull<Proc>>>,
    /// Pid of that process, readable without taking the process lock.
    pid: UnsafeCell<Pid>,
    /// Scheduler context; `switch` here leaves the process and re-enters
    /// the scheduler loop.
    pub(crate) context: UnsafeCell<Context>,
}

unsafe impl Sync for Cpu {}

/// This hart's id, kept in `tp`.
///
/// Must be called with interrupts disabled; a timer interrupt could
/// otherwise migrate the thread to another hart mid-read.
pub fn id() -> usize {
    assert!(!interrupt::is_enabled());
    let id: usize;
    unsafe { asm!("mv {}, tp", out(reg) id) };
    id
}

/// Installs this hart's id into `tp`. Called once from the boot path.
pub unsafe fn set_id(id: usize) {
    unsafe { asm!("mv tp, {}", in(reg) id) };
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: UnsafeCell::new(None),
            pid: UnsafeCell::new(Pid::INVALID),
            context: UnsafeCell::new(Context::zeroed()),
        }
    }

    /// The current hart's state. Interrupts must be disabled.
    pub fn current() -> &'static Self {
        &CPUS[id()]
    }

    /// Binds this hart to `p`. The scheduler calls this while holding the
    /// process lock, which is where the pid comes from.
    pub(crate) unsafe fn set_proc(&self, p: Option<(NonNull<Proc>, Pid)>) {
        unsafe {
            *self.pid.get() = p.map_or(Pid::INVALID, |(_, pid)| pid);
            *self.proc.get() = p.map(|(p, _)| p);
        }
    }

    pub(crate) unsafe fn proc(&self) -> Option<NonNull<Proc>> {
        unsafe { *self.proc.get() }
    }

    pub(crate) unsafe fn pid(&self) -> Pid {
        unsafe { *self.pid.get() }
    }
}
