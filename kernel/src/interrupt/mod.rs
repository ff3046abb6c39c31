//! Interrupt enable/disable discipline.
//!
//! Spin-lock critical sections nest, so plain enable/disable is not enough:
//! the first `push_off` on a hart records whether interrupts were on, and
//! only the matching outermost `pop_off` turns them back on.

use core::{
    mem,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use nv6_kernel_params::NCPU;
use riscv::register::sstatus;

use crate::cpu;

pub mod kernel_vec;
pub mod plic;
pub mod timer;
pub mod trampoline;
pub mod trap;

/// Enables device interrupts on this hart.
pub fn enable() {
    unsafe {
        sstatus::set_sie();
    }
}

/// Disables device interrupts on this hart.
pub fn disable() {
    unsafe {
        sstatus::clear_sie();
    }
}

/// Whether device interrupts are enabled on this hart.
pub fn is_enabled() -> bool {
    sstatus::read().sie()
}

struct HartIntrState {
    /// Nesting depth of `push_off`.
    depth: AtomicUsize,
    /// Interrupt-enable state before the outermost `push_off`.
    was_enabled: AtomicBool,
}

static HARTS: [HartIntrState; NCPU] = [const {
    HartIntrState {
        depth: AtomicUsize::new(0),
        was_enabled: AtomicBool::new(false),
    }
}; NCPU];

/// Disables interrupts and returns a guard that undoes one nesting level.
///
/// Call `forget()` on the guard to transfer the obligation elsewhere (the
/// spin lock does this; its `release` calls [`pop_off`]).
pub fn push_off() -> OffGuard {
    let enabled = is_enabled();
    disable();

    let hart = cpu::id();
    let state = &HARTS[hart];
    if state.depth.fetch_add(1, Ordering::Relaxed) == 0 {
        state.was_enabled.store(enabled, Ordering::Relaxed);
    }
    OffGuard { hart }
}

/// Undoes one [`push_off`] whose guard was forgotten.
///
/// # Safety
///
/// Must pair with a forgotten guard on the same hart.
pub unsafe fn pop_off() {
    drop(OffGuard { hart: cpu::id() });
}

pub struct OffGuard {
    hart: usize,
}

impl OffGuard {
    pub fn forget(self) {
        mem::forget(self);
    }
}

impl Drop for OffGuard {
    fn drop(&mut self) {
        assert!(!is_enabled(), "pop_off with interrupts on");
        assert_eq!(self.hart, cpu::id(), "pop_off on the wrong hart");

        let state = &HARTS[self.hart];
        let depth = state.depth.fetch_sub(1, Ordering::Relaxed);
        assert!(depth > 0, "unbalanced pop_off");
        if depth == 1 && state.was_enabled.load(Ordering::Relaxed) {
            enable();
        }
    }
}

/// Runs `f` with interrupts pushed off.
pub fn with_off<T>(f: impl FnOnce() -> T) -> T {
    let _off = push_off();
    f()
}

/// Current `push_off` nesting depth on this hart.
pub fn off_depth() -> usize {
    HARTS[cpu::id()].depth.load(Ordering::Relaxed)
}

/// Interrupt-enable state saved by the outermost `push_off`.
pub fn enabled_before_off() -> bool {
    HARTS[cpu::id()].was_enabled.load(Ordering::Relaxed)
}

/// Overwrites the saved outermost state.
///
/// The scheduler uses this to carry a kernel thread's interrupt state
/// across a context switch; the flag belongs to the thread, not the hart.
pub unsafe fn set_enabled_before_off(enabled: bool) {
    HARTS[cpu::id()].was_enabled.store(enabled, Ordering::Relaxed);
}
