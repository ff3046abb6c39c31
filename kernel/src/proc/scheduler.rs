//! The per-CPU scheduler and the kernel context switch.

use core::arch::{asm, naked_asm};
use core::mem::offset_of;

use crate::{cpu::Cpu, interrupt, sync::SpinLockGuard};

use super::{PROCS, ProcShared, ProcState};

/// Callee-saved registers plus `ra`/`sp`; everything a cooperative kernel
/// switch must preserve.
#[repr(C)]
pub struct Context {
    pub(super) ra: u64,
    pub(super) sp: u64,
    s0: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
}

impl Context {
    pub(crate) const fn zeroed() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    pub(super) const fn reset(&mut self) {
        *self = Self::zeroed();
    }
}

/// The scheduler loop; each hart enters it once and never leaves.
///
/// Picks a runnable process, switches into it, and takes over again when
/// the process switches back. The chosen process releases its own lock
/// after the switch and must hold it again, state already changed away
/// from `Running`, when it returns control here.
pub fn run() -> ! {
    let cpu = Cpu::current();
    unsafe {
        cpu.set_proc(None);
    }

    loop {
        // The last process may have left interrupts off; enable them so a
        // pending device interrupt can make someone runnable, then turn
        // them off again before the wfi race window matters.
        interrupt::enable();
        interrupt::disable();

        let mut ran = false;
        for p in &PROCS {
            let mut shared = p.shared.lock();
            if shared.state != ProcState::Runnable {
                continue;
            }

            shared.state = ProcState::Running;
            unsafe {
                cpu.set_proc(Some((p.into(), shared.pid)));
                switch(cpu.context.get(), &raw const shared.context);
                // the process is done for now; it changed its own state
                // before switching back
                cpu.set_proc(None);
            }
            ran = true;
            drop(shared);
        }

        if !ran {
            // idle until the next interrupt
            interrupt::enable();
            unsafe {
                asm!("wfi");
            }
        }
    }
}

/// Switches from the current process back to this hart's scheduler.
///
/// Caller holds exactly its own process lock (so `push_off` depth is 1)
/// and has already moved the state off `Running`. The saved
/// interrupt-enable flag travels with the thread, not the hart.
pub(super) fn yield_to_scheduler(shared: &mut SpinLockGuard<ProcShared>) {
    assert_eq!(interrupt::off_depth(), 1, "sched with extra locks held");
    assert_ne!(shared.state, ProcState::Running);
    assert!(!interrupt::is_enabled());

    let was_enabled = interrupt::enabled_before_off();
    unsafe {
        switch(&raw mut shared.context, Cpu::current().context.get());
        interrupt::set_enabled_before_off(was_enabled);
    }
}

/// Saves the callee-saved registers into `old` and loads `new`.
#[unsafe(naked)]
pub(super) extern "C" fn switch(old: *mut Context, new: *const Context) {
    naked_asm!(
        "sd ra, {ra}(a0)",
        "sd sp, {sp}(a0)",
        "sd s0, {s0}(a0)",
        "sd s1, {s1}(a0)",
        "sd s2, {s2}(a0)",
        "sd s3, {s3}(a0)",
        "sd s4, {s4}(a0)",
        "sd s5, {s5}(a0)",
        "sd s6, {s6}(a0)",
        "sd s7, {s7}(a0)",
        "sd s8, {s8}(a0)",
        "sd s9, {s9}(a0)",
        "sd s10, {s10}(a0)",
        "sd s11, {s11}(a0)",
        "ld ra, {ra}(a1)",
        "ld sp, {sp}(a1)",
        "ld s0, {s0}(a1)",
        "ld s1, {s1}(a1)",
        "ld s2, {s2}(a1)",
        "ld s3, {s3}(a1)",
        "ld s4, {s4}(a1)",
        "ld s5, {s5}(a1)",
        "ld s6, {s6}(a1)",
        "ld s7, {s7}(a1)",
        "ld s8, {s8}(a1)",
        "ld s9, {s9}(a1)",
        "ld s10, {s10}(a1)",
        "ld s11, {s11}(a1)",
        "ret",
        ra = const offset_of!(Context, ra),
        sp = const offset_of!(Context, sp),
        s0 = const offset_of!(Context, s0),
        s1 = const offset_of!(Context, s1),
        s2 = const offset_of!(Context, s2),
        s3 = const offset_of!(Context, s3),
        s4 = const offset_of!(Context, s4),
        s5 = const offset_of!(Context, s5),
        s6 = const offset_of!(Context, s6),
        s7 = const offset_of!(Context, s7),
        s8 = const offset_of!(Context, s8),
        s9 = const offset_of!(Context, s9),
        s10 = const offset_of!(Context, s10),
        s11 = const offset_of!(Context, s11),
    )
}
