//! Timer ticks via the sstc extension (`stimecmp`).

use core::arch::asm;

use crate::{
    cpu,
    sync::{CondVar, SpinLock},
};

/// Ticks since boot, advanced by hart 0.
pub static TICKS: SpinLock<u64> = SpinLock::new(0);
pub static TICK: CondVar = CondVar::new();

/// About a tenth of a second on qemu's 10 MHz clock.
const TICK_INTERVAL: u64 = 1_000_000;

/// Machine-mode setup run once per hart from the boot path: enable
/// supervisor timer interrupts and the sstc extension, then request the
/// first tick.
pub unsafe fn init_hart() {
    unsafe {
        // mie.STIE
        asm!("csrs mie, {}", in(reg) 1_u64 << 5);
        // menvcfg.STCE: turn stimecmp on
        asm!("csrs menvcfg, {}", in(reg) 1_u64 << 63);
        // mcounteren.TM: let supervisor read time
        asm!("csrs mcounteren, {}", in(reg) 1_u64 << 1);

        let now: u64;
        asm!("csrr {}, time", out(reg) now);
        asm!("csrw stimecmp, {}", in(reg) now);
    }
}

/// Handles one timer interrupt: bump the tick count (hart 0 only) and
/// schedule the next one.
pub(super) fn on_tick() {
    if cpu::id() == 0 {
        let mut ticks = TICKS.lock();
        *ticks += 1;
        TICK.notify();
        drop(ticks);
    }

    // re-arming stimecmp also clears the pending interrupt
    unsafe {
        let now: u64;
        asm!("csrr {}, time", out(reg) now);
        asm!("csrw stimecmp, {}", in(reg) now + TICK_INTERVAL);
    }
}

/// Current tick count.
pub fn uptime() -> u64 {
    *TICKS.lock()
}
