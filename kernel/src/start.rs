//! Machine-mode boot shim.
//!
//! Boot proper (firmware, linker script) is outside this kernel; qemu
//! jumps every hart to `_entry` in machine mode. Each hart picks its slice
//! of the boot stack, does the minimal M-mode setup, and `mret`s into
//! supervisor-mode [`main`](crate::main).

use core::arch::{asm, global_asm};

use nv6_kernel_params::NCPU;
use riscv::register::{
    mepc,
    mstatus::{self, MPP},
};

use crate::{cpu, interrupt::timer};

pub const STACK_SIZE: usize = 16 * 1024;

#[repr(C, align(16))]
pub struct BootStacks([u8; STACK_SIZE * NCPU]);

/// One boot stack per hart; the linker script keeps this in kernel data.
pub static mut STACK0: BootStacks = BootStacks([0; STACK_SIZE * NCPU]);

global_asm!(
    r#"
    .section .text._entry
    .globl _entry
_entry:
    // sp = &STACK0 + STACK_SIZE * (hartid + 1)
    la sp, {stack0}
    li a0, {stack_size}
    csrr a1, mhartid
    addi a1, a1, 1
    mul a0, a0, a1
    add sp, sp, a0
    call {start}
1:
    j 1b
    "#,
    stack0 = sym STACK0,
    stack_size = const STACK_SIZE,
    start = sym start,
);

/// M-mode setup, one hart at a time, then drop to S-mode.
unsafe extern "C" fn start() -> ! {
    unsafe {
        // mret will land in supervisor mode, in main()
        mstatus::set_mpp(MPP::Supervisor);
        mepc::write(crate::main as usize);

        // paging off until main() builds the kernel table
        asm!("csrw satp, zero");

        // hand all exceptions and interrupts to supervisor mode
        asm!("csrw medeleg, {}", in(reg) 0xffff_u64);
        asm!("csrw mideleg, {}", in(reg) 0xffff_u64);
        // supervisor external, timer, software
        asm!("csrs sie, {}", in(reg) (1_u64 << 9) | (1 << 5) | (1 << 1));

        // open physical memory to supervisor mode (one all-covering PMP)
        asm!("csrw pmpaddr0, {}", in(reg) 0x3f_ffff_ffff_ffff_u64);
        asm!("csrw pmpcfg0, {}", in(reg) 0xf_u64);

        timer::init_hart();

        // keep the hartid where cpu::id() can see it
        let hartid: usize;
        asm!("csrr {}, mhartid", out(reg) hartid);
        cpu::set_id(hartid);

        asm!("mret", options(noreturn));
    }
}
