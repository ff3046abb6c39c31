//! The trampoline: user↔kernel switch code.
//!
//! Mapped read+execute at [`TRAMPOLINE`], the same virtual address at the
//! top of every address space, so the code keeps executing across the satp
//! switch. The linker script places `trampsec` on its own page boundary.
//!
//! `uservec` runs on trap entry with the user page table still active: it
//! saves the user registers into the trapframe (mapped at the fixed
//! [`TRAPFRAME`] address), loads the kernel stack pointer, hartid, and
//! kernel satp from the trapframe, switches page tables, and jumps to the
//! kernel's user-trap handler. `userret` is the reverse path; it receives
//! the user satp in `a0`.

use core::{arch::global_asm, mem::offset_of};

use crate::memory::{
    PhysAddr, VirtAddr,
    layout::{TRAMPOLINE, TRAPFRAME},
};

use super::trap::TrapFrame;

unsafe extern "C" {
    fn trampoline_start();
    fn uservec();
    fn userret();
}

/// Physical address of the trampoline code page.
pub fn code_phys_addr() -> PhysAddr {
    PhysAddr::new(trampoline_start as usize)
}

/// Virtual address of `uservec` as every address space maps it.
pub fn user_vec_addr() -> VirtAddr {
    TRAMPOLINE
        .byte_add(uservec as usize - trampoline_start as usize)
        .unwrap()
}

/// Virtual address of `userret` as every address space maps it.
pub fn user_ret_addr() -> VirtAddr {
    TRAMPOLINE
        .byte_add(userret as usize - trampoline_start as usize)
        .unwrap()
}

global_asm!(
    r#"
    .section trampsec
    .balign 4096
    .globl trampoline_start
trampoline_start:

    .balign 4
    .globl uservec
uservec:
    // stash user a0; a0 becomes the trapframe base
    csrw sscratch, a0
    li a0, {trapframe}

    sd ra, {tf_ra}(a0)
    sd sp, {tf_sp}(a0)
    sd gp, {tf_gp}(a0)
    sd tp, {tf_tp}(a0)
    sd t0, {tf_t0}(a0)
    sd t1, {tf_t1}(a0)
    sd t2, {tf_t2}(a0)
    sd s0, {tf_s0}(a0)
    sd s1, {tf_s1}(a0)
    sd a1, {tf_a1}(a0)
    sd a2, {tf_a2}(a0)
    sd a3, {tf_a3}(a0)
    sd a4, {tf_a4}(a0)
    sd a5, {tf_a5}(a0)
    sd a6, {tf_a6}(a0)
    sd a7, {tf_a7}(a0)
    sd s2, {tf_s2}(a0)
    sd s3, {tf_s3}(a0)
    sd s4, {tf_s4}(a0)
    sd s5, {tf_s5}(a0)
    sd s6, {tf_s6}(a0)
    sd s7, {tf_s7}(a0)
    sd s8, {tf_s8}(a0)
    sd s9, {tf_s9}(a0)
    sd s10, {tf_s10}(a0)
    sd s11, {tf_s11}(a0)
    sd t3, {tf_t3}(a0)
    sd t4, {tf_t4}(a0)
    sd t5, {tf_t5}(a0)
    sd t6, {tf_t6}(a0)

    csrr t0, sscratch
    sd t0, {tf_a0}(a0)

    // kernel stack, hartid, handler, and page table from the trapframe
    ld sp, {tf_kernel_sp}(a0)
    ld tp, {tf_kernel_hartid}(a0)
    ld t0, {tf_kernel_trap}(a0)
    ld t1, {tf_kernel_satp}(a0)

    sfence.vma zero, zero
    csrw satp, t1
    sfence.vma zero, zero

    jr t0

    .balign 4
    .globl userret
userret:
    // a0: user satp
    sfence.vma zero, zero
    csrw satp, a0
    sfence.vma zero, zero

    li a0, {trapframe}

    ld ra, {tf_ra}(a0)
    ld sp, {tf_sp}(a0)
    ld gp, {tf_gp}(a0)
    ld tp, {tf_tp}(a0)
    ld t0, {tf_t0}(a0)
    ld t1, {tf_t1}(a0)
    ld t2, {tf_t2}(a0)
    ld s0, {tf_s0}(a0)
    ld s1, {tf_s1}(a0)
    ld a1, {tf_a1}(a0)
    ld a2, {tf_a2}(a0)
    ld a3, {tf_a3}(a0)
    ld a4, {tf_a4}(a0)
    ld a5, {tf_a5}(a0)
    ld a6, {tf_a6}(a0)
    ld a7, {tf_a7}(a0)
    ld s2, {tf_s2}(a0)
    ld s3, {tf_s3}(a0)
    ld s4, {tf_s4}(a0)
    ld s5, {tf_s5}(a0)
    ld s6, {tf_s6}(a0)
    ld s7, {tf_s7}(a0)
    ld s8, {tf_s8}(a0)
    ld s9, {tf_s9}(a0)
    ld s10, {tf_s10}(a0)
    ld s11, {tf_s11}(a0)
    ld t3, {tf_t3}(a0)
    ld t4, {tf_t4}(a0)
    ld t5, {tf_t5}(a0)
    ld t6, {tf_t6}(a0)

    ld a0, {tf_a0}(a0)

    sret
    "#,
    trapframe = const TRAPFRAME.addr(),
    tf_kernel_satp = const offset_of!(TrapFrame, kernel_satp),
    tf_kernel_sp = const offset_of!(TrapFrame, kernel_sp),
    tf_kernel_trap = const offset_of!(TrapFrame, kernel_trap),
    tf_kernel_hartid = const offset_of!(TrapFrame, kernel_hartid),
    tf_ra = const offset_of!(TrapFrame, ra),
    tf_sp = const offset_of!(TrapFrame, sp),
    tf_gp = const offset_of!(TrapFrame, gp),
    tf_tp = const offset_of!(TrapFrame, tp),
    tf_t0 = const offset_of!(TrapFrame, t0),
    tf_t1 = const offset_of!(TrapFrame, t1),
    tf_t2 = const offset_of!(TrapFrame, t2),
    tf_s0 = const offset_of!(TrapFrame, s0),
    tf_s1 = const offset_of!(TrapFrame, s1),
    tf_a0 = const offset_of!(TrapFrame, a0),
    tf_a1 = const offset_of!(TrapFrame, a1),
    tf_a2 = const offset_of!(TrapFrame, a2),
    tf_a3 = const offset_of!(TrapFrame, a3),
    tf_a4 = const offset_of!(TrapFrame, a4),
    tf_a5 = const offset_of!(TrapFrame, a5),
    tf_a6 = const offset_of!(TrapFrame, a6),
    tf_a7 = const offset_of!(TrapFrame, a7),
    tf_s2 = const offset_of!(TrapFrame, s2),
    tf_s3 = const offset_of!(TrapFrame, s3),
    tf_s4 = const offset_of!(TrapFrame, s4),
    tf_s5 = const offset_of!(TrapFrame, s5),
    tf_s6 = const offset_of!(TrapFrame, s6),
    tf_s7 = const offset_of!(TrapFrame, s7),
    tf_s8 = const offset_of!(TrapFrame, s8),
    tf_s9 = const offset_of!(TrapFrame, s9),
    tf_s10 = const offset_of!(TrapFrame, s10),
    tf_s11 = const offset_of!(TrapFrame, s11),
    tf_t3 = const offset_of!(TrapFrame, t3),
    tf_t4 = const offset_of!(TrapFrame, t4),
    tf_t5 = const offset_of!(TrapFrame, t5),
    tf_t6 = const offset_of!(TrapFrame, t6),
);
