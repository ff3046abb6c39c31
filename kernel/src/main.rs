#![feature(allocator_api)]
#![no_std]
#![no_main]

extern crate alloc;

use core::{
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

mod console;
mod cpu;
mod error;
mod file;
mod fs;
mod interrupt;
mod memory;
mod proc;
mod start;
mod sync;
mod syscall;

static STARTED: AtomicBool = AtomicBool::new(false);

/// start() mrets here in supervisor mode on every hart.
pub(crate) extern "C" fn main() -> ! {
    if interrupt::with_off(cpu::id) == 0 {
        console::init();
        println!();
        println!("nv6 kernel is booting");
        println!();
        memory::page::init(); // physical page allocator
        memory::vm_kernel::init(); // kernel page table
        memory::vm_kernel::init_hart(); // paging on
        proc::init(); // process table
        interrupt::trap::init_hart(); // kernel trap vector
        interrupt::plic::init(); // interrupt controller
        interrupt::plic::init_hart(); // this hart's device interrupts
        fs::init(); // disk, buffer cache, inode and file tables
        file::init();
        proc::user_init(); // first user process

        STARTED.store(true, Ordering::Release);
    } else {
        while !STARTED.load(Ordering::Acquire) {
            hint::spin_loop();
        }
        println!("hart {} starting", interrupt::with_off(cpu::id));
        memory::vm_kernel::init_hart(); // paging on
        interrupt::trap::init_hart(); // kernel trap vector
        interrupt::plic::init_hart(); // this hart's device interrupts
    }

    proc::scheduler_loop();
}
