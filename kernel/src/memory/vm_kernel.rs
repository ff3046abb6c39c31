//! The kernel address space: a direct map of devices and RAM, plus the
//! trampoline and the per-process kernel stacks.

use alloc::boxed::Box;

use once_init::OnceInit;
use riscv::{asm, register::satp};

use crate::{
    interrupt::trampoline,
    memory::{
        PAGE_SIZE, PhysAddr, VirtAddr,
        layout::{KERNEL_BASE, PHYS_TOP, PLIC, PLIC_SIZE, TRAMPOLINE, UART0, VIRTIO0, text_end},
        page::PageFrame,
        page_table::{PageTable, PteFlags},
    },
    proc,
};

static KERNEL_TABLE: OnceInit<Box<PageTable, PageFrame>> = OnceInit::new();

/// Builds the kernel page table. Once, before any hart enables paging.
pub fn init() {
    use PteFlags as F;

    let mut table = PageTable::try_new().unwrap();

    let mut direct = |addr: usize, size: usize, perm: PteFlags| {
        table
            .map_range(VirtAddr::new_unchecked(addr), size, PhysAddr::new(addr), perm)
            .unwrap();
    };

    // device registers
    direct(UART0, PAGE_SIZE, F::RW);
    direct(VIRTIO0, PAGE_SIZE, F::RW);
    direct(PLIC, PLIC_SIZE, F::RW);

    // kernel text, then data and the rest of RAM
    direct(KERNEL_BASE, text_end() - KERNEL_BASE, F::RX);
    direct(text_end(), PHYS_TOP - text_end(), F::RW);

    // the trampoline, at the top of the kernel space as well
    table
        .map_page(TRAMPOLINE, trampoline::code_phys_addr(), F::RX)
        .unwrap();

    // one stack (plus guard gap) per process slot
    proc::map_kernel_stacks(&mut table);

    KERNEL_TABLE.init(table);
}

/// Points this hart's satp at the kernel table and turns paging on.
pub fn init_hart() {
    // complete any table stores before satp switches translation
    asm::sfence_vma_all();
    unsafe {
        satp::write(satp::Satp::from_bits(KERNEL_TABLE.get().satp()));
    }
    asm::sfence_vma_all();
}
