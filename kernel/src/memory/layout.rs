//! Physical and virtual memory layout for qemu's `-machine virt`.
//!
//! Physical map (see qemu `hw/riscv/virt.c`):
//!
//! ```text
//! 0x0c00_0000 -- PLIC
//! 0x1000_0000 -- UART0
//! 0x1000_1000 -- virtio disk
//! 0x8000_0000 -- kernel text, then data, then allocatable RAM
//! PHYS_TOP    -- end of RAM the kernel uses
//! ```
//!
//! User virtual map: image from 0 (text, data, guard page, stack, heap),
//! then at the very top the per-process trapframe page just under the
//! shared trampoline page. Kernel stacks sit below the trapframe slot in
//! kernel space, each followed by an unmapped guard page.

use nv6_kernel_params::NPROC;

use crate::memory::{PAGE_SIZE, VirtAddr};

pub const UART0: usize = 0x1000_0000;
pub const UART0_IRQ: u32 = 10;

pub const VIRTIO0: usize = 0x1000_1000;
pub const VIRTIO0_IRQ: u32 = 1;

pub const PLIC: usize = 0x0c00_0000;
pub const PLIC_SIZE: usize = 0x40_0000;

pub const fn plic_senable(hart: usize) -> usize {
    PLIC + 0x2080 + hart * 0x100
}

pub const fn plic_spriority(hart: usize) -> usize {
    PLIC + 0x20_1000 + hart * 0x2000
}

pub const fn plic_sclaim(hart: usize) -> usize {
    PLIC + 0x20_1004 + hart * 0x2000
}

/// Start of kernel text; the boot ROM jumps here.
pub const KERNEL_BASE: usize = 0x8000_0000;

/// End of RAM: 128 MiB above the kernel base.
pub const PHYS_TOP: usize = KERNEL_BASE + 128 * 1024 * 1024;

// Linker-provided section boundaries.
unsafe extern "C" {
    /// End of kernel text.
    #[link_name = "etext"]
    static TEXT_END: [u8; 0];
    /// End of the kernel image; allocatable RAM starts here.
    #[link_name = "end"]
    static KERNEL_END: [u8; 0];
}

pub fn text_end() -> usize {
    (&raw const TEXT_END).addr()
}

pub fn kernel_end() -> usize {
    (&raw const KERNEL_END).addr()
}

/// The shared trampoline page, mapped at the top of every address space.
pub const TRAMPOLINE: VirtAddr = VirtAddr::TOP.byte_sub(PAGE_SIZE);

/// The per-process trapframe page, just below the trampoline in user space.
pub const TRAPFRAME: VirtAddr = TRAMPOLINE.byte_sub(PAGE_SIZE);

pub const KSTACK_PAGES: usize = 2;

/// Kernel stack of process slot `i`: stacks grow down from below the
/// trampoline, one guard page between neighbors.
pub const fn kstack(i: usize) -> VirtAddr {
    assert!(i < NPROC);
    TRAMPOLINE.byte_sub((1 + (i + 1) * (KSTACK_PAGES + 1)) * PAGE_SIZE)
}
