//! The platform-level interrupt controller.
//!
//! Outside the core proper; the kernel only needs claim/complete and the
//! per-hart enable bits for the two devices it drives.

use core::ptr;

use crate::{
    cpu,
    memory::layout::{PLIC, UART0_IRQ, VIRTIO0_IRQ, plic_sclaim, plic_senable, plic_spriority},
};

/// Gives the UART and virtio IRQs a nonzero priority (zero = masked).
pub fn init() {
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(PLIC + UART0_IRQ as usize * 4).write_volatile(1);
        ptr::with_exposed_provenance_mut::<u32>(PLIC + VIRTIO0_IRQ as usize * 4).write_volatile(1);
    }
}

/// Enables both device IRQs for this hart's S-mode and opens its threshold.
pub fn init_hart() {
    let hart = cpu::id();
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(plic_senable(hart))
            .write_volatile((1 << UART0_IRQ) | (1 << VIRTIO0_IRQ));
        ptr::with_exposed_provenance_mut::<u32>(plic_spriority(hart)).write_volatile(0);
    }
}

/// Asks which device interrupted; 0 means none.
pub fn claim() -> u32 {
    let hart = cpu::id();
    unsafe { ptr::with_exposed_provenance_mut::<u32>(plic_sclaim(hart)).read_volatile() }
}

/// Tells the PLIC the IRQ is handled and may fire again.
pub fn complete(irq: u32) {
    let hart = cpu::id();
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(plic_sclaim(hart)).write_volatile(irq);
    }
}
