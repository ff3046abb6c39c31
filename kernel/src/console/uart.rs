//! 16550a UART driver. Outside the core: the console layer only needs a
//! byte sink and interrupt-driven byte delivery.

use core::{hint, ptr, sync::atomic::Ordering};

use crate::{
    console, interrupt,
    memory::layout::UART0,
    proc,
    sync::{Chan, SpinLock},
};

use super::print::PANICKED;

const fn reg(offset: usize) -> *mut u8 {
    ptr::without_provenance_mut::<u8>(UART0 + offset)
}

// register map; see the 16550 datasheet
/// receive holding (read)
const RHR: usize = 0;
/// transmit holding (write)
const THR: usize = 0;
/// interrupt enable
const IER: usize = 1;
const IER_RX: u8 = 1 << 0;
const IER_TX: u8 = 1 << 1;
/// FIFO control (write)
const FCR: usize = 2;
const FCR_ENABLE: u8 = 1 << 0;
const FCR_CLEAR: u8 = 3 << 1;
/// interrupt status (read)
const ISR: usize = 2;
/// line control
const LCR: usize = 3;
const LCR_EIGHT_BITS: u8 = 3;
const LCR_BAUD_LATCH: u8 = 1 << 7;
/// line status
const LSR: usize = 5;
const LSR_RX_READY: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

fn read_reg(offset: usize) -> u8 {
    unsafe { reg(offset).read_volatile() }
}

fn write_reg(offset: usize, value: u8) {
    unsafe { reg(offset).write_volatile(value) }
}

struct TxRing {
    buf: [u8; 32],
    /// next write goes to buf[w % len]
    w: usize,
    /// next read comes from buf[r % len]
    r: usize,
}

impl TxRing {
    fn is_empty(&self) -> bool {
        self.r == self.w
    }

    fn is_full(&self) -> bool {
        self.w == self.r + self.buf.len()
    }
}

static TX: SpinLock<TxRing> = SpinLock::new(TxRing {
    buf: [0; 32],
    w: 0,
    r: 0,
});

pub fn init() {
    // disable interrupts while programming
    write_reg(IER, 0x00);
    // set the divisor for 38.4K baud
    write_reg(LCR, LCR_BAUD_LATCH);
    write_reg(0, 0x03);
    write_reg(1, 0x00);
    // 8 data bits, no parity
    write_reg(LCR, LCR_EIGHT_BITS);
    write_reg(FCR, FCR_ENABLE | FCR_CLEAR);
    write_reg(IER, IER_TX | IER_RX);
}

/// Queues `c` for transmission, sleeping while the ring is full.
///
/// May block, so this is for `write()`; interrupt context uses
/// [`putc_sync`].
pub fn putc(c: u8) {
    let mut tx = TX.lock();

    if PANICKED.load(Ordering::Relaxed) {
        loop {
            hint::spin_loop();
        }
    }

    while tx.is_full() {
        let chan = Chan::of(&tx.r);
        tx = proc::sleep(chan, tx);
    }
    let w = tx.w;
    let len = tx.buf.len();
    tx.buf[w % len] = c;
    tx.w += 1;
    pump(&mut tx);
}

/// Transmits `c` now, spinning until the holding register drains.
///
/// For kernel `print!` and input echo; usable from any context.
pub fn putc_sync(c: u8) {
    interrupt::with_off(|| {
        if PANICKED.load(Ordering::Relaxed) {
            loop {
                hint::spin_loop();
            }
        }
        while read_reg(LSR) & LSR_TX_IDLE == 0 {
            hint::spin_loop();
        }
        write_reg(THR, c);
    });
}

/// Feeds the transmit holding register from the ring while both have room.
///
/// Caller holds the TX lock; runs from both `putc` and the interrupt.
fn pump(tx: &mut TxRing) {
    loop {
        if tx.is_empty() {
            read_reg(ISR);
            return;
        }
        if read_reg(LSR) & LSR_TX_IDLE == 0 {
            // full; the UART interrupts when it wants more
            return;
        }
        let r = tx.r;
        let len = tx.buf.len();
        let c = tx.buf[r % len];
        tx.r += 1;
        // putc may be waiting for ring space
        proc::wakeup(Chan::of(&tx.r));
        write_reg(THR, c);
    }
}

fn getc() -> Option<u8> {
    (read_reg(LSR) & LSR_RX_READY != 0).then(|| read_reg(RHR))
}

/// The UART raised an interrupt: input arrived, output drained, or both.
pub fn handle_interrupt() {
    while let Some(c) = getc() {
        console::handle_input(c);
    }

    let mut tx = TX.lock();
    pump(&mut tx);
}
