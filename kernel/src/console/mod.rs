//! The console: a line-disciplined character device over the UART.
//!
//! Input characters arrive from the UART interrupt; the discipline handles
//! erase (^H or delete), kill-line (^U), end-of-file (^D), and ^P (process
//! dump), echoes, and wakes readers when a full line is ready. Reads return
//! at most one line.

use crate::{
    error::{Error, Result},
    file::{self, DeviceIo, Major},
    memory::vm_user::{VmDst, VmSrc},
    proc::{self, Proc},
    sync::{CondVar, SpinLock},
};

pub mod print;
pub mod uart;

const fn ctrl(c: u8) -> u8 {
    c - b'@'
}

const CTRL_H: u8 = ctrl(b'H');
const CTRL_U: u8 = ctrl(b'U');
const CTRL_D: u8 = ctrl(b'D');
const CTRL_P: u8 = ctrl(b'P');
const DEL: u8 = 0x7f;

const INPUT_BUF: usize = 128;

struct Input {
    buf: [u8; INPUT_BUF],
    /// read cursor: next byte `read()` consumes
    r: usize,
    /// write cursor: end of complete lines
    w: usize,
    /// edit cursor: end of the line being typed
    e: usize,
}

static INPUT: SpinLock<Input> = SpinLock::new(Input {
    buf: [0; INPUT_BUF],
    r: 0,
    w: 0,
    e: 0,
});
static LINE_READY: CondVar = CondVar::new();

/// Sends one character to the UART, synchronously.
///
/// Used by `print!` and input echo, not by user `write()`s.
pub fn put_char(c: char) {
    let mut utf8 = [0; 4];
    for b in c.encode_utf8(&mut utf8).bytes() {
        uart::putc_sync(b);
    }
}

fn rub_out() {
    uart::putc_sync(0x08);
    uart::putc_sync(b' ');
    uart::putc_sync(0x08);
}

/// Accepts one input byte from the UART interrupt.
pub fn handle_input(c: u8) {
    let mut input = INPUT.lock();

    match c {
        CTRL_P => proc::dump(),
        CTRL_U => {
            while input.e != input.w && input.buf[(input.e - 1) % INPUT_BUF] != b'\n' {
                input.e -= 1;
                rub_out();
            }
        }
        CTRL_H | DEL => {
            if input.e != input.w {
                input.e -= 1;
                rub_out();
            }
        }
        _ => {
            if c != 0 && input.e - input.r < INPUT_BUF {
                let c = if c == b'\r' { b'\n' } else { c };

                put_char(c as char);

                let e = input.e;
                input.buf[e % INPUT_BUF] = c;
                input.e += 1;

                if c == b'\n' || c == CTRL_D || input.e - input.r == INPUT_BUF {
                    // the line is complete; hand it to read()
                    input.w = input.e;
                    LINE_READY.notify();
                }
            }
        }
    }
}

/// User `read()` from the console: up to one line.
fn read(p: &Proc, mut dst: VmDst, n: usize) -> Result<usize> {
    let mut copied = 0;
    let mut input = INPUT.lock();
    while copied < n {
        // wait for the interrupt handler to finish a line
        while input.r == input.w {
            if p.shared().lock().killed() {
                return Err(Error::Killed);
            }
            input = LINE_READY.wait(input);
        }

        let c = input.buf[input.r % INPUT_BUF];
        input.r += 1;

        if c == CTRL_D {
            if copied > 0 && copied < n {
                // keep the ^D for the next read so this one's short count
                // is not mistaken for end-of-file
                input.r -= 1;
            }
            break;
        }

        if dst.write_at(copied, &[c]).is_err() {
            if copied > 0 {
                break;
            }
            return Err(Error::BadAddress(0));
        }
        copied += 1;

        if c == b'\n' {
            break;
        }
    }
    Ok(copied)
}

/// User `write()` to the console.
fn write(_p: &Proc, src: VmSrc, n: usize) -> Result<usize> {
    for i in 0..n {
        let mut c = [0];
        if src.read_at(i, &mut c).is_err() {
            if i > 0 {
                return Ok(i);
            }
            return Err(Error::BadAddress(0));
        }
        uart::putc(c[0]);
    }
    Ok(n)
}

/// Brings up the UART and registers the console as character device 1.
pub fn init() {
    uart::init();
    file::register_device(Major::CONSOLE, DeviceIo { read, write });
}
