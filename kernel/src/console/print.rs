//! Formatted kernel output and the panic handler.

use core::{
    fmt::{self, Write as _},
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{console, sync::SpinLock};

/// Set on panic; freezes UART output from the other harts.
pub static PANICKED: AtomicBool = AtomicBool::new(false);

// serializes whole print! invocations so lines don't interleave
struct PrintLock {
    locking: AtomicBool,
    lock: SpinLock<()>,
}

static PRINT: PrintLock = PrintLock {
    locking: AtomicBool::new(true),
    lock: SpinLock::new(()),
};

struct Writer<'a> {
    _guard: Option<crate::sync::SpinLockGuard<'a, ()>>,
}

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            console::put_char(c);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let guard = PRINT
        .locking
        .load(Ordering::Relaxed)
        .then(|| PRINT.lock.lock());
    let mut writer = Writer { _guard: guard };
    writer.write_fmt(args).unwrap();
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    // print without the lock; the holder may be the panicking hart
    PRINT.locking.store(false, Ordering::Relaxed);
    println!("kernel panic: {info}");
    PANICKED.store(true, Ordering::Relaxed);
    loop {
        hint::spin_loop();
    }
}
