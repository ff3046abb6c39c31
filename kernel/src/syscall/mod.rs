//! System-call dispatch and argument fetching.
//!
//! The number arrives in `a7`, arguments in `a0..a5`. Handlers return
//! `Result`; the dispatcher stores either the value or the all-ones
//! sentinel into the trapframe's `a0` — the only failure signal userspace
//! ever sees.

use nv6_syscall::{SYSCALL_ERROR, SyscallNo};

use crate::{
    error::Result,
    memory::VirtAddr,
    println,
    proc::{Proc, ProcOwned},
};

mod file;
mod proc;

/// Runs the system call selected by the trapframe.
pub fn dispatch(p: &'static Proc, owned: &mut ProcOwned) {
    let number = owned.trapframe().a7 as usize;
    let Some(code) = SyscallNo::from_repr(number) else {
        let shared = p.shared().lock();
        println!("{} {}: unknown syscall {number}", shared.pid(), shared.name());
        drop(shared);
        owned.trapframe_mut().a0 = SYSCALL_ERROR as u64;
        return;
    };

    let result = match code {
        SyscallNo::Fork => self::proc::fork(p, owned),
        SyscallNo::Exit => self::proc::exit(p, owned),
        SyscallNo::Wait => self::proc::wait(p, owned),
        SyscallNo::Pipe => self::file::pipe(p, owned),
        SyscallNo::Read => self::file::read(p, owned),
        SyscallNo::Kill => self::proc::kill(p, owned),
        SyscallNo::Exec => self::file::exec(p, owned),
        SyscallNo::Fstat => self::file::fstat(p, owned),
        SyscallNo::Chdir => self::file::chdir(p, owned),
        SyscallNo::Dup => self::file::dup(p, owned),
        SyscallNo::Getpid => self::proc::getpid(p, owned),
        SyscallNo::Sbrk => self::proc::sbrk(p, owned),
        SyscallNo::Pause => self::proc::pause(p, owned),
        SyscallNo::Uptime => self::proc::uptime(p, owned),
        SyscallNo::Open => self::file::open(p, owned),
        SyscallNo::Write => self::file::write(p, owned),
        SyscallNo::Mknod => self::file::mknod(p, owned),
        SyscallNo::Unlink => self::file::unlink(p, owned),
        SyscallNo::Link => self::file::link(p, owned),
        SyscallNo::Mkdir => self::file::mkdir(p, owned),
        SyscallNo::Close => self::file::close(p, owned),
    };

    owned.trapframe_mut().a0 = match result {
        Ok(value) => value as u64,
        Err(_) => SYSCALL_ERROR as u64,
    };
}

/// The raw `i`th argument register.
fn arg_raw(owned: &ProcOwned, i: usize) -> usize {
    let tf = owned.trapframe();
    let reg = match i {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("syscall argument index {i}"),
    };
    reg as usize
}

/// The `i`th argument as an integer.
fn arg_int(owned: &ProcOwned, i: usize) -> usize {
    arg_raw(owned, i)
}

/// The `i`th argument as a user virtual address.
///
/// Range-checked only; the page table decides accessibility at use.
fn arg_addr(owned: &ProcOwned, i: usize) -> Result<VirtAddr> {
    VirtAddr::new(arg_raw(owned, i))
}

/// Copies the NUL-terminated string argument `i` into `buf`; returns its
/// length.
fn arg_str(owned: &ProcOwned, i: usize, buf: &mut [u8]) -> Result<usize> {
    let va = arg_addr(owned, i)?;
    owned.vm().copy_in_str(buf, va)
}

/// Reads a user word (for exec's argv array).
fn fetch_word(owned: &ProcOwned, va: VirtAddr) -> Result<usize> {
    owned.vm().copy_in::<usize>(va)
}

/// Copies a NUL-terminated user string at `va` into `buf`; returns its
/// length.
fn fetch_str(owned: &ProcOwned, va: VirtAddr, buf: &mut [u8]) -> Result<usize> {
    owned.vm().copy_in_str(buf, va)
}
