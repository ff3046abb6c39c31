//! Process-side system calls.

use crate::{
    error::{Error, Result},
    interrupt::timer::{self, TICK, TICKS},
    proc::{self, Pid, Proc, ProcOwned},
    syscall,
};

pub(super) fn fork(p: &'static Proc, owned: &mut ProcOwned) -> Result<usize> {
    proc::fork(p, owned).map(|pid| pid.value() as usize)
}

pub(super) fn exit(p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let status = syscall::arg_int(owned, 0) as i32;
    proc::exit(p, owned, status)
}

pub(super) fn wait(p: &'static Proc, owned: &mut ProcOwned) -> Result<usize> {
    let status_addr = syscall::arg_addr(owned, 0)?;
    proc::wait(p, owned, status_addr).map(|pid| pid.value() as usize)
}

pub(super) fn kill(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let pid = syscall::arg_int(owned, 0) as i32;
    proc::kill(Pid::new(pid)).map(|()| 0)
}

pub(super) fn getpid(p: &Proc, _owned: &mut ProcOwned) -> Result<usize> {
    Ok(p.shared().lock().pid().value() as usize)
}

pub(super) fn sbrk(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let delta = syscall::arg_int(owned, 0) as isize;
    let old_size = owned.vm().size();
    proc::grow(owned, delta)?;
    Ok(old_size)
}

/// Sleep for `n` timer ticks.
pub(super) fn pause(p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let n = syscall::arg_int(owned, 0) as u64;
    let mut ticks = TICKS.lock();
    let start = *ticks;
    while *ticks - start < n {
        if p.shared().lock().killed() {
            return Err(Error::Killed);
        }
        ticks = TICK.wait(ticks);
    }
    Ok(0)
}

pub(super) fn uptime(_p: &Proc, _owned: &mut ProcOwned) -> Result<usize> {
    Ok(timer::uptime() as usize)
}
