//! File-side system calls.

use alloc::boxed::Box;

use arrayvec::ArrayVec;
use nv6_fs_types::{T_DEV, T_DIR, T_FILE};
use nv6_kernel_params::{MAX_ARG, MAX_PATH};
use nv6_syscall::OpenFlags;

use crate::{
    error::{Error, Result},
    file::{File, Major},
    fs::{self, ops},
    memory::{PAGE_SIZE, VirtAddr, page, page::PageFrame},
    proc::{
        Proc, ProcOwned,
        exec::{ArgPage, exec as do_exec},
    },
    syscall,
};

/// Fetches argument `i` as an open file of the calling process.
fn arg_file(owned: &ProcOwned, i: usize) -> Result<(usize, File)> {
    let fd = syscall::arg_int(owned, i);
    let file = owned.file(fd)?.dup();
    Ok((fd, file))
}

pub(super) fn dup(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let (_fd, file) = arg_file(owned, 0)?;
    owned.add_file(file)
}

pub(super) fn read(p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let va = syscall::arg_addr(owned, 1)?;
    let n = syscall::arg_int(owned, 2);
    let (_fd, file) = arg_file(owned, 0)?;
    file.read(p, owned, va, n)
}

pub(super) fn write(p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let va = syscall::arg_addr(owned, 1)?;
    let n = syscall::arg_int(owned, 2);
    let (_fd, file) = arg_file(owned, 0)?;
    file.write(p, owned, va, n)
}

pub(super) fn close(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let fd = syscall::arg_int(owned, 0);
    owned.take_file(fd)?.close();
    Ok(0)
}

pub(super) fn fstat(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let va = syscall::arg_addr(owned, 1)?;
    let (_fd, file) = arg_file(owned, 0)?;
    let stat = file.stat()?;
    owned.vm().copy_out(va, &stat)?;
    Ok(0)
}

pub(super) fn link(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let mut old_buf = [0; MAX_PATH];
    let mut new_buf = [0; MAX_PATH];
    let old_len = syscall::arg_str(owned, 0, &mut old_buf)?;
    let new_len = syscall::arg_str(owned, 1, &mut new_buf)?;

    let tx = fs::begin_tx();
    ops::link(&tx, owned, &old_buf[..old_len], &new_buf[..new_len])?;
    Ok(0)
}

pub(super) fn unlink(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let mut path_buf = [0; MAX_PATH];
    let len = syscall::arg_str(owned, 0, &mut path_buf)?;

    let tx = fs::begin_tx();
    ops::unlink(&tx, owned, &path_buf[..len])?;
    Ok(0)
}

pub(super) fn open(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let mut path_buf = [0; MAX_PATH];
    let len = syscall::arg_str(owned, 0, &mut path_buf)?;
    let path = &path_buf[..len];
    let flags = OpenFlags::from_bits_retain(syscall::arg_int(owned, 1));

    // The File is built only after the transaction ends: tearing down a
    // half-made file opens a transaction of its own, which must not nest
    // inside this one.
    let (node, ty, major) = {
        let tx = fs::begin_tx();
        let mut ip = if flags.contains(OpenFlags::CREATE) {
            ops::create(&tx, owned, path, T_FILE, 0, 0)?
        } else {
            let mut ip = fs::path::resolve(&tx, owned, path)?;
            let lip = ip.lock();
            if lip.is_dir() && flags != OpenFlags::RDONLY {
                return Err(Error::IsADirectory);
            }
            drop(lip);
            ip
        };

        let node = ip.detach();
        let mut lip = ip.lock();
        if flags.contains(OpenFlags::TRUNC) && lip.ty() == T_FILE {
            lip.truncate();
        }
        (node, lip.ty(), lip.major())
    };

    let file = if ty == T_DEV {
        File::new_device(Major(major), node, flags.readable(), flags.writable())?
    } else {
        File::new_inode(node, flags.readable(), flags.writable())?
    };

    owned.add_file(file)
}

pub(super) fn mkdir(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let mut path_buf = [0; MAX_PATH];
    let len = syscall::arg_str(owned, 0, &mut path_buf)?;

    let tx = fs::begin_tx();
    ops::create(&tx, owned, &path_buf[..len], T_DIR, 0, 0)?.put();
    Ok(0)
}

pub(super) fn mknod(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let mut path_buf = [0; MAX_PATH];
    let len = syscall::arg_str(owned, 0, &mut path_buf)?;
    let major = syscall::arg_int(owned, 1) as u16;
    let minor = syscall::arg_int(owned, 2) as u16;

    let tx = fs::begin_tx();
    ops::create(&tx, owned, &path_buf[..len], T_DEV, major, minor)?.put();
    Ok(0)
}

pub(super) fn chdir(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let mut path_buf = [0; MAX_PATH];
    let len = syscall::arg_str(owned, 0, &mut path_buf)?;

    let tx = fs::begin_tx();
    let mut ip = fs::path::resolve(&tx, owned, &path_buf[..len])?;
    let lip = ip.lock();
    if !lip.is_dir() {
        return Err(Error::NotADirectory);
    }
    drop(lip);

    let old = owned.swap_cwd(ip.detach());
    ip.put();
    old.attach(&tx).put();
    Ok(0)
}

pub(super) fn exec(p: &'static Proc, owned: &mut ProcOwned) -> Result<usize> {
    let mut path_buf = [0; MAX_PATH];
    let len = syscall::arg_str(owned, 0, &mut path_buf)?;
    let uargv = syscall::arg_addr(owned, 1)?;

    let mut args: ArrayVec<ArgPage, MAX_ARG> = ArrayVec::new();
    loop {
        if args.len() == MAX_ARG {
            return Err(Error::ArgumentListTooLong);
        }
        let word = syscall::fetch_word(owned, uargv.byte_add(args.len() * size_of::<usize>())?)?;
        if word == 0 {
            break;
        }

        // one whole frame per argument; boxed in place, never on the stack
        let frame = page::alloc_zeroed()?;
        let mut buf = unsafe {
            Box::from_raw_in(frame.cast::<[u8; PAGE_SIZE]>().as_ptr(), PageFrame)
        };
        let len = syscall::fetch_str(owned, VirtAddr::new(word)?, &mut buf[..])?;
        args.push(ArgPage { buf, len });
    }

    do_exec(p, owned, &path_buf[..len], &args)
}

pub(super) fn pipe(_p: &Proc, owned: &mut ProcOwned) -> Result<usize> {
    let fd_array = syscall::arg_addr(owned, 0)?;

    let (read_end, write_end) = File::new_pipe()?;
    let rfd = owned.add_file(read_end)?;
    let wfd = match owned.add_file(write_end) {
        Ok(fd) => fd,
        Err(e) => {
            owned.take_file(rfd).unwrap().close();
            return Err(e);
        }
    };

    let fds = [rfd as i32, wfd as i32];
    if owned.vm().copy_out(fd_array, &fds).is_err() {
        owned.take_file(rfd).unwrap().close();
        owned.take_file(wfd).unwrap().close();
        return Err(Error::BadAddress(fd_array.addr()));
    }
    Ok(0)
}
