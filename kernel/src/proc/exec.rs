//! `exec`: replace the user image with an ELF from the file system.
//!
//! The new image is built in a fresh address space; the swap happens only
//! after everything has succeeded, so a failed exec leaves the caller's
//! image exactly as it was.

use alloc::boxed::Box;
use core::slice;

use nv6_kernel_params::{MAX_ARG, USER_STACK_PAGES};

use crate::{
    error::{Error, Result},
    fs::{self, InodeGuard},
    memory::{
        PAGE_SIZE, VirtAddr,
        page::PageFrame,
        page_table::PteFlags,
        vm_user::{UserVm, VmDst},
    },
    proc::{
        Proc, ProcOwned,
        elf::{ELF_MAGIC, FileHeader, PF_W, PF_X, PT_LOAD, ProgramHeader},
    },
};

/// One copied-in argument string: a page plus its used length.
pub struct ArgPage {
    pub buf: Box<[u8; PAGE_SIZE], PageFrame>,
    pub len: usize,
}

fn segment_perm(flags: u32) -> PteFlags {
    let mut perm = PteFlags::empty();
    if flags & PF_X != 0 {
        perm |= PteFlags::X;
    }
    if flags & PF_W != 0 {
        perm |= PteFlags::W;
    }
    perm
}

/// Replaces the current image with `path`'s program, passing `argv`.
///
/// Returns argc (the new program's `a0`); the argv pointer is stored
/// directly into the trapframe's `a1`.
pub fn exec(p: &Proc, owned: &mut ProcOwned, path: &[u8], argv: &[ArgPage]) -> Result<usize> {
    let (mut vm, entry) = {
        let tx = fs::begin_tx();
        let mut ip = fs::path::resolve(&tx, owned, path)?;
        let mut lip = ip.lock();

        let header: FileHeader = lip.read_struct(0).map_err(|_| Error::BadElf)?;
        if header.magic != ELF_MAGIC {
            return Err(Error::BadElf);
        }

        let mut vm = UserVm::new(owned.trapframe())?;
        load_segments(&mut lip, &mut vm, &header)?;

        let entry = header.entry;
        drop(lip);
        ip.put();
        (vm, entry)
    };

    build_stack(&mut vm)?;
    let sp = push_arguments(&mut vm, argv)?;

    let name = path.rsplit(|&b| b == b'/').next().unwrap_or(path);
    p.shared().lock().set_name(name);

    // the point of no return: commit the new image, free the old
    owned.replace_vm(vm);
    let tf = owned.trapframe_mut();
    tf.epc = entry;
    tf.sp = sp as u64;
    tf.a1 = sp as u64; // argv for the new program's main

    Ok(argv.len())
}

fn load_segments(
    lip: &mut InodeGuard<'_, '_, true>,
    vm: &mut UserVm,
    header: &FileHeader,
) -> Result<()> {
    for i in 0..header.phnum {
        let off = usize::try_from(header.phoff).unwrap() + usize::from(i) * size_of::<ProgramHeader>();
        let ph: ProgramHeader = lip.read_struct(off).map_err(|_| Error::BadElf)?;
        if ph.ty != PT_LOAD {
            continue;
        }
        if ph.memsz < ph.filesz {
            return Err(Error::BadElf);
        }
        if ph.vaddr.checked_add(ph.memsz).is_none() {
            return Err(Error::BadElf);
        }
        let start = VirtAddr::new(usize::try_from(ph.vaddr).map_err(|_| Error::BadElf)?)?;
        if !start.is_page_aligned() {
            return Err(Error::BadElf);
        }
        let end = start.byte_add(usize::try_from(ph.memsz).map_err(|_| Error::BadElf)?)?;

        vm.grow_to(end.addr(), segment_perm(ph.flags))?;
        load_segment(
            lip,
            vm,
            start,
            ph.off.try_into().unwrap(),
            ph.filesz.try_into().unwrap(),
        )?;
    }
    Ok(())
}

/// Copies `file_size` bytes at `file_off` into the pages backing `va`.
fn load_segment(
    lip: &mut InodeGuard<'_, '_, true>,
    vm: &UserVm,
    va: VirtAddr,
    file_off: usize,
    file_size: usize,
) -> Result<()> {
    assert!(va.is_page_aligned());

    for chunk in (0..file_size).step_by(PAGE_SIZE) {
        let n = (file_size - chunk).min(PAGE_SIZE);
        let pa = vm
            .translate(va.byte_add(chunk)?, PteFlags::U)
            .expect("segment page just mapped");
        let dst = unsafe { slice::from_raw_parts_mut(pa.as_ptr::<u8>().as_ptr(), n) };
        let read = lip.read(VmDst::Kernel(dst), file_off + chunk, n)?;
        if read != n {
            return Err(Error::BadElf);
        }
    }
    Ok(())
}

/// Appends the guarded user stack above the loaded image.
fn build_stack(vm: &mut UserVm) -> Result<()> {
    let base = crate::memory::page_round_up(vm.size());
    vm.grow_to(base + (USER_STACK_PAGES + 1) * PAGE_SIZE, PteFlags::W)?;
    // the lowest of the new pages is the inaccessible guard
    vm.protect_guard(VirtAddr::new_unchecked(base))?;
    Ok(())
}

/// Pushes the argument strings and the argv array; returns the final sp.
fn push_arguments(vm: &mut UserVm, argv: &[ArgPage]) -> Result<usize> {
    if argv.len() >= MAX_ARG {
        return Err(Error::ArgumentListTooLong);
    }

    let mut sp = vm.size();
    let stack_base = sp - USER_STACK_PAGES * PAGE_SIZE;
    let mut slots = [0_usize; MAX_ARG];

    for (arg, slot) in argv.iter().zip(&mut slots) {
        sp -= arg.len + 1;
        sp -= sp % 16; // riscv sp alignment
        if sp < stack_base {
            return Err(Error::ArgumentListTooLong);
        }
        vm.copy_out_bytes(VirtAddr::new_unchecked(sp), &arg.buf[..arg.len])?;
        vm.copy_out_bytes(VirtAddr::new_unchecked(sp + arg.len), &[0])?;
        *slot = sp;
    }
    slots[argv.len()] = 0;

    let table_bytes = (argv.len() + 1) * size_of::<usize>();
    sp -= table_bytes;
    sp -= sp % 16;
    if sp < stack_base {
        return Err(Error::ArgumentListTooLong);
    }
    let table =
        unsafe { slice::from_raw_parts(slots.as_ptr().cast::<u8>(), table_bytes) };
    vm.copy_out_bytes(VirtAddr::new_unchecked(sp), table)?;

    Ok(sp)
}
