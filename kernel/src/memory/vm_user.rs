//! Per-process user address spaces.

use alloc::boxed::Box;
use core::{cmp, slice};

use dataview::{Pod, PodMethods as _};

use crate::{
    error::{Error, Result},
    interrupt::{trampoline, trap::TrapFrame},
    memory::{
        PAGE_SIZE, PhysAddr, VirtAddr,
        layout::{TRAMPOLINE, TRAPFRAME},
        page::{self, PageFrame},
        page_table::{PageTable, PteFlags},
    },
};

/// A user address space: the root table plus the image size.
///
/// The image occupies `[0, size)`; the trapframe and trampoline are mapped
/// at the top. Dropping the value frees the image frames and the table
/// pages, but never the trapframe (the process owns that) or the trampoline
/// (shared).
pub struct UserVm {
    table: Box<PageTable, PageFrame>,
    size: usize,
}

impl UserVm {
    /// An empty space with trampoline and `tf` mapped.
    pub fn new(tf: &TrapFrame) -> Result<Self> {
        let mut table = PageTable::try_new()?;

        // supervisor-only, so no U bit on either page
        if let Err(e) = table.map_page(TRAMPOLINE, trampoline::code_phys_addr(), PteFlags::RX) {
            table.free_children();
            return Err(e);
        }
        if let Err(e) = table.map_page(TRAPFRAME, PhysAddr::of(tf), PteFlags::RW) {
            table.unmap_page(TRAMPOLINE);
            table.free_children();
            return Err(e);
        }

        Ok(Self { table, size: 0 })
    }

    /// Image size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The satp value for entering this space.
    pub fn satp(&self) -> usize {
        self.table.satp()
    }

    /// Copies the boot shim into page zero. First process only.
    pub fn load_first(&mut self, code: &[u8]) -> Result<()> {
        assert!(code.len() < PAGE_SIZE);
        assert_eq!(self.size, 0);

        let frame = page::alloc_zeroed()?;
        if let Err(e) = self.table.map_page(
            VirtAddr::ZERO,
            PhysAddr::new(frame.addr().get()),
            PteFlags::URWX,
        ) {
            unsafe {
                page::free(frame);
            }
            return Err(e);
        }
        unsafe { slice::from_raw_parts_mut(frame.as_ptr(), code.len()) }.copy_from_slice(code);
        self.size = PAGE_SIZE;
        Ok(())
    }

    /// Grows the image to `new_size` bytes, mapping zeroed writable frames.
    ///
    /// `xperm` adds to the user-read default (writable data, executable
    /// text). Partial growth is undone on failure.
    pub fn grow_to(&mut self, new_size: usize, xperm: PteFlags) -> Result<()> {
        if new_size <= self.size {
            return Ok(());
        }
        let old_size = self.size;

        let first = VirtAddr::new_unchecked(self.size).page_round_up();
        let end = VirtAddr::new(new_size)?;
        let mut va = first;
        while va < end {
            let frame = match page::alloc_zeroed() {
                Ok(f) => f,
                Err(e) => {
                    self.shrink_to(old_size);
                    return Err(e);
                }
            };
            if let Err(e) = self.table.map_page(
                va,
                PhysAddr::new(frame.addr().get()),
                xperm | PteFlags::UR,
            ) {
                unsafe {
                    page::free(frame);
                }
                self.shrink_to(old_size);
                return Err(e);
            }
            self.size = va.addr() + PAGE_SIZE;
            va = va.byte_add(PAGE_SIZE)?;
        }

        self.size = new_size;
        Ok(())
    }

    /// Shrinks the image to `new_size` bytes, freeing whole pages beyond it.
    pub fn shrink_to(&mut self, new_size: usize) {
        if new_size >= self.size {
            return;
        }

        let keep = VirtAddr::new_unchecked(new_size).page_round_up();
        let end = VirtAddr::new_unchecked(self.size).page_round_up();
        let mut va = keep;
        while va < end {
            if let Some(pa) = self.table.unmap_page(va) {
                unsafe {
                    page::free(pa.as_ptr());
                }
            }
            va = va.byte_add(PAGE_SIZE).unwrap();
        }
        self.size = new_size;
    }

    /// Duplicates this image into `target` page by page. Used by fork.
    pub fn clone_into(&self, target: &mut Self) -> Result<()> {
        assert_eq!(target.size, 0);

        let copy = || -> Result<()> {
            let mut va = VirtAddr::ZERO;
            while va.addr() < self.size {
                let pte = self.table.find_leaf(va)?;
                let flags = pte.flags();
                let src = pte.phys_addr();

                let frame = page::alloc()?;
                unsafe {
                    frame.copy_from(src.as_ptr(), PAGE_SIZE);
                }
                if let Err(e) =
                    target
                        .table
                        .map_page(va, PhysAddr::new(frame.addr().get()), flags)
                {
                    unsafe {
                        page::free(frame);
                    }
                    return Err(e);
                }
                target.size = va.addr() + PAGE_SIZE;
                va = va.byte_add(PAGE_SIZE)?;
            }
            target.size = self.size;
            Ok(())
        };

        copy().inspect_err(|_| target.shrink_to(0))
    }

    /// Removes user access from the page at `va`; exec's stack guard.
    pub fn protect_guard(&mut self, va: VirtAddr) -> Result<()> {
        self.table.walk_mut(va, false, |pte| {
            assert!(pte.is_leaf());
            let flags = pte.flags().difference(PteFlags::U);
            pte.set_flags(flags);
        })
    }

    /// Resolves `va` requiring user permissions `flags`.
    pub fn translate(&self, va: VirtAddr, flags: PteFlags) -> Result<PhysAddr> {
        self.table.translate(va, flags)
    }

    /// Copies `src` into user memory at `dst`.
    pub fn copy_out_bytes(&self, dst: VirtAddr, mut src: &[u8]) -> Result<()> {
        let mut va = dst;
        while !src.is_empty() {
            let page = self.table.fetch_page(va.page_round_down(), PteFlags::UW)?;
            let off = va.page_offset();
            let n = cmp::min(src.len(), PAGE_SIZE - off);
            page[off..off + n].copy_from_slice(&src[..n]);
            src = &src[n..];
            va = va.byte_add(n)?;
        }
        Ok(())
    }

    /// Copies a value into user memory at `dst`.
    pub fn copy_out<T: Pod>(&self, dst: VirtAddr, value: &T) -> Result<()> {
        self.copy_out_bytes(dst, value.as_bytes())
    }

    /// Fills `dst` from user memory at `src`.
    pub fn copy_in_bytes(&self, mut dst: &mut [u8], src: VirtAddr) -> Result<()> {
        let mut va = src;
        while !dst.is_empty() {
            let page = self.table.fetch_page(va.page_round_down(), PteFlags::UR)?;
            let off = va.page_offset();
            let n = cmp::min(dst.len(), PAGE_SIZE - off);
            dst[..n].copy_from_slice(&page[off..off + n]);
            dst = &mut dst[n..];
            va = va.byte_add(n)?;
        }
        Ok(())
    }

    /// Reads a value from user memory at `src`.
    pub fn copy_in<T: Pod>(&self, src: VirtAddr) -> Result<T> {
        let mut value = T::zeroed();
        self.copy_in_bytes(value.as_bytes_mut(), src)?;
        Ok(value)
    }

    /// Copies a NUL-terminated string from user memory into `dst`.
    ///
    /// Returns the length before the NUL. Fails if no NUL appears within
    /// `dst.len()` bytes.
    pub fn copy_in_str(&self, dst: &mut [u8], src: VirtAddr) -> Result<usize> {
        let cap = dst.len();
        let mut filled = 0;
        let mut va = src;
        while filled < cap {
            let page = self.table.fetch_page(va.page_round_down(), PteFlags::UR)?;
            let off = va.page_offset();
            let n = cmp::min(cap - filled, PAGE_SIZE - off);
            let chunk = &page[off..off + n];

            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                dst[filled..filled + nul].copy_from_slice(&chunk[..nul]);
                return Ok(filled + nul);
            }
            dst[filled..filled + n].copy_from_slice(chunk);
            filled += n;
            va = va.byte_add(n)?;
        }
        Err(Error::UnterminatedString(cap))
    }
}

impl Drop for UserVm {
    fn drop(&mut self) {
        self.table.unmap_page(TRAMPOLINE);
        self.table.unmap_page(TRAPFRAME);
        self.shrink_to(0);
        self.table.free_children();
    }
}

/// Source bytes for a transfer that may come from user or kernel memory.
///
/// The single tagged type replaces "pointer plus user flag" plumbing; each
/// direction has one copy primitive that all devices and the file layers
/// share.
pub enum VmSrc<'a> {
    User(&'a UserVm, VirtAddr),
    Kernel(&'a [u8]),
}

impl VmSrc<'_> {
    /// Copies `dst.len()` bytes starting `at` bytes into the source.
    pub fn read_at(&self, at: usize, dst: &mut [u8]) -> Result<()> {
        match self {
            Self::User(vm, va) => vm.copy_in_bytes(dst, va.byte_add(at)?),
            Self::Kernel(src) => {
                dst.copy_from_slice(&src[at..at + dst.len()]);
                Ok(())
            }
        }
    }
}

/// Destination for a transfer into user or kernel memory.
pub enum VmDst<'a> {
    User(&'a UserVm, VirtAddr),
    Kernel(&'a mut [u8]),
}

impl VmDst<'_> {
    /// Copies `src` to `at` bytes into the destination.
    pub fn write_at(&mut self, at: usize, src: &[u8]) -> Result<()> {
        match self {
            Self::User(vm, va) => vm.copy_out_bytes(va.byte_add(at)?, src),
            Self::Kernel(dst) => {
                dst[at..at + src.len()].copy_from_slice(src);
                Ok(())
            }
        }
    }
}
