//! Sv39 page tables.
//!
//! Three levels, 512 eight-byte entries per level, 9-bit indices, 12-bit
//! page offset. Interior entries carry only the valid bit; permission bits
//! make an entry a leaf.

use alloc::boxed::Box;
use core::alloc::AllocError;

use bitflags::bitflags;
use dataview::Pod;

use crate::{
    error::{Error, Result},
    memory::{PAGE_SIZE, PhysAddr, VirtAddr, page::PageFrame},
};

bitflags! {
    /// PTE permission and status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: usize {
        /// Entry present.
        const V = 1 << 0;
        /// Readable leaf.
        const R = 1 << 1;
        /// Writable leaf.
        const W = 1 << 2;
        /// Executable leaf.
        const X = 1 << 3;
        /// Accessible from user mode.
        const U = 1 << 4;
        /// Present in every address space.
        const G = 1 << 5;
        /// Hardware: page was read.
        const A = 1 << 6;
        /// Hardware: page was written.
        const D = 1 << 7;

        const RW = Self::R.bits() | Self::W.bits();
        const RX = Self::R.bits() | Self::X.bits();
        const RWX = Self::RW.bits() | Self::X.bits();
        const UR = Self::U.bits() | Self::R.bits();
        const URW = Self::U.bits() | Self::RW.bits();
        const URX = Self::U.bits() | Self::RX.bits();
        const URWX = Self::U.bits() | Self::RWX.bits();
    }
}

/// One page-table entry: 44-bit PPN plus the flag bits.
#[derive(Pod)]
#[repr(transparent)]
pub struct Pte(usize);

const FLAG_BITS: usize = 0x3ff;

impl Pte {
    fn new(pa: PhysAddr, flags: PteFlags) -> Self {
        Self((pa.ppn() << 10) | flags.bits())
    }

    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAG_BITS)
    }

    pub fn phys_addr(&self) -> PhysAddr {
        PhysAddr::from_ppn(self.0 >> 10)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    /// A valid entry with any of R/W/X set maps a page.
    pub fn is_leaf(&self) -> bool {
        self.is_valid() && self.flags().intersects(PteFlags::RWX)
    }

    fn is_interior(&self) -> bool {
        self.is_valid() && !self.flags().intersects(PteFlags::RWX)
    }

    fn set(&mut self, pa: PhysAddr, flags: PteFlags) {
        assert!(!self.is_valid(), "remap of a live entry");
        *self = Self::new(pa, flags | PteFlags::V);
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn set_flags(&mut self, flags: PteFlags) {
        self.0 = (self.0 & !FLAG_BITS) | flags.bits();
    }

    fn child(&self) -> Option<&PageTable> {
        self.is_interior()
            .then(|| unsafe { self.phys_addr().as_ptr::<PageTable>().as_ref() })
    }

    fn child_mut(&mut self) -> Option<&mut PageTable> {
        self.is_interior()
            .then(|| unsafe { self.phys_addr().as_ptr::<PageTable>().as_mut() })
    }
}

/// One level of an Sv39 table; exactly a page.
#[derive(Pod)]
#[repr(transparent)]
pub struct PageTable([Pte; 512]);

const _: () = assert!(size_of::<PageTable>() == PAGE_SIZE);

impl PageTable {
    /// Allocates an empty table in its own frame.
    pub fn try_new() -> Result<Box<Self, PageFrame>> {
        let table = Box::try_new_zeroed_in(PageFrame).map_err(|AllocError| Error::OutOfPages)?;
        Ok(unsafe { table.assume_init() })
    }

    pub fn phys_addr(&self) -> PhysAddr {
        PhysAddr::of(self)
    }

    /// The satp value selecting this root table in Sv39 mode.
    pub fn satp(&self) -> usize {
        const SATP_SV39: usize = 8 << 60;
        SATP_SV39 | self.phys_addr().ppn()
    }

    /// Walks to the leaf entry for `va`, visiting interior levels.
    ///
    /// With `build`, missing interior tables are allocated; without it, a
    /// missing level is [`Error::BadAddress`]. The callback may turn an
    /// invalid leaf entry into a mapping or clear one, never into an
    /// interior entry.
    pub fn walk_mut<T>(
        &mut self,
        va: VirtAddr,
        build: bool,
        f: impl FnOnce(&mut Pte) -> T,
    ) -> Result<T> {
        assert!(va < VirtAddr::TOP);

        let mut table = self;
        for level in [2, 1] {
            let pte = &mut table.0[va.index(level)];
            if !pte.is_valid() {
                if !build {
                    return Err(Error::BadAddress(va.addr()));
                }
                let child = Self::try_new()?;
                let pa = child.phys_addr();
                Box::leak(child);
                pte.set(pa, PteFlags::empty());
            }
            table = pte.child_mut().expect("interior entry expected");
        }

        let pte = &mut table.0[va.index(0)];
        let out = f(pte);
        assert!(!pte.is_interior(), "leaf slot turned interior");
        Ok(out)
    }

    /// Finds the valid leaf entry for `va`.
    pub fn find_leaf(&self, va: VirtAddr) -> Result<&Pte> {
        assert!(va < VirtAddr::TOP);

        let mut table = self;
        for level in [2, 1] {
            table = table.0[va.index(level)]
                .child()
                .ok_or(Error::BadAddress(va.addr()))?;
        }
        let pte = &table.0[va.index(0)];
        if !pte.is_leaf() {
            return Err(Error::BadAddress(va.addr()));
        }
        Ok(pte)
    }

    /// Maps the page at `va` to `pa`. `va` must be page-aligned and the
    /// slot empty.
    pub fn map_page(&mut self, va: VirtAddr, pa: PhysAddr, perm: PteFlags) -> Result<()> {
        assert!(va.is_page_aligned(), "va={va:#x}");
        assert!(perm.intersects(PteFlags::RWX), "perm={perm:?}");
        self.walk_mut(va, true, |pte| pte.set(pa, perm))
    }

    /// Maps `size` bytes starting at `va` to physical memory starting at
    /// `pa`. Both must be page-aligned.
    pub fn map_range(
        &mut self,
        va: VirtAddr,
        size: usize,
        pa: PhysAddr,
        perm: PteFlags,
    ) -> Result<()> {
        assert!(va.is_page_aligned());
        assert_eq!(size % PAGE_SIZE, 0);
        assert_ne!(size, 0);

        for off in (0..size).step_by(PAGE_SIZE) {
            self.map_page(va.byte_add(off)?, pa.byte_add(off), perm)?;
        }
        Ok(())
    }

    /// Removes the mapping at `va`, returning the frame it pointed to.
    ///
    /// A missing mapping is not an error; shrink paths may race ahead of
    /// what was ever mapped.
    pub fn unmap_page(&mut self, va: VirtAddr) -> Option<PhysAddr> {
        assert!(va.is_page_aligned());
        self.walk_mut(va, false, |pte| {
            if !pte.is_valid() {
                return None;
            }
            assert!(pte.is_leaf(), "unmap of an interior entry");
            let pa = pte.phys_addr();
            pte.clear();
            Some(pa)
        })
        .ok()
        .flatten()
    }

    /// Resolves `va` to a physical address, requiring `flags` on the leaf.
    pub fn translate(&self, va: VirtAddr, flags: PteFlags) -> Result<PhysAddr> {
        let pte = self.find_leaf(va.page_round_down())?;
        if !pte.flags().contains(flags) {
            return Err(Error::BadAddress(va.addr()));
        }
        Ok(pte.phys_addr().byte_add(va.page_offset()))
    }

    /// The page mapped at page-aligned `va`, as bytes.
    pub fn fetch_page(&self, va: VirtAddr, flags: PteFlags) -> Result<&mut [u8; PAGE_SIZE]> {
        assert!(va.is_page_aligned());
        let pa = self.translate(va, flags)?;
        Ok(unsafe { pa.as_ptr::<[u8; PAGE_SIZE]>().as_mut() })
    }

    /// Frees interior tables reachable from this one.
    ///
    /// Every leaf must already be unmapped.
    pub fn free_children(&mut self) {
        for pte in &mut self.0 {
            assert!(!pte.is_leaf(), "leaf mapping still present");
            if pte.is_interior() {
                let mut child =
                    unsafe { Box::from_raw_in(pte.phys_addr().as_ptr::<Self>().as_ptr(), PageFrame) };
                child.free_children();
                pte.clear();
            }
        }
    }
}
