//! The physical page allocator.
//!
//! A thin wrapper over [`page_alloc::FreePageList`] covering
//! `[kernel_end, PHYS_TOP)`. Pages are poisoned on both allocation and
//! free so stale pointers trip fast.

use core::{
    alloc::{AllocError, Allocator, Layout},
    ptr::{self, NonNull},
};

use once_init::OnceInit;
use page_alloc::FreePageList;

use crate::{
    error::{Error, Result},
    memory::{PAGE_SIZE, layout, page_round_up},
    sync::{SpinLock, SpinLockGuard},
};

static FRAMES: OnceInit<SpinLock<FreePageList<PAGE_SIZE>>> = OnceInit::new();

pub fn init() {
    let start = page_round_up(layout::kernel_end());
    let end = layout::PHYS_TOP;
    unsafe {
        FRAMES.init(SpinLock::new(FreePageList::new(
            ptr::with_exposed_provenance_mut(start)..ptr::with_exposed_provenance_mut(end),
        )));
    }
}

pub(crate) fn frames() -> SpinLockGuard<'static, FreePageList<PAGE_SIZE>> {
    FRAMES.get().lock()
}

/// Allocates one page, filled with junk.
pub fn alloc() -> Result<NonNull<u8>> {
    let page = frames().alloc().ok_or(Error::OutOfPages)?;
    unsafe {
        page.write_bytes(0x05, PAGE_SIZE);
    }
    Ok(page)
}

/// Allocates one zeroed page.
pub fn alloc_zeroed() -> Result<NonNull<u8>> {
    frames().alloc_zeroed().ok_or(Error::OutOfPages)
}

/// Frees a page previously returned by [`alloc`] or [`alloc_zeroed`].
///
/// # Safety
///
/// `page` must be an owned, unreferenced allocation from this allocator.
pub unsafe fn free(page: NonNull<u8>) {
    unsafe {
        // junk-fill to catch dangling use
        page.write_bytes(0x01, PAGE_SIZE);
        frames().free(page);
    }
}

/// Whole-page `Allocator` for `Box`/`Arc` values that live in their own
/// frame (page tables, pipe buffers).
#[derive(Clone, Copy)]
pub struct PageFrame;

unsafe impl Allocator for PageFrame {
    fn allocate(&self, layout: Layout) -> core::result::Result<NonNull<[u8]>, AllocError> {
        assert!(layout.size() <= PAGE_SIZE);
        assert!(layout.align() <= PAGE_SIZE);
        let page = frames().alloc().ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(page, PAGE_SIZE))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe {
            free(ptr);
        }
    }
}
