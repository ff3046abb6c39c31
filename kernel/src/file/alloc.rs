//! Backing storage for the system-wide file table: a slab of `NFILE`
//! `Arc` cells, so "too many open files" is an error instead of heap
//! growth.

use alloc::sync::Arc;
use core::{
    alloc::{AllocError, Allocator, Layout},
    mem::MaybeUninit,
    ops::Deref,
    ptr::NonNull,
};

use nv6_kernel_params::NFILE;
use once_init::OnceInit;
use slab_allocator::{ArcShell, FixedSlab};

use crate::{
    error::{Error, Result},
    sync::SpinLock,
};

use super::FileData;

type Shell = ArcShell<FileData>;

static SLAB: OnceInit<SpinLock<FixedSlab<Shell>>> = OnceInit::new();

pub(super) fn init() {
    static mut FILE_MEMORY: [MaybeUninit<Shell>; NFILE] = [const { MaybeUninit::uninit() }; NFILE];

    unsafe {
        let start = (&raw mut FILE_MEMORY).cast::<Shell>();
        SLAB.init(SpinLock::new(FixedSlab::new(start..start.add(NFILE))));
    }
}

#[derive(Clone)]
struct FileAlloc;

unsafe impl Allocator for FileAlloc {
    fn allocate(&self, layout: Layout) -> core::result::Result<NonNull<[u8]>, AllocError> {
        assert_eq!(layout, Layout::new::<Shell>());
        let slot = SLAB.get().lock().allocate().ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(slot.cast(), layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe { SLAB.get().lock().deallocate(ptr.cast()) }
    }
}

#[derive(Clone)]
pub(super) struct FileArc(Arc<FileData, FileAlloc>);

impl Deref for FileArc {
    type Target = FileData;

    fn deref(&self) -> &FileData {
        &self.0
    }
}

impl FileArc {
    pub(super) fn try_new(data: FileData) -> Result<Self> {
        let arc = Arc::try_new_in(data, FileAlloc).map_err(|AllocError| Error::OutOfFiles)?;
        Ok(Self(arc))
    }
}
