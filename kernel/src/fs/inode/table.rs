//! The in-memory inode table.
//!
//! Identity map from `(dev, ino)` to the shared in-memory inode state.
//! Each live inode is an `Arc<SleepLock<Option<InodeBody>>>` carved from a
//! fixed slab of `NINODE` slots; the table itself holds only weak
//! references, so an entry whose last strong reference drops frees its
//! slot without further bookkeeping. At most one live entry exists per
//! key.

use alloc::sync::{Arc, Weak};
use core::{
    alloc::{AllocError, Allocator, Layout},
    mem::MaybeUninit,
    ptr::NonNull,
};

use nv6_fs_types::InodeNo;
use nv6_kernel_params::NINODE;
use once_init::OnceInit;
use slab_allocator::{ArcShell, FixedSlab};

use crate::{
    error::{Error, Result},
    fs::Dev,
    sync::{SleepLock, SpinLock, SpinLockGuard},
};

use super::InodeBody;

type SlotData = SleepLock<Option<InodeBody>>;
type Shell = ArcShell<SlotData>;

pub(super) type SlotArc = Arc<SlotData, SlotAlloc>;
type SlotWeak = Weak<SlotData, SlotAlloc>;

static SLAB: OnceInit<SpinLock<FixedSlab<Shell>>> = OnceInit::new();

pub(super) fn init() {
    static mut SLOT_MEMORY: [MaybeUninit<Shell>; NINODE] =
        [const { MaybeUninit::uninit() }; NINODE];

    unsafe {
        let start = (&raw mut SLOT_MEMORY).cast::<Shell>();
        SLAB.init(SpinLock::new(FixedSlab::new(start..start.add(NINODE))));
    }
}

#[derive(Clone)]
pub(super) struct SlotAlloc;

unsafe impl Allocator for SlotAlloc {
    fn allocate(&self, layout: Layout) -> core::result::Result<NonNull<[u8]>, AllocError> {
        assert_eq!(layout, Layout::new::<Shell>());
        let slot = SLAB.get().lock().allocate().ok_or(AllocError)?;
        Ok(NonNull::slice_from_raw_parts(slot.cast(), layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe { SLAB.get().lock().deallocate(ptr.cast()) }
    }
}

pub(super) struct InodeTable {
    entries: [Option<(Dev, InodeNo, SlotWeak)>; NINODE],
}

static TABLE: SpinLock<InodeTable> = SpinLock::new(InodeTable {
    entries: [const { None }; NINODE],
});

/// Serializes last-reference checks against lookups.
pub(super) fn lock() -> SpinLockGuard<'static, InodeTable> {
    TABLE.lock()
}

/// Returns the live state for `(dev, ino)`, creating it if absent.
pub(super) fn get_or_insert(dev: Dev, ino: InodeNo) -> Result<SlotArc> {
    let mut table = TABLE.lock();

    let mut empty = None;
    for (i, entry) in table.entries.iter_mut().enumerate() {
        let Some((edev, eino, weak)) = entry else {
            empty.get_or_insert(i);
            continue;
        };

        if let Some(live) = weak.upgrade() {
            if *edev == dev && *eino == ino {
                return Ok(live);
            }
            continue;
        }

        // last reference went away; the slot is reusable
        *entry = None;
        empty.get_or_insert(i);
    }

    let i = empty.ok_or(Error::OutOfInodeSlots)?;
    let live = Arc::try_new_in(SleepLock::new(None), SlotAlloc)
        .map_err(|AllocError| Error::OutOfInodeSlots)?;
    table.entries[i] = Some((dev, ino, Arc::downgrade(&live)));
    Ok(live)
}
