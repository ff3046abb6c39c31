//! Inodes: the in-memory view of on-disk files.
//!
//! Three reference shapes, from loosest to tightest grip:
//!
//! * [`Inode`] — a detached handle (an open file's inode, a cwd). Keeps
//!   the in-memory state alive but permits no I/O; it must be re-attached
//!   to a transaction before it can do anything, including be dropped.
//! * [`InodeRef`] — a handle inside a transaction. Cloning bumps the
//!   reference count; dropping the last reference of an unlinked inode
//!   truncates and frees it on disk (which is why a transaction must be
//!   in scope).
//! * [`InodeGuard`] — the sleep lock held. Loads the on-disk inode on
//!   first lock; all field access and content I/O happens here.
//!
//! Lock order: the table spin lock is never held across the sleep-lock
//! acquisition except in the last-reference drop, where the count
//! guarantees the lock is free.

use core::mem::ManuallyDrop;

use nv6_fs_types::{BlockNo, Dinode, InodeBlock, InodeNo, NUM_DIRECT, T_NONE};

use crate::{
    error::{Error, Result},
    sync::SleepLockGuard,
};

use self::table::SlotArc;
use super::{Dev, Tx, superblock};

mod content;
mod dir;
mod table;

pub(super) fn init() {
    table::init();
}

/// Cached copy of one on-disk inode.
pub(super) struct InodeBody {
    pub(super) ty: u16,
    pub(super) major: u16,
    pub(super) minor: u16,
    pub(super) nlink: u16,
    pub(super) size: u32,
    pub(super) addrs: [Option<BlockNo>; NUM_DIRECT + 1],
}

impl InodeBody {
    fn from_disk(d: &Dinode) -> Self {
        let mut addrs = [None; NUM_DIRECT + 1];
        for (slot, &a) in addrs.iter_mut().zip(&d.addrs) {
            *slot = (a != 0).then_some(BlockNo::new(a));
        }
        Self {
            ty: d.ty,
            major: d.major,
            minor: d.minor,
            nlink: d.nlink,
            size: d.size,
            addrs,
        }
    }

    fn to_disk(&self, d: &mut Dinode) {
        d.ty = self.ty;
        d.major = self.major;
        d.minor = self.minor;
        d.nlink = self.nlink;
        d.size = self.size;
        for (slot, a) in d.addrs.iter_mut().zip(&self.addrs) {
            *slot = a.map_or(0, BlockNo::value);
        }
    }
}

/// A detached inode handle; see the module docs.
pub struct Inode {
    dev: Dev,
    ino: InodeNo,
    slot: Option<SlotArc>,
}

impl Inode {
    /// The root directory's handle. No disk access.
    pub fn get_root() -> Self {
        let slot = table::get_or_insert(Dev::ROOT, InodeNo::ROOT).expect("inode table space");
        Self {
            dev: Dev::ROOT,
            ino: InodeNo::ROOT,
            slot: Some(slot),
        }
    }

    /// Another handle to the same inode.
    pub fn dup(&self) -> Self {
        Self {
            dev: self.dev,
            ino: self.ino,
            slot: self.slot.clone(),
        }
    }

    /// Re-enters a transaction's scope.
    pub fn attach<'t, const WRITE: bool>(mut self, tx: &'t Tx<WRITE>) -> InodeRef<'t, WRITE> {
        InodeRef {
            tx,
            dev: self.dev,
            ino: self.ino,
            slot: ManuallyDrop::new(self.slot.take().unwrap()),
        }
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        // Dropping the reference may free the inode on disk, which needs a
        // transaction; `attach` first.
        assert!(self.slot.is_none(), "inode handle dropped while detached");
    }
}

/// An inode handle bound to a transaction.
pub struct InodeRef<'t, const WRITE: bool> {
    tx: &'t Tx<WRITE>,
    dev: Dev,
    ino: InodeNo,
    /// Manually dropped so `Drop` can run the last-reference protocol
    /// before letting go of the slot.
    slot: ManuallyDrop<SlotArc>,
}

impl<'t, const WRITE: bool> InodeRef<'t, WRITE> {
    /// The in-memory inode for `(dev, ino)`, created if absent. Does not
    /// touch the disk or take the inode lock.
    pub fn get(tx: &'t Tx<WRITE>, dev: Dev, ino: InodeNo) -> Result<Self> {
        let slot = table::get_or_insert(dev, ino)?;
        Ok(Self {
            tx,
            dev,
            ino,
            slot: ManuallyDrop::new(slot),
        })
    }

    pub fn dev(&self) -> Dev {
        self.dev
    }

    pub fn ino(&self) -> InodeNo {
        self.ino
    }

    /// A handle that outlives this transaction.
    pub fn detach(&self) -> Inode {
        Inode {
            dev: self.dev,
            ino: self.ino,
            slot: Some(SlotArc::clone(&self.slot)),
        }
    }

    /// Drops the reference. (Plain drop; named for call sites where the
    /// intent matters.)
    pub fn put(self) {
        drop(self);
    }

    /// Acquires the inode lock, reading the inode from disk on first use.
    ///
    /// `&mut self` keeps one reference from locking twice and
    /// self-deadlocking.
    pub fn lock<'r>(&'r mut self) -> InodeGuard<'t, 'r, WRITE> {
        let data = self.slot.lock();
        InodeGuard::new(self.tx, self.dev, self.ino, data)
    }
}

impl<const WRITE: bool> Clone for InodeRef<'_, WRITE> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx,
            dev: self.dev,
            ino: self.ino,
            slot: ManuallyDrop::new(SlotArc::clone(&self.slot)),
        }
    }
}

impl<'t> InodeRef<'t, true> {
    /// Allocates a fresh on-disk inode of type `ty` and returns its
    /// reference.
    pub fn create(tx: &'t Tx<true>, dev: Dev, ty: u16) -> Result<Self> {
        let sb = superblock();
        for n in 1..sb.ninodes {
            let ino = InodeNo::new(n);
            let mut b = tx.get(dev, sb.inode_block(ino));
            if b.view::<InodeBlock>().inode(ino).is_free() {
                b.view_mut::<InodeBlock>().inode_mut(ino).claim(ty);
                drop(b);
                return Self::get(tx, dev, ino);
            }
        }
        Err(Error::OutOfInodes)
    }
}

impl<const WRITE: bool> Drop for InodeRef<'_, WRITE> {
    fn drop(&mut self) {
        let table = table::lock();
        if SlotArc::strong_count(&self.slot) > 1 {
            drop(table);
            // SAFETY: dropped exactly once, here.
            unsafe { ManuallyDrop::drop(&mut self.slot) };
            return;
        }

        // Last reference anywhere: the sleep lock must be free.
        let data = self.slot.try_lock().expect("last inode ref still locked");
        let unlinked = matches!(&*data, Some(body) if body.nlink == 0);
        drop(table);

        // No links and no references: give the disk inode back. Only a
        // writing transaction can; a read-only one leaves the reclaim to
        // the next unlink.
        match (unlinked, self.tx.as_write()) {
            (true, Some(tx)) => {
                let mut guard = InodeGuard::from_parts(tx, self.dev, self.ino, data);
                guard.truncate();
                guard.free();
            }
            _ => drop(data),
        }

        // SAFETY: dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.slot) };
    }
}

/// The inode lock, plus everything that needs it held.
pub struct InodeGuard<'t, 'r, const WRITE: bool> {
    tx: &'t Tx<WRITE>,
    dev: Dev,
    ino: InodeNo,
    data: SleepLockGuard<'r, Option<InodeBody>>,
}

impl<'t, 'r, const WRITE: bool> InodeGuard<'t, 'r, WRITE> {
    fn new(
        tx: &'t Tx<WRITE>,
        dev: Dev,
        ino: InodeNo,
        mut data: SleepLockGuard<'r, Option<InodeBody>>,
    ) -> Self {
        if data.is_none() {
            let sb = superblock();
            let b = tx.get(dev, sb.inode_block(ino));
            let d = b.view::<InodeBlock>().inode(ino);
            assert_ne!(d.ty, T_NONE, "inode {ino:?} in use but free on disk");
            *data = Some(InodeBody::from_disk(d));
        }
        Self { tx, dev, ino, data }
    }

    /// Wraps an already-held lock; the last-reference drop path.
    fn from_parts(
        tx: &'t Tx<WRITE>,
        dev: Dev,
        ino: InodeNo,
        data: SleepLockGuard<'r, Option<InodeBody>>,
    ) -> Self {
        Self { tx, dev, ino, data }
    }

    pub fn dev(&self) -> Dev {
        self.dev
    }

    pub fn ino(&self) -> InodeNo {
        self.ino
    }

    pub(super) fn body(&self) -> &InodeBody {
        self.data.as_ref().unwrap()
    }

    pub(super) fn body_mut(&mut self) -> &mut InodeBody {
        self.data.as_mut().unwrap()
    }

    pub fn ty(&self) -> u16 {
        self.body().ty
    }

    pub fn size(&self) -> u32 {
        self.body().size
    }

    pub fn nlink(&self) -> u16 {
        self.body().nlink
    }

    pub fn major(&self) -> u16 {
        self.body().major
    }

    pub fn is_dir(&self) -> bool {
        self.ty() == nv6_fs_types::T_DIR
    }
}
