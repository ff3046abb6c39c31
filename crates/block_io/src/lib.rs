//! A block buffer cache with LRU replacement.
//!
//! The cache holds a fixed set of block-sized buffers. Two locks guard two
//! different lifetimes, supplied by the caller through [`mutex_api::Mutex`]:
//! a table mutex over keys, reference counts, and LRU order (short critical
//! sections), and one data mutex per buffer for exclusive use of the bytes
//! (held across disk I/O; the kernel instantiates it with a sleep lock).
//!
//! A buffer is obtained with [`BufCache::get`], which returns a not-yet-valid
//! [`BufGuard`]; calling [`BufGuard::read`] (or `fill`/`zeroed`) produces the
//! valid guard that exposes the bytes. The typestate keeps "locked but never
//! read" buffers from being interpreted as data.
//!
//! Invariant: at most one buffer holds a given block number, and a buffer
//! with a nonzero reference count is never recycled.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use dataview::{Pod, PodMethods as _};
use mutex_api::Mutex;

/// A device addressed in `BLOCK_SIZE`-byte blocks.
///
/// `read` and `write` are synchronous; the kernel's implementation parks the
/// calling process until the disk interrupt completes the request.
pub trait BlockDevice<const BLOCK_SIZE: usize> {
    type Error;

    fn read(&self, bno: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
    fn write(&self, bno: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
}

const NIL: usize = usize::MAX;

struct Entry {
    key: Option<u32>,
    refs: u32,
    prev: usize,
    next: usize,
}

/// Keys, reference counts, and recency order of all slots.
///
/// A doubly-linked list threaded through slot indices: `head` is the most
/// recently released buffer, `tail` the least.
pub struct LruTable {
    entries: Box<[Entry]>,
    head: usize,
    tail: usize,
}

impl LruTable {
    fn with_capacity(n: usize) -> Self {
        assert!(n > 0);
        let entries = (0..n)
            .map(|i| Entry {
                key: None,
                refs: 0,
                prev: if i == 0 { NIL } else { i - 1 },
                next: if i == n - 1 { NIL } else { i + 1 },
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            entries,
            head: 0,
            tail: n - 1,
        }
    }

    fn find(&self, key: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.key == Some(key))
    }

    /// Least recently used slot with no references, searching from `tail`.
    fn victim(&self) -> Option<usize> {
        let mut i = self.tail;
        while i != NIL {
            if self.entries[i].refs == 0 {
                return Some(i);
            }
            i = self.entries[i].prev;
        }
        None
    }

    fn detach(&mut self, i: usize) {
        let (prev, next) = (self.entries[i].prev, self.entries[i].next);
        match prev {
            NIL => self.head = next,
            p => self.entries[p].next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.entries[n].prev = prev,
        }
        self.entries[i].prev = NIL;
        self.entries[i].next = NIL;
    }

    fn push_front(&mut self, i: usize) {
        self.entries[i].prev = NIL;
        self.entries[i].next = self.head;
        if self.head != NIL {
            self.entries[self.head].prev = i;
        }
        self.head = i;
        if self.tail == NIL {
            self.tail = i;
        }
    }

    fn touch(&mut self, i: usize) {
        self.detach(i);
        self.push_front(i);
    }
}

/// The block buffer cache.
pub struct BufCache<D, TM, BM, const BLOCK_SIZE: usize> {
    device: D,
    table: TM,
    slots: Box<[Slot<BM>]>,
}

struct Slot<BM> {
    /// Bytes hold a copy of the on-disk block. Readable without the data
    /// mutex; written only by the guard that holds it.
    valid: AtomicBool,
    data: BM,
}

impl<D, TM, BM, const BLOCK_SIZE: usize> BufCache<D, TM, BM, BLOCK_SIZE>
where
    D: BlockDevice<BLOCK_SIZE>,
    TM: Mutex<Data = LruTable>,
    BM: Mutex<Data = [u8; BLOCK_SIZE]>,
{
    /// Creates a cache of `nbuf` buffers over `device`.
    #[must_use]
    pub fn new(device: D, nbuf: usize) -> Self {
        let slots = (0..nbuf)
            .map(|_| Slot {
                valid: AtomicBool::new(false),
                data: BM::new([0; BLOCK_SIZE]),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            device,
            table: TM::new(LruTable::with_capacity(nbuf)),
            slots,
        }
    }

    /// Looks up or installs a buffer for `bno` and locks it.
    ///
    /// Returns `None` when every buffer is referenced.
    pub fn try_get(&self, bno: u32) -> Option<BufGuard<'_, D, TM, BM, BLOCK_SIZE, false>> {
        let index = {
            let mut table = self.table.lock();
            if let Some(i) = table.find(bno) {
                table.entries[i].refs += 1;
                i
            } else {
                let i = table.victim()?;
                let entry = &mut table.entries[i];
                entry.key = Some(bno);
                entry.refs = 1;
                self.slots[i].valid.store(false, Ordering::Release);
                i
            }
        };
        // The table lock is released before this blocks; the reference taken
        // above keeps the slot bound to `bno` while we wait.
        let data = self.slots[index].data.lock();
        Some(BufGuard {
            cache: self,
            index,
            bno,
            data: Some(data),
        })
    }

    /// Like [`Self::try_get`], but treats exhaustion as fatal.
    ///
    /// # Panics
    ///
    /// Panics when every buffer is referenced.
    pub fn get(&self, bno: u32) -> BufGuard<'_, D, TM, BM, BLOCK_SIZE, false> {
        self.try_get(bno).expect("no free block buffers")
    }

    /// Drops a pin taken with [`BufGuard::pin`], identified by block number.
    ///
    /// # Panics
    ///
    /// Panics if `bno` is not resident or not pinned.
    pub fn unpin(&self, bno: u32) {
        let mut table = self.table.lock();
        let i = table.find(bno).expect("unpin of a non-resident block");
        let entry = &mut table.entries[i];
        assert!(entry.refs > 0, "unpin of an unpinned block");
        entry.refs -= 1;
        if entry.refs == 0 {
            table.touch(i);
        }
    }

    fn release(&self, index: usize) {
        let mut table = self.table.lock();
        let entry = &mut table.entries[index];
        assert!(entry.refs > 0);
        entry.refs -= 1;
        if entry.refs == 0 {
            table.touch(index);
        }
    }
}

/// An exclusively held buffer; `VALID` tells whether the bytes are loaded.
pub struct BufGuard<'a, D, TM, BM, const BLOCK_SIZE: usize, const VALID: bool>
where
    D: BlockDevice<BLOCK_SIZE>,
    TM: Mutex<Data = LruTable>,
    BM: Mutex<Data = [u8; BLOCK_SIZE]> + 'a,
{
    cache: &'a BufCache<D, TM, BM, BLOCK_SIZE>,
    index: usize,
    bno: u32,
    /// `None` only after the guard was converted to the other `VALID` state.
    data: Option<BM::Guard<'a>>,
}

impl<'a, D, TM, BM, const BLOCK_SIZE: usize, const VALID: bool> Drop
    for BufGuard<'a, D, TM, BM, BLOCK_SIZE, VALID>
where
    D: BlockDevice<BLOCK_SIZE>,
    TM: Mutex<Data = LruTable>,
    BM: Mutex<Data = [u8; BLOCK_SIZE]> + 'a,
{
    fn drop(&mut self) {
        let Some(data) = self.data.take() else {
            // converted into another guard; that one releases
            return;
        };
        drop(data);
        self.cache.release(self.index);
    }
}

impl<'a, D, TM, BM, const BLOCK_SIZE: usize, const VALID: bool>
    BufGuard<'a, D, TM, BM, BLOCK_SIZE, VALID>
where
    D: BlockDevice<BLOCK_SIZE>,
    TM: Mutex<Data = LruTable>,
    BM: Mutex<Data = [u8; BLOCK_SIZE]> + 'a,
{
    /// The cached block number.
    pub fn block_no(&self) -> u32 {
        self.bno
    }

    /// Takes an extra reference so the buffer stays resident after this
    /// guard is gone. Balanced by [`BufCache::unpin`].
    pub fn pin(&self) {
        let mut table = self.cache.table.lock();
        let entry = &mut table.entries[self.index];
        entry.refs = entry.refs.checked_add(1).unwrap();
    }

    fn convert<const TO: bool>(mut self) -> BufGuard<'a, D, TM, BM, BLOCK_SIZE, TO> {
        BufGuard {
            cache: self.cache,
            index: self.index,
            bno: self.bno,
            data: self.data.take(),
        }
    }
}

impl<'a, D, TM, BM, const BLOCK_SIZE: usize> BufGuard<'a, D, TM, BM, BLOCK_SIZE, false>
where
    D: BlockDevice<BLOCK_SIZE>,
    TM: Mutex<Data = LruTable>,
    BM: Mutex<Data = [u8; BLOCK_SIZE]> + 'a,
{
    /// Loads the block from the device unless it is already cached.
    pub fn read(mut self) -> Result<BufGuard<'a, D, TM, BM, BLOCK_SIZE, true>, D::Error> {
        let slot = &self.cache.slots[self.index];
        if !slot.valid.load(Ordering::Acquire) {
            self.cache
                .device
                .read(self.bno, self.data.as_mut().unwrap())?;
            slot.valid.store(true, Ordering::Release);
        }
        Ok(self.convert())
    }

    /// Overwrites the whole buffer with `bytes`, skipping the disk read.
    pub fn fill(mut self, bytes: &[u8; BLOCK_SIZE]) -> BufGuard<'a, D, TM, BM, BLOCK_SIZE, true> {
        self.data.as_mut().unwrap().copy_from_slice(bytes);
        self.cache.slots[self.index]
            .valid
            .store(true, Ordering::Release);
        self.convert()
    }

    /// Zero-fills the buffer, skipping the disk read.
    pub fn zeroed(mut self) -> BufGuard<'a, D, TM, BM, BLOCK_SIZE, true> {
        self.data.as_mut().unwrap().fill(0);
        self.cache.slots[self.index]
            .valid
            .store(true, Ordering::Release);
        self.convert()
    }
}

impl<'a, D, TM, BM, const BLOCK_SIZE: usize> BufGuard<'a, D, TM, BM, BLOCK_SIZE, true>
where
    D: BlockDevice<BLOCK_SIZE>,
    TM: Mutex<Data = LruTable>,
    BM: Mutex<Data = [u8; BLOCK_SIZE]> + 'a,
{
    pub fn bytes(&self) -> &[u8; BLOCK_SIZE] {
        self.data.as_ref().unwrap()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        self.data.as_mut().unwrap()
    }

    /// Views the block as an on-disk structure.
    pub fn view<T: Pod>(&self) -> &T {
        self.bytes().as_data_view().get(0)
    }

    /// Views the block mutably as an on-disk structure.
    pub fn view_mut<T: Pod>(&mut self) -> &mut T {
        self.bytes_mut().as_data_view_mut().get_mut(0)
    }

    /// Writes the buffer through to the device.
    pub fn write(&mut self) -> Result<(), D::Error> {
        self.cache.device.write(self.bno, self.bytes())
    }
}

#[cfg(test)]
mod tests;
