use std::sync::{Arc, Mutex};

use block_io::BlockDevice;

use super::*;

const LOG_START: u32 = 2;
const LOG_SLOTS: usize = 8;
const DISK_BLOCKS: usize = 64;

/// Shared in-memory disk; clones see the same blocks.
#[derive(Clone)]
struct MemDisk {
    blocks: Arc<Mutex<Vec<[u8; BLOCK_SIZE]>>>,
}

impl MemDisk {
    fn new() -> Self {
        Self {
            blocks: Arc::new(Mutex::new(vec![[0; BLOCK_SIZE]; DISK_BLOCKS])),
        }
    }

    fn block(&self, bno: u32) -> [u8; BLOCK_SIZE] {
        self.blocks.lock().unwrap()[bno as usize]
    }

    fn patch(&self, bno: u32, byte: u8) {
        self.blocks.lock().unwrap()[bno as usize].fill(byte);
    }
}

impl BlockDevice<BLOCK_SIZE> for MemDisk {
    type Error = std::convert::Infallible;

    fn read(&self, bno: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        buf.copy_from_slice(&self.blocks.lock().unwrap()[bno as usize]);
        Ok(())
    }

    fn write(&self, bno: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.blocks.lock().unwrap()[bno as usize].copy_from_slice(buf);
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
struct PowerCut;

/// A disk whose power fails after a fixed number of writes.
#[derive(Clone)]
struct CuttableDisk {
    inner: MemDisk,
    writes_left: Arc<Mutex<usize>>,
}

impl CuttableDisk {
    fn new(inner: MemDisk, writes_until_cut: usize) -> Self {
        Self {
            inner,
            writes_left: Arc::new(Mutex::new(writes_until_cut)),
        }
    }
}

impl BlockDevice<BLOCK_SIZE> for CuttableDisk {
    type Error = PowerCut;

    fn read(&self, bno: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), PowerCut> {
        self.inner.read(bno, buf).unwrap();
        Ok(())
    }

    fn write(&self, bno: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), PowerCut> {
        let mut left = self.writes_left.lock().unwrap();
        if *left == 0 {
            return Err(PowerCut);
        }
        *left -= 1;
        self.inner.write(bno, buf).unwrap();
        Ok(())
    }
}

/// A "cache" for the tests: block contents keyed by number.
fn cache_fn(pairs: &[(u32, u8)]) -> impl FnMut(u32, &mut [u8; BLOCK_SIZE]) + '_ {
    move |bno, buf| {
        let (_, byte) = pairs.iter().find(|(b, _)| *b == bno).unwrap();
        buf.fill(*byte);
    }
}

#[test]
fn commit_installs_every_block() {
    let disk = MemDisk::new();
    let mut log = RedoLog::new(disk.clone(), LOG_START, LOG_SLOTS);
    assert_eq!(log.recover().unwrap(), 0);

    let updates = [(40, 0xaa), (41, 0xbb), (42, 0xcc)];
    for (bno, _) in updates {
        assert!(log.record(bno));
    }
    log.commit(cache_fn(&updates)).unwrap();

    for (bno, byte) in updates {
        assert_eq!(disk.block(bno), [byte; BLOCK_SIZE]);
    }
    assert!(log.is_empty());
    // on-disk header is clear again
    let mut fresh = RedoLog::new(disk, LOG_START, LOG_SLOTS);
    assert_eq!(fresh.recover().unwrap(), 0);
}

#[test]
fn duplicate_records_absorb() {
    let disk = MemDisk::new();
    let mut log = RedoLog::new(disk, LOG_START, LOG_SLOTS);
    assert!(log.record(40));
    assert!(!log.record(40));
    assert!(log.record(41));
    assert!(!log.record(40));
    assert_eq!(log.len(), 2);
}

#[test]
fn fits_tracks_capacity() {
    let disk = MemDisk::new();
    let mut log = RedoLog::new(disk, LOG_START, LOG_SLOTS);
    assert!(log.fits(LOG_SLOTS));
    assert!(!log.fits(LOG_SLOTS + 1));
    for bno in 0..3 {
        log.record(40 + bno);
    }
    assert!(log.fits(LOG_SLOTS - 3));
    assert!(!log.fits(LOG_SLOTS - 2));
}

#[test]
fn crash_after_header_flush_rolls_forward() {
    let disk = MemDisk::new();
    disk.patch(40, 0x01);
    disk.patch(41, 0x02);

    let updates = [(40, 0xaa), (41, 0xbb)];
    // power lasts exactly through the body writes plus the header flush
    let cut = CuttableDisk::new(disk.clone(), updates.len() + 1);
    let mut log = RedoLog::new(cut, LOG_START, LOG_SLOTS);
    for (bno, _) in updates {
        log.record(bno);
    }
    assert_eq!(log.commit(cache_fn(&updates)), Err(PowerCut));

    // home blocks still hold the old data
    assert_eq!(disk.block(40), [0x01; BLOCK_SIZE]);
    assert_eq!(disk.block(41), [0x02; BLOCK_SIZE]);

    // reboot: recovery replays the committed transaction
    let mut log = RedoLog::new(disk.clone(), LOG_START, LOG_SLOTS);
    assert_eq!(log.recover().unwrap(), 2);
    assert_eq!(disk.block(40), [0xaa; BLOCK_SIZE]);
    assert_eq!(disk.block(41), [0xbb; BLOCK_SIZE]);
}

#[test]
fn crash_before_header_flush_rolls_back() {
    let disk = MemDisk::new();
    disk.patch(40, 0x01);
    disk.patch(41, 0x02);

    let updates = [(40, 0xaa), (41, 0xbb)];
    // power dies during the body copy, before the commit point
    let cut = CuttableDisk::new(disk.clone(), updates.len());
    let mut log = RedoLog::new(cut, LOG_START, LOG_SLOTS);
    for (bno, _) in updates {
        log.record(bno);
    }
    assert_eq!(log.commit(cache_fn(&updates)), Err(PowerCut));

    let mut log = RedoLog::new(disk.clone(), LOG_START, LOG_SLOTS);
    assert_eq!(log.recover().unwrap(), 0);
    assert_eq!(disk.block(40), [0x01; BLOCK_SIZE]);
    assert_eq!(disk.block(41), [0x02; BLOCK_SIZE]);
}

#[test]
fn recovery_is_idempotent() {
    let disk = MemDisk::new();
    let updates = [(40, 0xaa), (41, 0xbb), (42, 0xcc)];

    // commit fully, then forge the crash window by rewriting the header as
    // if the clear had been lost
    let cut = CuttableDisk::new(disk.clone(), updates.len() + 1);
    let mut log = RedoLog::new(cut, LOG_START, LOG_SLOTS);
    for (bno, _) in updates {
        log.record(bno);
    }
    let _ = log.commit(cache_fn(&updates));

    let mut first = RedoLog::new(disk.clone(), LOG_START, LOG_SLOTS);
    assert_eq!(first.recover().unwrap(), 3);
    let after_first: Vec<_> = (38..44).map(|b| disk.block(b)).collect();

    let mut second = RedoLog::new(disk.clone(), LOG_START, LOG_SLOTS);
    assert_eq!(second.recover().unwrap(), 0);
    let after_second: Vec<_> = (38..44).map(|b| disk.block(b)).collect();
    assert_eq!(after_first, after_second);
}

#[test]
#[should_panic(expected = "log overflow")]
fn overflow_is_fatal() {
    let disk = MemDisk::new();
    let mut log = RedoLog::new(disk, LOG_START, LOG_SLOTS);
    for bno in 0..=LOG_SLOTS as u32 {
        log.record(100 + bno);
    }
}
