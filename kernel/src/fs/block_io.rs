//! The kernel's instantiation of the block buffer cache.
//!
//! Table order and reference counts live under a spin lock; each buffer's
//! bytes live under a sleep lock held across disk I/O.

use core::convert::Infallible;

use block_io::{BlockDevice, BufCache, BufGuard, LruTable};
use nv6_fs_types::{BLOCK_SIZE, BlockNo};
use nv6_kernel_params::NBUF;
use once_init::OnceInit;

use crate::sync::{SleepLock, SpinLock};

use super::{Dev, virtio_disk};

/// The virtio disk as the cache sees it: synchronous whole-block I/O.
#[derive(Clone, Copy)]
pub struct DiskDev;

impl BlockDevice<BLOCK_SIZE> for DiskDev {
    type Error = Infallible;

    fn read(&self, bno: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Infallible> {
        virtio_disk::read(bno, buf);
        Ok(())
    }

    fn write(&self, bno: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Infallible> {
        virtio_disk::write(bno, buf);
        Ok(())
    }
}

type TableLock = SpinLock<LruTable>;
type DataLock = SleepLock<[u8; BLOCK_SIZE]>;

pub type DiskCache = BufCache<DiskDev, TableLock, DataLock, BLOCK_SIZE>;

/// A held cache buffer; `VALID` means the bytes are loaded.
pub type Buf<const VALID: bool> =
    BufGuard<'static, DiskDev, TableLock, DataLock, BLOCK_SIZE, VALID>;

static CACHE: OnceInit<DiskCache> = OnceInit::new();

pub fn init() {
    CACHE.init(DiskCache::new(DiskDev, NBUF));
}

pub(super) fn cache() -> &'static DiskCache {
    CACHE.get()
}

/// Looks up and locks the buffer for `(dev, bno)`.
pub fn get(dev: Dev, bno: BlockNo) -> Buf<false> {
    assert_eq!(dev, Dev::ROOT, "unknown disk device {}", dev.value());
    cache().get(bno.value())
}
