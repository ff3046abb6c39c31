//! The file system.
//!
//! Layered bottom-up: the virtio disk, the block buffer cache, the
//! write-ahead log (every multi-block update is a transaction), the inode
//! layer with its in-memory table, directories, path resolution, and the
//! name-level operations (`create`/`link`/`unlink`).
//!
//! Every disk-mutating call runs between a transaction's begin and end;
//! the [`Tx`] value enforces that scope.

use nv6_fs_types::SuperBlock;
use nv6_kernel_params::ROOT_DEV;
use once_init::OnceInit;

pub use self::{
    inode::{Inode, InodeGuard, InodeRef},
    log::{Tx, TxBuf},
};

pub mod block_io;
pub mod data_block;
pub mod inode;
pub mod log;
pub mod ops;
pub mod path;
pub mod virtio_disk;

/// A disk device number. One disk for now; the type keeps interfaces
/// honest about which device a block lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dev(u32);

impl Dev {
    pub const ROOT: Self = Self(ROOT_DEV);

    pub const fn value(self) -> u32 {
        self.0
    }
}

static SUPER_BLOCK: OnceInit<SuperBlock> = OnceInit::new();

pub(crate) fn superblock() -> &'static SuperBlock {
    SUPER_BLOCK.get()
}

/// Brings up the lock-free parts: disk, cache, and the bounded tables.
/// Called from the boot path before the scheduler runs.
pub fn init() {
    virtio_disk::init();
    block_io::init();
    inode::init();
}

/// Reads the super block and recovers the log.
///
/// Runs in the first process's context, not `main()`: recovery does disk
/// I/O, which sleeps.
pub fn init_in_proc(dev: Dev) {
    let sb = {
        let b = block_io::get(dev, SuperBlock::BLOCK_NO);
        let Ok(b) = b.read();
        b.view::<SuperBlock>().clone()
    };
    assert_eq!(sb.magic, SuperBlock::MAGIC, "bad file system magic");
    SUPER_BLOCK.init(sb);

    log::init(dev, superblock());
}

/// Opens a writing transaction; may sleep for log space.
pub fn begin_tx() -> Tx<true> {
    log::begin()
}

/// Opens a read-only transaction; never sleeps on the log.
pub fn begin_read_tx() -> Tx<false> {
    log::begin_read()
}
