//! Regular files: an inode plus the shared read/write offset.

use core::sync::atomic::{AtomicUsize, Ordering};

use nv6_fs_types::BLOCK_SIZE;
use nv6_kernel_params::MAX_OP_BLOCKS;
use nv6_syscall::Stat;

use crate::{
    error::{Error, Result},
    fs::{self, Inode},
    memory::{
        VirtAddr,
        vm_user::{VmDst, VmSrc},
    },
    proc::ProcOwned,
};

pub(super) struct InodeFile {
    inode: Inode,
    /// Byte offset of the next read or write; shared by dups.
    offset: AtomicUsize,
}

impl InodeFile {
    pub(super) fn new(inode: Inode) -> Self {
        Self {
            inode,
            offset: AtomicUsize::new(0),
        }
    }

    pub(super) fn close(self) {
        super::common::close_inode(self.inode);
    }

    pub(super) fn stat(&self) -> Stat {
        super::common::stat_inode(&self.inode)
    }

    pub(super) fn read(&self, owned: &ProcOwned, va: VirtAddr, n: usize) -> Result<usize> {
        let tx = fs::begin_read_tx();
        let mut ip = self.inode.dup().attach(&tx);
        let mut lip = ip.lock();
        let got = lip.read(
            VmDst::User(owned.vm(), va),
            self.offset.load(Ordering::Relaxed),
            n,
        )?;
        self.offset.fetch_add(got, Ordering::Relaxed);
        Ok(got)
    }

    pub(super) fn write(&self, owned: &ProcOwned, va: VirtAddr, n: usize) -> Result<usize> {
        // Cap each transaction well under MAX_OP_BLOCKS: per block one
        // data block, plus inode, indirect, and two blocks of slop for
        // unaligned ends.
        let max = ((MAX_OP_BLOCKS - 1 - 1 - 2) / 2) * BLOCK_SIZE;

        let mut done = 0;
        while done < n {
            let chunk = usize::min(n - done, max);

            let tx = fs::begin_tx();
            let mut ip = self.inode.dup().attach(&tx);
            let mut lip = ip.lock();
            let wrote = lip.write(
                VmSrc::User(owned.vm(), va.byte_add(done)?),
                self.offset.load(Ordering::Relaxed),
                chunk,
            )?;
            self.offset.fetch_add(wrote, Ordering::Relaxed);
            drop(lip);
            ip.put();
            drop(tx);

            if wrote < chunk {
                // out of space mid-way
                return Err(Error::OutOfBlocks);
            }
            done += chunk;
        }
        Ok(n)
    }
}
