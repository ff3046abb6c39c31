//! Inode content: block mapping, reads, writes, truncation.
//!
//! The first `NUM_DIRECT` data blocks are addressed from the inode; the
//! next `NUM_INDIRECT` through the singly-indirect block.

use dataview::{Pod, PodMethods as _};
use nv6_fs_types::{
    BLOCK_SIZE, BlockNo, IndirectBlock, InodeBlock, MAX_FILE_BLOCKS, NUM_DIRECT, NUM_INDIRECT,
    T_NONE,
};
use nv6_syscall::Stat;

use crate::{
    error::{Error, Result},
    fs::{data_block, superblock},
    memory::vm_user::{VmDst, VmSrc},
};

use super::InodeGuard;

impl<const WRITE: bool> InodeGuard<'_, '_, WRITE> {
    /// The disk block holding content block `i`, if present.
    ///
    /// Never allocates; within the recorded size every block is present.
    fn block_at(&self, i: usize) -> Option<BlockNo> {
        if i < NUM_DIRECT {
            return self.body().addrs[i];
        }
        let i = i - NUM_DIRECT;
        assert!(i < NUM_INDIRECT, "content block out of range");

        let ind = self.body().addrs[NUM_DIRECT]?;
        let b = self.tx.get(self.dev, ind);
        b.view::<IndirectBlock>().get(i)
    }

    /// Reads up to `n` bytes at `off` into `dst`.
    ///
    /// Returns the number of bytes read; short when `off + n` passes the
    /// end of the file.
    pub fn read(&mut self, mut dst: VmDst, off: usize, mut n: usize) -> Result<usize> {
        let size = self.size() as usize;
        if off > size || off.checked_add(n).is_none() {
            return Ok(0);
        }
        if off + n > size {
            n = size - off;
        }

        let mut done = 0;
        while done < n {
            let pos = off + done;
            let Some(bno) = self.block_at(pos / BLOCK_SIZE) else {
                break;
            };
            let b = self.tx.get(self.dev, bno);
            let m = usize::min(n - done, BLOCK_SIZE - pos % BLOCK_SIZE);
            dst.write_at(done, &b.bytes()[pos % BLOCK_SIZE..][..m])?;
            done += m;
        }
        Ok(done)
    }

    /// Reads one on-disk structure at `off`.
    pub fn read_struct<T: Pod>(&mut self, off: usize) -> Result<T> {
        let mut value = T::zeroed();
        let n = self.read(VmDst::Kernel(value.as_bytes_mut()), off, size_of::<T>())?;
        if n != size_of::<T>() {
            return Err(Error::EntryNotFound);
        }
        Ok(value)
    }

    /// Stat fields for `fstat`.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev.value(),
            ino: self.ino.value(),
            kind: self.ty(),
            nlink: self.nlink(),
            _pad: [0; 4],
            size: u64::from(self.size()),
        }
    }
}

impl InodeGuard<'_, '_, true> {
    /// The disk block holding content block `i`, allocating it (and the
    /// indirect block) on demand.
    fn block_at_or_alloc(&mut self, i: usize) -> Result<BlockNo> {
        if i < NUM_DIRECT {
            if let Some(bno) = self.body().addrs[i] {
                return Ok(bno);
            }
            let bno = data_block::alloc(self.tx, self.dev)?;
            self.body_mut().addrs[i] = Some(bno);
            return Ok(bno);
        }

        let i = i - NUM_DIRECT;
        assert!(i < NUM_INDIRECT, "content block out of range");

        let ind = match self.body().addrs[NUM_DIRECT] {
            Some(ind) => ind,
            None => {
                let ind = data_block::alloc(self.tx, self.dev)?;
                self.body_mut().addrs[NUM_DIRECT] = Some(ind);
                ind
            }
        };

        let mut b = self.tx.get(self.dev, ind);
        if let Some(bno) = b.view::<IndirectBlock>().get(i) {
            return Ok(bno);
        }
        let bno = data_block::alloc(self.tx, self.dev)?;
        b.view_mut::<IndirectBlock>().set(i, Some(bno));
        Ok(bno)
    }

    /// Writes `n` bytes from `src` at `off`.
    ///
    /// Extending writes grow the recorded size; a short return means the
    /// disk filled up mid-way.
    pub fn write(&mut self, src: VmSrc, off: usize, n: usize) -> Result<usize> {
        let size = self.size() as usize;
        if off > size || off.checked_add(n).is_none() {
            return Err(Error::BadAddress(off));
        }
        if off + n > MAX_FILE_BLOCKS * BLOCK_SIZE {
            return Err(Error::FileTooLarge);
        }

        let mut done = 0;
        while done < n {
            let pos = off + done;
            let Ok(bno) = self.block_at_or_alloc(pos / BLOCK_SIZE) else {
                break;
            };
            let mut b = self.tx.get(self.dev, bno);
            let m = usize::min(n - done, BLOCK_SIZE - pos % BLOCK_SIZE);
            src.read_at(done, &mut b.bytes_mut()[pos % BLOCK_SIZE..][..m])?;
            done += m;
        }

        if off + done > size {
            self.body_mut().size = (off + done) as u32;
        }
        // flush unconditionally: block_at_or_alloc may have grown addrs
        // even when the size is unchanged
        self.update();

        Ok(done)
    }

    /// Writes one on-disk structure at `off`.
    pub fn write_struct<T: Pod>(&mut self, off: usize, value: &T) -> Result<()> {
        let n = self.write(VmSrc::Kernel(value.as_bytes()), off, size_of::<T>())?;
        if n != size_of::<T>() {
            return Err(Error::OutOfBlocks);
        }
        Ok(())
    }

    /// Copies the cached inode back to its disk block, through the log.
    ///
    /// Must follow every change to a field that lives on disk.
    pub fn update(&mut self) {
        let sb = superblock();
        let mut b = self.tx.get(self.dev, sb.inode_block(self.ino));
        self.body().to_disk(b.view_mut::<InodeBlock>().inode_mut(self.ino));
    }

    /// Frees all content blocks and zeroes the size.
    pub fn truncate(&mut self) {
        for i in 0..NUM_DIRECT {
            if let Some(bno) = self.body_mut().addrs[i].take() {
                data_block::free(self.tx, self.dev, bno);
            }
        }

        if let Some(ind) = self.body_mut().addrs[NUM_DIRECT].take() {
            {
                let b = self.tx.get(self.dev, ind);
                for i in 0..NUM_INDIRECT {
                    if let Some(bno) = b.view::<IndirectBlock>().get(i) {
                        data_block::free(self.tx, self.dev, bno);
                    }
                }
            }
            data_block::free(self.tx, self.dev, ind);
        }

        self.body_mut().size = 0;
        self.update();
    }

    /// Marks the on-disk inode free and forgets the cached copy.
    pub(super) fn free(mut self) {
        self.body_mut().ty = T_NONE;
        self.update();
        *self.data = None;
    }
}
