//! Directory content: lookup, link, emptiness.
//!
//! A directory is an inode whose content is a dense array of
//! [`DirEntry`]s; `inum == 0` marks a free slot.

use dataview::PodMethods as _;
use nv6_fs_types::{DIR_SIZE, DirEntry, InodeNo};

use crate::error::{Error, Result};

use super::{InodeGuard, InodeRef};

impl<'t, const WRITE: bool> InodeGuard<'t, '_, WRITE> {
    /// Finds `name`, returning the child and the entry's byte offset.
    pub fn dir_lookup(&mut self, name: &[u8]) -> Result<Option<(InodeRef<'t, WRITE>, usize)>> {
        assert!(self.is_dir(), "lookup in a non-directory");

        for off in (0..self.size() as usize).step_by(size_of::<DirEntry>()) {
            let de: DirEntry = self.read_struct(off).expect("directory entry read");
            let Some(ino) = de.ino() else {
                continue;
            };
            if !de.name_matches(name) {
                continue;
            }
            let child = InodeRef::get(self.tx, self.dev, ino)?;
            return Ok(Some((child, off)));
        }
        Ok(None)
    }

    /// Whether the directory holds nothing besides `.` and `..`.
    pub fn dir_is_empty(&mut self) -> bool {
        assert!(self.is_dir());

        let step = size_of::<DirEntry>();
        // the first two entries are always `.` and `..`
        for off in (2 * step..self.size() as usize).step_by(step) {
            let de: DirEntry = self.read_struct(off).expect("directory entry read");
            if de.ino().is_some() {
                return false;
            }
        }
        true
    }
}

impl InodeGuard<'_, '_, true> {
    /// Adds the entry `name -> ino`.
    ///
    /// Rejects duplicates and names longer than an entry can hold; writes
    /// into the first free slot, or appends.
    pub fn dir_link(&mut self, name: &[u8], ino: InodeNo) -> Result<()> {
        assert!(self.is_dir(), "link into a non-directory");
        if name.len() > DIR_SIZE {
            return Err(Error::NameTooLong);
        }

        if let Some((child, _off)) = self.dir_lookup(name)? {
            child.put();
            return Err(Error::AlreadyExists);
        }

        let size = self.size() as usize;
        let step = size_of::<DirEntry>();
        assert_eq!(size % step, 0, "directory size not entry-aligned");

        let mut free_off = size;
        for off in (0..size).step_by(step) {
            let de: DirEntry = self.read_struct(off).expect("directory entry read");
            if de.ino().is_none() {
                free_off = off;
                break;
            }
        }

        let mut de = DirEntry::zeroed();
        de.set_name(name);
        de.set_ino(Some(ino));
        self.write_struct(free_off, &de)
    }

    /// Clears the entry at `off`.
    pub fn dir_unlink_at(&mut self, off: usize) {
        let de = DirEntry::zeroed();
        self.write_struct(off, &de).expect("directory entry clear");
    }
}
