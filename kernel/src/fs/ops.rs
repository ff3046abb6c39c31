//! Name-level operations: create, link, unlink.
//!
//! Each runs entirely inside the caller's writing transaction, so partial
//! effects never reach the disk.

use nv6_fs_types::{T_DEV, T_DIR, T_FILE};

use crate::{
    error::{Error, Result},
    proc::ProcOwned,
};

use super::{InodeRef, Tx, path};

/// Creates `path` as a `ty` inode and returns it.
///
/// Opening an existing file with `CREATE` is not an error; creating over
/// an existing directory or with mismatched type is.
pub fn create<'t>(
    tx: &'t Tx<true>,
    owned: &ProcOwned,
    path: &[u8],
    ty: u16,
    major: u16,
    minor: u16,
) -> Result<InodeRef<'t, true>> {
    let mut name = [0; nv6_fs_types::DIR_SIZE];
    let (mut parent, name) = path::resolve_parent(tx, owned, path, &mut name)?;

    let mut parent_lip = parent.lock();
    if !parent_lip.is_dir() {
        return Err(Error::NotADirectory);
    }

    if let Some((mut child, _off)) = parent_lip.dir_lookup(name)? {
        let child_lip = child.lock();
        if ty == T_FILE && matches!(child_lip.ty(), T_FILE | T_DEV) {
            drop(child_lip);
            return Ok(child);
        }
        return Err(Error::AlreadyExists);
    }

    let mut child = InodeRef::create(tx, parent_lip.dev(), ty)?;
    let mut child_lip = child.lock();
    child_lip.body_mut().major = major;
    child_lip.body_mut().minor = minor;
    child_lip.body_mut().nlink = 1;
    child_lip.update();

    let linked = (|| -> Result<()> {
        if ty == T_DIR {
            // `.` and `..`; the parent's nlink gains one for `..`
            child_lip.dir_link(b".", child_lip.ino())?;
            child_lip.dir_link(b"..", parent_lip.ino())?;
        }
        parent_lip.dir_link(name, child_lip.ino())?;
        if ty == T_DIR {
            parent_lip.body_mut().nlink += 1;
            parent_lip.update();
        }
        Ok(())
    })();

    if let Err(e) = linked {
        // undo the allocation: zero links and let the last ref free it
        child_lip.body_mut().nlink = 0;
        child_lip.update();
        return Err(e);
    }

    drop(child_lip);
    Ok(child)
}

/// Hard-links `new_path` to the inode at `old_path`.
pub fn link(tx: &Tx<true>, owned: &ProcOwned, old_path: &[u8], new_path: &[u8]) -> Result<()> {
    let mut old = path::resolve(tx, owned, old_path)?;
    let mut old_lip = old.lock();

    if old_lip.is_dir() {
        return Err(Error::LinkToDirectory);
    }

    old_lip.body_mut().nlink += 1;
    old_lip.update();
    drop(old_lip);

    let linked = (|| -> Result<()> {
        let mut name = [0; nv6_fs_types::DIR_SIZE];
        let (mut parent, name) = path::resolve_parent(tx, owned, new_path, &mut name)?;
        let mut parent_lip = parent.lock();
        if parent_lip.dev() != old.dev() {
            return Err(Error::CrossDeviceLink);
        }
        parent_lip.dir_link(name, old.ino())?;
        Ok(())
    })();

    if let Err(e) = linked {
        let mut old_lip = old.lock();
        old_lip.body_mut().nlink -= 1;
        old_lip.update();
        return Err(e);
    }

    Ok(())
}

/// Removes the directory entry at `path`.
pub fn unlink(tx: &Tx<true>, owned: &ProcOwned, path: &[u8]) -> Result<()> {
    let mut name = [0; nv6_fs_types::DIR_SIZE];
    let (mut parent, name) = path::resolve_parent(tx, owned, path, &mut name)?;

    if name == b"." || name == b".." {
        return Err(Error::UnlinkDots);
    }

    let mut parent_lip = parent.lock();
    if !parent_lip.is_dir() {
        return Err(Error::NotADirectory);
    }

    let Some((mut child, off)) = parent_lip.dir_lookup(name)? else {
        return Err(Error::EntryNotFound);
    };
    let mut child_lip = child.lock();

    assert!(child_lip.nlink() > 0, "unlink of a link-less inode");
    if child_lip.is_dir() && !child_lip.dir_is_empty() {
        return Err(Error::DirectoryNotEmpty);
    }

    parent_lip.dir_unlink_at(off);
    if child_lip.is_dir() {
        // the child's `..` no longer counts
        parent_lip.body_mut().nlink -= 1;
        parent_lip.update();
    }
    drop(parent_lip);

    child_lip.body_mut().nlink -= 1;
    child_lip.update();

    Ok(())
}
