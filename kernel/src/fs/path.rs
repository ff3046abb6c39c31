//! Path resolution.
//!
//! Walks one component at a time: lock the current directory, scan it,
//! release, continue with the child. Absolute paths start at the root
//! inode, relative ones at the caller's working directory.

use nv6_fs_types::{DIR_SIZE, InodeNo};

use crate::{
    error::{Error, Result},
    proc::ProcOwned,
};

use super::{Dev, InodeRef, Tx};

/// Splits off the first path component.
///
/// Leading and trailing slashes are skipped; `None` when no component
/// remains.
fn next_component(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = path.iter().position(|&b| b != b'/')?;
    let path = &path[start..];
    let end = path.iter().position(|&b| b == b'/').unwrap_or(path.len());
    let (name, rest) = path.split_at(end);
    let rest_start = rest.iter().position(|&b| b != b'/').unwrap_or(rest.len());
    Some((name, &rest[rest_start..]))
}

fn walk<'t, const WRITE: bool>(
    tx: &'t Tx<WRITE>,
    owned: &ProcOwned,
    path: &[u8],
    stop_at_parent: bool,
    name_out: &mut [u8; DIR_SIZE],
) -> Result<(InodeRef<'t, WRITE>, usize)> {
    let mut ip = if path.first() == Some(&b'/') {
        InodeRef::get(tx, Dev::ROOT, InodeNo::ROOT)?
    } else {
        owned.cwd().dup().attach(tx)
    };

    let mut rest = path;
    while let Some((name, remainder)) = next_component(rest) {
        rest = remainder;

        let mut lip = ip.lock();
        if !lip.is_dir() {
            return Err(Error::NotADirectory);
        }

        if stop_at_parent && next_component(rest).is_none() {
            if name.len() > DIR_SIZE {
                return Err(Error::NameTooLong);
            }
            drop(lip);
            name_out[..name.len()].copy_from_slice(name);
            name_out[name.len()..].fill(0);
            return Ok((ip, name.len()));
        }

        let Some((child, _off)) = lip.dir_lookup(name)? else {
            return Err(Error::EntryNotFound);
        };
        drop(lip);
        ip = child;
    }

    if stop_at_parent {
        // the path had no final component to name
        return Err(Error::EntryNotFound);
    }
    Ok((ip, 0))
}

/// Resolves `path` to its inode.
pub fn resolve<'t, const WRITE: bool>(
    tx: &'t Tx<WRITE>,
    owned: &ProcOwned,
    path: &[u8],
) -> Result<InodeRef<'t, WRITE>> {
    let mut name = [0; DIR_SIZE];
    let (ip, _len) = walk(tx, owned, path, false, &mut name)?;
    Ok(ip)
}

/// Resolves `path` to its parent directory plus the final component.
pub fn resolve_parent<'t, 'n, const WRITE: bool>(
    tx: &'t Tx<WRITE>,
    owned: &ProcOwned,
    path: &[u8],
    name_out: &'n mut [u8; DIR_SIZE],
) -> Result<(InodeRef<'t, WRITE>, &'n [u8])> {
    let (ip, len) = walk(tx, owned, path, true, name_out)?;
    Ok((ip, &name_out[..len]))
}
