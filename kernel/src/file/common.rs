//! Inode plumbing shared by the inode and device file variants.

use nv6_syscall::Stat;

use crate::fs::{self, Inode};

/// Drops an inode reference from outside any transaction.
pub(super) fn close_inode(inode: Inode) {
    let tx = fs::begin_tx();
    inode.attach(&tx).put();
}

pub(super) fn stat_inode(inode: &Inode) -> Stat {
    let tx = fs::begin_read_tx();
    let mut ip = inode.dup().attach(&tx);
    let stat = ip.lock().stat();
    ip.put();
    stat
}
