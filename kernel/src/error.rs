//! The kernel-internal error type.
//!
//! Rich variants internally; the syscall dispatcher collapses every `Err`
//! to the single all-ones value userspace sees. Integrity violations (bad
//! super block, corrupt inode, double frees) are bugs and panic instead.

use crate::proc::Pid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // resource exhaustion
    #[error("out of physical pages")]
    OutOfPages,
    #[error("no free process slot")]
    OutOfProcSlots,
    #[error("no free on-disk inode")]
    OutOfInodes,
    #[error("in-memory inode table full")]
    OutOfInodeSlots,
    #[error("system file table full")]
    OutOfFiles,
    #[error("no free file descriptor")]
    OutOfFileDescriptors,
    #[error("out of data blocks")]
    OutOfBlocks,

    // name resolution
    #[error("path component is not a directory")]
    NotADirectory,
    #[error("no such file or directory")]
    EntryNotFound,
    #[error("cannot unlink `.` or `..`")]
    UnlinkDots,
    #[error("link crosses devices")]
    CrossDeviceLink,
    #[error("cannot hard-link a directory")]
    LinkToDirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("name longer than a directory entry")]
    NameTooLong,

    // validation
    #[error("bad user address {0:#x}")]
    BadAddress(usize),
    #[error("user string not terminated within {0} bytes")]
    UnterminatedString(usize),
    #[error("bad file descriptor {0}")]
    BadFileDescriptor(usize),
    #[error("no driver for device major {0}")]
    UnknownDevice(u16),
    #[error("invalid executable")]
    BadElf,
    #[error("file too large")]
    FileTooLarge,
    #[error("argument list too long")]
    ArgumentListTooLong,
    #[error("cannot open a directory for writing")]
    IsADirectory,
    #[error("no status for this file type")]
    UnstatableFile,

    // protection and liveness
    #[error("process was killed")]
    Killed,
    #[error("file not readable")]
    NotReadable,
    #[error("file not writable")]
    NotWritable,
    #[error("pipe has no read end")]
    BrokenPipe,
    #[error("no child processes")]
    NoChildren,
    #[error("no process with pid {0}")]
    ProcessNotFound(Pid),
}

pub type Result<T> = core::result::Result<T, Error>;
