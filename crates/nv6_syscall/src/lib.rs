//! The user-visible system-call ABI.
//!
//! Calling convention (RISC-V): arguments in `a0..a5`, call number in `a7`,
//! `ecall` to enter the kernel, result in `a0`. Every failure is reported as
//! the single out-of-band value [`SYSCALL_ERROR`]; no error codes cross the
//! boundary.

#![no_std]

use bitflags::bitflags;
use dataview::Pod;
use strum::FromRepr;

/// The all-ones error sentinel returned in `a0`.
pub const SYSCALL_ERROR: usize = usize::MAX;

/// System-call numbers, as placed in `a7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(usize)]
pub enum SyscallNo {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Pipe = 4,
    Read = 5,
    Kill = 6,
    Exec = 7,
    Fstat = 8,
    Chdir = 9,
    Dup = 10,
    Getpid = 11,
    Sbrk = 12,
    Pause = 13,
    Uptime = 14,
    Open = 15,
    Write = 16,
    Mknod = 17,
    Unlink = 18,
    Link = 19,
    Mkdir = 20,
    Close = 21,
}

bitflags! {
    /// `open()` mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct OpenFlags: usize {
        const RDONLY = 0x000;
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const CREATE = 0x200;
        const TRUNC = 0x400;
    }
}

impl OpenFlags {
    /// Whether the mode grants reads.
    #[must_use]
    pub fn readable(self) -> bool {
        !self.contains(Self::WRONLY)
    }

    /// Whether the mode grants writes.
    #[must_use]
    pub fn writable(self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR)
    }
}

/// File kind reported by `fstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u16)]
pub enum StatKind {
    Dir = 1,
    File = 2,
    Dev = 3,
}

/// `fstat` result, copied into user memory.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct Stat {
    /// Disk device holding the file.
    pub dev: u32,
    /// Inode number.
    pub ino: u32,
    /// File kind (a [`StatKind`] value).
    pub kind: u16,
    /// Number of links to the file.
    pub nlink: u16,
    pub _pad: [u8; 4],
    /// Size in bytes.
    pub size: u64,
}

const _: () = assert!(size_of::<Stat>() == 24);
