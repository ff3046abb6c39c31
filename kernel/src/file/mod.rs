//! Open files: one reference-counted object per open, shared across
//! `dup` and `fork`, backed by an inode, a device, or a pipe.

use nv6_syscall::Stat;

use crate::{
    error::{Error, Result},
    fs::Inode,
    memory::{
        VirtAddr,
        vm_user::{VmDst, VmSrc},
    },
    proc::{Proc, ProcOwned},
};

use self::{alloc::FileArc, device::DeviceFile, inode::InodeFile, pipe::PipeEnd};

pub use self::device::{DeviceIo, Major, register_device};

mod alloc;
mod common;
mod device;
mod inode;
mod pipe;

pub fn init() {
    alloc::init();
}

/// An open file. Clones share the object (and, for inodes, the offset).
#[derive(Clone)]
pub struct File {
    data: FileArc,
}

struct FileData {
    readable: bool,
    writable: bool,
    kind: Option<FileKind>,
}

enum FileKind {
    Node(InodeFile),
    Device(DeviceFile),
    Pipe(PipeEnd),
}

impl Drop for FileData {
    fn drop(&mut self) {
        match self.kind.take() {
            Some(FileKind::Node(f)) => f.close(),
            Some(FileKind::Device(f)) => f.close(),
            Some(FileKind::Pipe(f)) => f.close(self.writable),
            None => {}
        }
    }
}

impl File {
    /// Both ends of a fresh pipe: (read, write).
    pub fn new_pipe() -> Result<(File, File)> {
        pipe::new_pair()
    }

    pub fn new_inode(inode: Inode, readable: bool, writable: bool) -> Result<File> {
        Ok(File {
            data: FileArc::try_new(FileData {
                readable,
                writable,
                kind: Some(FileKind::Node(InodeFile::new(inode))),
            })?,
        })
    }

    pub fn new_device(major: Major, inode: Inode, readable: bool, writable: bool) -> Result<File> {
        Ok(File {
            data: FileArc::try_new(FileData {
                readable,
                writable,
                kind: Some(FileKind::Device(DeviceFile::new(major, inode))),
            })?,
        })
    }

    /// Another reference to the same open file.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Drops this reference; the last one tears the backing down.
    pub fn close(self) {
        drop(self);
    }

    /// Status of the backing inode; pipes have none.
    pub fn stat(&self) -> Result<Stat> {
        match self.data.kind.as_ref().unwrap() {
            FileKind::Node(f) => Ok(f.stat()),
            FileKind::Device(f) => Ok(f.stat()),
            FileKind::Pipe(_) => Err(Error::UnstatableFile),
        }
    }

    /// Reads up to `n` bytes into user memory at `va`.
    pub fn read(&self, p: &Proc, owned: &ProcOwned, va: VirtAddr, n: usize) -> Result<usize> {
        if !self.data.readable {
            return Err(Error::NotReadable);
        }
        match self.data.kind.as_ref().unwrap() {
            FileKind::Node(f) => f.read(owned, va, n),
            FileKind::Device(f) => f.read(p, VmDst::User(owned.vm(), va), n),
            FileKind::Pipe(f) => f.read(p, owned, va, n),
        }
    }

    /// Writes up to `n` bytes from user memory at `va`.
    pub fn write(&self, p: &Proc, owned: &ProcOwned, va: VirtAddr, n: usize) -> Result<usize> {
        if !self.data.writable {
            return Err(Error::NotWritable);
        }
        match self.data.kind.as_ref().unwrap() {
            FileKind::Node(f) => f.write(owned, va, n),
            FileKind::Device(f) => f.write(p, VmSrc::User(owned.vm(), va), n),
            FileKind::Pipe(f) => f.write(p, owned, va, n),
        }
    }
}
