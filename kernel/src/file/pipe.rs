//! Pipes: a bounded byte ring with blocking ends.

use alloc::sync::Arc;

use crate::{
    error::{Error, Result},
    memory::{VirtAddr, page::PageFrame},
    proc::{self, Proc, ProcOwned},
    sync::{Chan, SpinLock},
};

use super::{File, FileData, FileKind, alloc::FileArc};

const PIPE_SIZE: usize = 512;

/// One end of a pipe; both ends share the ring.
#[derive(Clone)]
pub(super) struct PipeEnd {
    // in its own page so the bounded file table stays small
    ring: Arc<SpinLock<PipeRing>, PageFrame>,
}

struct PipeRing {
    buf: [u8; PIPE_SIZE],
    /// Bytes consumed so far; `nread % PIPE_SIZE` is the read position.
    nread: usize,
    /// Bytes produced so far.
    nwrite: usize,
    read_open: bool,
    write_open: bool,
}

impl PipeRing {
    fn is_full(&self) -> bool {
        self.nwrite == self.nread + PIPE_SIZE
    }

    fn is_empty(&self) -> bool {
        self.nread == self.nwrite
    }
}

pub(super) fn new_pair() -> Result<(File, File)> {
    let ring = Arc::try_new_in(
        SpinLock::new(PipeRing {
            buf: [0; PIPE_SIZE],
            nread: 0,
            nwrite: 0,
            read_open: true,
            write_open: true,
        }),
        PageFrame,
    )
    .map_err(|_| Error::OutOfPages)?;

    let read_end = File {
        data: FileArc::try_new(FileData {
            readable: true,
            writable: false,
            kind: Some(FileKind::Pipe(PipeEnd {
                ring: Arc::clone(&ring),
            })),
        })?,
    };
    let write_end = File {
        data: FileArc::try_new(FileData {
            readable: false,
            writable: true,
            kind: Some(FileKind::Pipe(PipeEnd { ring })),
        })?,
    };
    Ok((read_end, write_end))
}

impl PipeEnd {
    /// Closes this end; the ring itself goes away when both are closed.
    pub(super) fn close(self, writable: bool) {
        let mut ring = self.ring.lock();
        if writable {
            ring.write_open = false;
            proc::wakeup(Chan::of(&ring.nread));
        } else {
            ring.read_open = false;
            proc::wakeup(Chan::of(&ring.nwrite));
        }
    }

    pub(super) fn write(
        &self,
        p: &Proc,
        owned: &ProcOwned,
        va: VirtAddr,
        n: usize,
    ) -> Result<usize> {
        let mut ring = self.ring.lock();
        let mut sent = 0;
        while sent < n {
            if !ring.read_open {
                return Err(Error::BrokenPipe);
            }
            if p.shared().lock().killed() {
                return Err(Error::Killed);
            }
            if ring.is_full() {
                proc::wakeup(Chan::of(&ring.nread));
                let chan = Chan::of(&ring.nwrite);
                ring = proc::sleep(chan, ring);
                continue;
            }

            let mut byte = [0];
            if owned.vm().copy_in_bytes(&mut byte, va.byte_add(sent)?).is_err() {
                break;
            }
            let at = ring.nwrite % PIPE_SIZE;
            ring.buf[at] = byte[0];
            ring.nwrite += 1;
            sent += 1;
        }
        proc::wakeup(Chan::of(&ring.nread));
        Ok(sent)
    }

    pub(super) fn read(
        &self,
        p: &Proc,
        owned: &ProcOwned,
        va: VirtAddr,
        n: usize,
    ) -> Result<usize> {
        let mut ring = self.ring.lock();
        // block while empty with a living writer
        while ring.is_empty() && ring.write_open {
            if p.shared().lock().killed() {
                return Err(Error::Killed);
            }
            let chan = Chan::of(&ring.nread);
            ring = proc::sleep(chan, ring);
        }

        let mut got = 0;
        while got < n && !ring.is_empty() {
            let at = ring.nread % PIPE_SIZE;
            let byte = [ring.buf[at]];
            ring.nread += 1;
            if owned.vm().copy_out_bytes(va.byte_add(got)?, &byte).is_err() {
                break;
            }
            got += 1;
        }
        proc::wakeup(Chan::of(&ring.nwrite));
        Ok(got)
    }
}
