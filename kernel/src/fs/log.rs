//! Transaction policy over the redo log.
//!
//! One transaction is in flight at a time; concurrent FS syscalls share it
//! through a reference count. `begin` sleeps while a commit is running or
//! while admitting one more syscall could overflow the log; the last
//! `end` commits everything at once. Block buffers fetched through a
//! writing [`Tx`] record themselves into the log when mutated, so the
//! "all disk mutation goes through the log" rule holds by construction.

use core::{cell::UnsafeCell, marker::PhantomData, ptr};

use nv6_fs_types::{BlockNo, SuperBlock};
use nv6_kernel_params::{LOG_BLOCKS, MAX_OP_BLOCKS};
use once_init::OnceInit;
use wal::RedoLog;

use crate::sync::{CondVar, SpinLock};

use super::{Dev, block_io, block_io::DiskDev};

struct LogState {
    /// FS syscalls currently inside a transaction.
    outstanding: usize,
    /// A commit is running; nothing may be admitted or recorded.
    committing: bool,
}

struct Log {
    state: SpinLock<LogState>,
    space: CondVar,
    /// Mutated either under `state` with `committing == false` (records)
    /// or by the single committing thread with `committing == true`.
    redo: UnsafeCell<RedoLog<DiskDev>>,
}

unsafe impl Sync for Log {}

static LOG: OnceInit<Log> = OnceInit::new();

fn log() -> &'static Log {
    LOG.get()
}

/// Builds the log over the super block's log region and replays anything a
/// crash left committed.
pub(super) fn init(_dev: Dev, sb: &SuperBlock) {
    let capacity = usize::min(sb.nlog as usize - 1, LOG_BLOCKS);
    let mut redo = RedoLog::new(DiskDev, sb.logstart, capacity);
    let Ok(_installed) = redo.recover();

    LOG.init(Log {
        state: SpinLock::new(LogState {
            outstanding: 0,
            committing: false,
        }),
        space: CondVar::new(),
        redo: UnsafeCell::new(redo),
    });
}

impl Log {
    fn begin_op(&self) {
        let mut state = self.state.lock();
        loop {
            if state.committing {
                state = self.space.wait(state);
                continue;
            }
            // admitting this op must not be able to overflow the log
            let fits =
                unsafe { &*self.redo.get() }.fits((state.outstanding + 1) * MAX_OP_BLOCKS);
            if !fits {
                state = self.space.wait(state);
                continue;
            }
            state.outstanding += 1;
            break;
        }
    }

    fn end_op(&self) {
        let mut state = self.state.lock();
        assert!(!state.committing);
        state.outstanding -= 1;

        if state.outstanding > 0 {
            // reserved space shrank; someone may be waiting in begin_op
            self.space.notify();
            return;
        }

        state.committing = true;
        drop(state);

        // Sole owner of `redo` until `committing` clears; commit sleeps on
        // buffer locks and disk I/O, so no spin lock is held here.
        let redo = unsafe { &mut *self.redo.get() };

        let mut logged = [0_u32; LOG_BLOCKS];
        let count = redo.dests().len();
        logged[..count].copy_from_slice(redo.dests());

        let Ok(()) = redo.commit(|bno, buf| {
            let Ok(b) = block_io::cache().get(bno).read();
            buf.copy_from_slice(b.bytes());
        });

        // installed; the cache may recycle the logged buffers now
        for &bno in &logged[..count] {
            block_io::cache().unpin(bno);
        }

        let mut state = self.state.lock();
        state.committing = false;
        self.space.notify();
        drop(state);
    }

    fn record(&self, buf: &block_io::Buf<true>) {
        let state = self.state.lock();
        assert!(state.outstanding > 0, "logged write outside a transaction");
        assert!(!state.committing);

        let redo = unsafe { &mut *self.redo.get() };
        if redo.record(buf.block_no()) {
            // keep the buffer resident until the commit installs it
            buf.pin();
        }
        drop(state);
    }
}

/// An open transaction. `WRITE = false` skips log admission entirely and
/// only permits reads.
///
/// Ending happens on drop; a transaction cannot leak out of scope.
pub struct Tx<const WRITE: bool> {
    _not_send: PhantomData<*const ()>,
}

pub(super) fn begin() -> Tx<true> {
    log().begin_op();
    Tx {
        _not_send: PhantomData,
    }
}

pub(super) fn begin_read() -> Tx<false> {
    Tx {
        _not_send: PhantomData,
    }
}

impl<const WRITE: bool> Drop for Tx<WRITE> {
    fn drop(&mut self) {
        if WRITE {
            log().end_op();
        }
    }
}

impl<const WRITE: bool> Tx<WRITE> {
    /// Fetches the block through the cache, reading it if necessary.
    pub fn get(&self, dev: Dev, bno: BlockNo) -> TxBuf<'_, WRITE> {
        let Ok(inner) = block_io::get(dev, bno).read();
        TxBuf {
            inner: Some(inner),
            dirty: false,
            _tx: PhantomData,
        }
    }

    /// This transaction, if it is a writing one.
    ///
    /// Lets code generic over `WRITE` reach the write-only operations on
    /// the paths where they are statically reachable.
    pub fn as_write(&self) -> Option<&Tx<true>> {
        if !WRITE {
            return None;
        }
        // Tx has no data; the const parameter is the only difference.
        Some(unsafe { &*ptr::from_ref(self).cast() })
    }
}

impl Tx<true> {
    /// Fetches the block zero-filled, skipping the disk read. For freshly
    /// allocated blocks.
    pub fn get_zeroed(&self, dev: Dev, bno: BlockNo) -> TxBuf<'_, true> {
        let inner = block_io::get(dev, bno).zeroed();
        TxBuf {
            inner: Some(inner),
            dirty: true,
            _tx: PhantomData,
        }
    }
}

/// A block held inside a transaction.
///
/// Mutating access marks the buffer dirty; a dirty buffer records itself
/// into the log when the guard drops. The data itself stays in the cache
/// (pinned) until the commit installs it.
pub struct TxBuf<'t, const WRITE: bool> {
    inner: Option<block_io::Buf<true>>,
    dirty: bool,
    _tx: PhantomData<&'t Tx<WRITE>>,
}

impl<const WRITE: bool> TxBuf<'_, WRITE> {
    pub fn bytes(&self) -> &[u8; nv6_fs_types::BLOCK_SIZE] {
        self.inner.as_ref().unwrap().bytes()
    }

    /// Views the block as an on-disk structure.
    pub fn view<T: dataview::Pod>(&self) -> &T {
        self.inner.as_ref().unwrap().view()
    }
}

impl TxBuf<'_, true> {
    pub fn bytes_mut(&mut self) -> &mut [u8; nv6_fs_types::BLOCK_SIZE] {
        self.dirty = true;
        self.inner.as_mut().unwrap().bytes_mut()
    }

    /// Views the block mutably; the access marks it dirty.
    pub fn view_mut<T: dataview::Pod>(&mut self) -> &mut T {
        self.dirty = true;
        self.inner.as_mut().unwrap().view_mut()
    }
}

impl<const WRITE: bool> Drop for TxBuf<'_, WRITE> {
    fn drop(&mut self) {
        if self.dirty {
            log().record(self.inner.as_ref().unwrap());
        }
        // dropping the inner guard unlocks and releases the cache slot
    }
}
