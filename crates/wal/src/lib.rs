//! The redo-log mechanism behind the file system's write-ahead log.
//!
//! [`RedoLog`] owns the on-disk log region: the header block at `start`
//! followed by `capacity` data slots. It implements the commit and recovery
//! steps; admission control (which operations may join a transaction, and
//! when to sleep) is the kernel's business and lives elsewhere.
//!
//! Commit runs in four steps:
//!
//! 1. copy each recorded block's current (cached) contents into its log slot;
//! 2. write the header — after this single block write the transaction is
//!    committed and will survive a crash;
//! 3. install: copy each log slot to its home block;
//! 4. clear the header on disk.
//!
//! A crash between steps 2 and 4 leaves a nonzero on-disk count; recovery
//! replays step 3 and clears the header. Replaying is idempotent, so a crash
//! during recovery is handled by recovering again.

#![cfg_attr(not(test), no_std)]

use block_io::BlockDevice;
use dataview::PodMethods as _;
use nv6_fs_types::{BLOCK_SIZE, LogHeader, MAX_LOG_SLOTS};

/// The log region of one device plus the in-memory header of the
/// transaction being built.
pub struct RedoLog<D> {
    device: D,
    /// Header block number; data slots follow it.
    start: u32,
    /// Data slots available on disk.
    capacity: usize,
    header: LogHeader,
}

impl<D> RedoLog<D>
where
    D: BlockDevice<BLOCK_SIZE>,
{
    /// Creates the log over `capacity` data slots starting after block
    /// `start`. The caller must run [`Self::recover`] before recording
    /// anything.
    #[must_use]
    pub fn new(device: D, start: u32, capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= MAX_LOG_SLOTS);
        Self {
            device,
            start,
            capacity,
            header: LogHeader::zeroed(),
        }
    }

    /// Blocks recorded in the open transaction.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    /// Whether `more` additional blocks would still fit.
    #[must_use]
    pub fn fits(&self, more: usize) -> bool {
        self.len() + more <= self.capacity
    }

    /// Home block numbers recorded in the open transaction.
    #[must_use]
    pub fn dests(&self) -> &[u32] {
        self.header.dests()
    }

    /// Records `bno` in the open transaction.
    ///
    /// Returns `true` when the block was newly appended, `false` when an
    /// earlier record already covers it (absorption).
    ///
    /// # Panics
    ///
    /// Panics when the log is full; admission control must prevent that.
    pub fn record(&mut self, bno: u32) -> bool {
        if self.header.position(bno).is_some() {
            return false;
        }
        assert!(self.len() < self.capacity, "log overflow");
        self.header.push(bno);
        true
    }

    fn slot(&self, i: usize) -> u32 {
        self.start + 1 + u32::try_from(i).unwrap()
    }

    fn write_header(&self) -> Result<(), D::Error> {
        let mut block = [0; BLOCK_SIZE];
        *block.as_data_view_mut().get_mut::<LogHeader>(0) = self.header.clone();
        self.device.write(self.start, &block)
    }

    /// Copies each log slot to its home block.
    fn install(&self) -> Result<(), D::Error> {
        let mut block = [0; BLOCK_SIZE];
        for (i, &dest) in self.header.dests().iter().enumerate() {
            self.device.read(self.slot(i), &mut block)?;
            self.device.write(dest, &block)?;
        }
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// `cached` must copy the current contents of a recorded block into the
    /// supplied buffer; the blocks themselves still live in the buffer
    /// cache. No-op when nothing was recorded.
    pub fn commit(
        &mut self,
        mut cached: impl FnMut(u32, &mut [u8; BLOCK_SIZE]),
    ) -> Result<(), D::Error> {
        if self.is_empty() {
            return Ok(());
        }

        let mut block = [0; BLOCK_SIZE];
        for (i, &dest) in self.header.dests().iter().enumerate() {
            cached(dest, &mut block);
            self.device.write(self.slot(i), &block)?;
        }

        self.write_header()?; // the commit point

        self.install()?;

        self.header.clear();
        self.write_header()
    }

    /// Replays a committed-but-not-installed transaction found on disk.
    ///
    /// Returns how many blocks were installed. Called once at boot before
    /// any other file-system traffic; calling it again is harmless.
    pub fn recover(&mut self) -> Result<usize, D::Error> {
        let mut block = [0; BLOCK_SIZE];
        self.device.read(self.start, &mut block)?;
        self.header = block.as_data_view().get::<LogHeader>(0).clone();

        let installed = self.len();
        self.install()?;
        self.header.clear();
        self.write_header()?;
        Ok(installed)
    }
}

#[cfg(test)]
mod tests;
