// vim: tw=80
//! Writer front ends
//!
//! A writer accumulates LBAs and hands them to the device in whole transfers.
//! Placement itself is done by [`Dev`](crate::device::Dev), which owns the
//! bands and the L2P table.

use std::collections::VecDeque;

use crate::types::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriterKind {
    /// Writes on behalf of users
    User,
    /// Relocates valid data out of bands being reclaimed
    Gc,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriterState {
    Paused,
    Running,
    Halted,
}

#[derive(Debug)]
pub struct Writer {
    kind: WriterKind,
    state: WriterState,
    /// Band currently receiving this writer's data
    band: Option<BandT>,
    /// LBAs not yet placed, oldest first
    queue: VecDeque<LbaT>,
    /// Transfer size, in blocks
    batch: u64,
}

impl Writer {
    pub fn band(&self) -> Option<BandT> {
        self.band
    }

    pub fn batch(&self) -> u64 {
        self.batch
    }

    /// Drop everything still queued.  Returns the number of LBAs lost.
    pub fn discard(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }

    /// Queue `lba` for placement.  Fails with `EAGAIN` unless running.
    pub fn enqueue(&mut self, lba: LbaT) -> Result<()> {
        if self.state != WriterState::Running {
            return Err(Error::EAGAIN);
        }
        self.queue.push_back(lba);
        Ok(())
    }

    /// Stop accepting new data.  Anything already queued may still be placed.
    pub fn halt(&mut self) {
        self.state = WriterState::Halted;
    }

    pub fn is_halted(&self) -> bool {
        self.state == WriterState::Halted
    }

    pub fn kind(&self) -> WriterKind {
        self.kind
    }

    /// A new, paused writer that issues single-block transfers until told
    /// otherwise.
    pub fn new(kind: WriterKind) -> Self {
        Writer {
            kind,
            state: WriterState::Paused,
            band: None,
            queue: VecDeque::new(),
            batch: 1,
        }
    }

    /// Complete a partial trailing transfer with `LBA_INVALID`.  Returns the
    /// number of padding blocks added.
    pub fn pad(&mut self) -> u64 {
        let partial = self.queue.len() as u64 % self.batch;
        if partial == 0 {
            return 0;
        }
        let padding = self.batch - partial;
        for _ in 0..padding {
            self.queue.push_back(LBA_INVALID);
        }
        padding
    }

    /// Number of LBAs waiting to be placed
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Return a batch that could not be placed to the head of the queue.
    pub fn requeue(&mut self, batch: Vec<LbaT>) {
        for lba in batch.into_iter().rev() {
            self.queue.push_front(lba);
        }
    }

    /// Return the writer to service after a restart or a pause.
    pub fn resume(&mut self) {
        self.state = WriterState::Running;
    }

    pub fn set_band(&mut self, band: Option<BandT>) {
        self.band = band;
    }

    /// Set the transfer size.  Only allowed while nothing is queued.
    pub fn set_batch(&mut self, batch: u64) {
        assert!(batch > 0);
        assert!(self.queue.is_empty());
        self.batch = batch;
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Remove the oldest complete transfer from the queue, if there is one.
    pub fn take_batch(&mut self) -> Option<Vec<LbaT>> {
        if (self.queue.len() as u64) < self.batch {
            None
        } else {
            Some(self.queue.drain(..self.batch as usize).collect())
        }
    }
}

// LCOV_EXCL_STOP
