//! OTA session and binary buffer state.

use crate::error::{Error, Result};
use crate::image::dist::ParseError;
use std::time::{Duration, Instant};

/// Lifecycle of one OTA session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OtaState {
    /// No transfer in progress.
    #[default]
    Inactive,
    /// A transfer is in progress.
    Active,
    /// All data handed over, waiting for validation to complete.
    Done,
    /// Mainboard has validated and stored the binary.
    Validated,
}

/// Validity of the distribution buffer contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryState {
    /// Incomplete or unverified contents.
    #[default]
    Dirty,
    /// Download complete and verified.
    Valid,
}

/// State of the current transfer session.
///
/// Created once, reset to `Inactive` at the start and abort of every
/// transfer, and mutated only by the sender's execution context.
#[derive(Debug)]
pub struct OtaSession {
    state: OtaState,
    deadline: Option<Instant>,
    init_timeout: Duration,
    total_expected: u32,
}

impl OtaSession {
    /// Create an inactive session with the given overall timeout.
    pub fn new(init_timeout: Duration) -> Self {
        Self {
            state: OtaState::Inactive,
            deadline: None,
            init_timeout,
            total_expected: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OtaState {
        self.state
    }

    /// Total bytes this session expects to move.
    pub fn total_expected(&self) -> u32 {
        self.total_expected
    }

    /// Arm the deadline and enter `Active` for a transfer of
    /// `total_expected` bytes.
    pub fn begin(&mut self, total_expected: u32) {
        self.state = OtaState::Active;
        self.deadline = Some(Instant::now() + self.init_timeout);
        self.total_expected = total_expected;
    }

    /// Clear all transient state back to `Inactive`.
    pub fn reset(&mut self) {
        self.state = OtaState::Inactive;
        self.deadline = None;
        self.total_expected = 0;
    }

    /// Whether the session deadline has passed.
    pub fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// All data handed over; waiting on the receiver's verdict.
    pub fn mark_done(&mut self) {
        self.state = OtaState::Done;
    }

    /// Receiver confirmed the binary was stored.
    pub fn mark_validated(&mut self) {
        self.state = OtaState::Validated;
    }
}

/// Owned distribution buffer being filled by the download path.
///
/// The buffer belongs exclusively to the OTA subsystem while a session
/// is active. Writes land incrementally as data arrives from the
/// network or cellular source; the sender only accepts the buffer once
/// it has been marked valid.
#[derive(Debug)]
pub struct OtaBinary {
    buf: Vec<u8>,
    written: usize,
    state: BinaryState,
}

impl OtaBinary {
    /// Allocate a buffer for a download of `total` bytes.
    pub fn with_capacity(total: usize) -> Self {
        Self {
            buf: vec![0; total],
            written: 0,
            state: BinaryState::Dirty,
        }
    }

    /// Take ownership of an already complete buffer (e.g. a file read
    /// from disk) and mark it valid.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let written = buf.len();
        Self {
            buf,
            written,
            state: BinaryState::Valid,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Buffer validity.
    pub fn state(&self) -> BinaryState {
        self.state
    }

    /// Append downloaded bytes at the write cursor.
    ///
    /// Fails without writing if the chunk would overrun the allocated
    /// capacity.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let available = self.buf.len() - self.written;
        if data.len() > available {
            return Err(Error::Dist(ParseError::BufferExhausted {
                needed: data.len(),
                available,
            }));
        }
        self.buf[self.written..self.written + data.len()].copy_from_slice(data);
        self.written += data.len();
        Ok(())
    }

    /// Mark the download complete and verified.
    pub fn mark_valid(&mut self) {
        self.state = BinaryState::Valid;
    }

    /// Invalidate the contents (e.g. before a fresh download).
    pub fn mark_dirty(&mut self) {
        self.written = 0;
        self.state = BinaryState::Dirty;
    }

    /// The written bytes, only available once valid.
    pub fn bytes(&self) -> Result<&[u8]> {
        match self.state {
            BinaryState::Valid => Ok(&self.buf[..self.written]),
            BinaryState::Dirty => Err(Error::DirtyBinary),
        }
    }
}
