//! Shared signaling between the sender task and the link RX context.
//!
//! Two distinct paths coexist on purpose:
//!
//! - Immediate-action signals (`Ack`, `Restart`) act directly on the
//!   flow gate and restart flag so a blocked sender wakes at once.
//! - Verdict signals (`Error`, `Success`) flow through the single-slot
//!   [`StatusMailbox`], where only the newest unconsumed value matters.
//!
//! [`OtaSignals`] is the only mutable state shared between the two
//! execution contexts.

use crate::protocol::frame::OtaStatus;
use log::{debug, warn};
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Bundle pause before the first ack has steered the delay.
const BUNDLE_DELAY_INITIAL_US: u32 = 13_500;

/// Bundle pause after an ack that carried a state transfer.
const BUNDLE_DELAY_TRANSFER_US: u32 = 12_000;

/// Bundle pause after a plain data ack.
const BUNDLE_DELAY_DATA_US: u32 = 16_000;

/// Single-slot flow-control gate shaped like a binary semaphore.
///
/// The sender acquires the gate before producing each frame; the RX
/// context (or the bundling policy) releases it. The gate starts
/// released so the first frame goes out without waiting.
#[derive(Debug)]
pub struct FlowGate {
    available: Mutex<bool>,
    condvar: Condvar,
}

impl FlowGate {
    /// Create a released gate.
    pub fn new() -> Self {
        Self {
            available: Mutex::new(true),
            condvar: Condvar::new(),
        }
    }

    /// Take the gate, waiting up to `timeout`. Returns `false` on
    /// timeout.
    pub fn acquire(&self, timeout: Duration) -> bool {
        let guard = self.available.lock().expect("gate mutex poisoned");
        let (mut guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |available| !*available)
            .expect("gate mutex poisoned");
        if *guard {
            *guard = false;
            true
        } else {
            false
        }
    }

    /// Release the gate, waking one waiter.
    pub fn release(&self) {
        let mut guard = self.available.lock().expect("gate mutex poisoned");
        *guard = true;
        self.condvar.notify_one();
    }
}

impl Default for FlowGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-slot status inbox with overwrite semantics.
///
/// Not a queue: an unconsumed value is replaced by a newer post.
#[derive(Debug, Default)]
pub struct StatusMailbox {
    slot: Mutex<Option<OtaStatus>>,
    condvar: Condvar,
}

impl StatusMailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit a status, replacing any unconsumed prior value.
    pub fn post(&self, status: OtaStatus) {
        let mut slot = self.slot.lock().expect("mailbox mutex poisoned");
        if let Some(old) = slot.replace(status) {
            debug!("status mailbox overwrote unconsumed {old:?} with {status:?}");
        }
        self.condvar.notify_one();
    }

    /// Take the current status, waiting up to `timeout` for one to
    /// arrive.
    pub fn try_take(&self, timeout: Duration) -> Option<OtaStatus> {
        let slot = self.slot.lock().expect("mailbox mutex poisoned");
        let (mut slot, _) = self
            .condvar
            .wait_timeout_while(slot, timeout, |slot| slot.is_none())
            .expect("mailbox mutex poisoned");
        slot.take()
    }

    /// Discard any pending status without waiting.
    pub fn drain(&self) {
        let mut slot = self.slot.lock().expect("mailbox mutex poisoned");
        *slot = None;
    }
}

/// All state shared between the sender task and the RX context.
#[derive(Debug)]
pub struct OtaSignals {
    /// Per-frame flow-control gate.
    pub gate: FlowGate,
    /// Final-verdict mailbox.
    pub mailbox: StatusMailbox,
    restart_required: AtomicBool,
    link_error: AtomicBool,
    bundled_frames: AtomicU32,
    bundle_delay_us: AtomicU32,
}

impl OtaSignals {
    /// Create a fresh signal block.
    pub fn new() -> Self {
        Self {
            gate: FlowGate::new(),
            mailbox: StatusMailbox::new(),
            restart_required: AtomicBool::new(false),
            link_error: AtomicBool::new(false),
            bundled_frames: AtomicU32::new(0),
            bundle_delay_us: AtomicU32::new(BUNDLE_DELAY_INITIAL_US),
        }
    }

    /// Clear transient state at the start of a send operation.
    ///
    /// A stale link error from a previous send is also cleared; the RX
    /// context re-reports it if the link is still down.
    pub fn begin_send(&self) {
        self.restart_required.store(false, Ordering::SeqCst);
        self.link_error.store(false, Ordering::SeqCst);
        self.bundled_frames.store(0, Ordering::SeqCst);
        self.mailbox.drain();
    }

    /// The mainboard processed a frame; the next one may be sent.
    ///
    /// `state_transfer` is set by the RX side when the ack accompanied
    /// a protocol state change, which tightens the bundle pause.
    pub fn notify_ack(&self, state_transfer: bool) {
        let delay = if state_transfer {
            BUNDLE_DELAY_TRANSFER_US
        } else {
            BUNDLE_DELAY_DATA_US
        };
        self.bundle_delay_us.store(delay, Ordering::SeqCst);
        self.bundled_frames.store(0, Ordering::SeqCst);
        self.gate.release();
    }

    /// The mainboard requested the whole distribution be re-sent.
    ///
    /// Also releases the gate so a blocked sender observes the flag
    /// immediately.
    pub fn notify_restart(&self) {
        self.restart_required.store(true, Ordering::SeqCst);
        self.gate.release();
    }

    /// Consume the restart flag.
    pub fn take_restart(&self) -> bool {
        self.restart_required.swap(false, Ordering::SeqCst)
    }

    /// The RX context observed an unrecoverable link failure.
    pub fn report_link_error(&self) {
        self.link_error.store(true, Ordering::SeqCst);
        self.gate.release();
    }

    /// Whether a link failure is pending.
    pub fn link_error(&self) -> bool {
        self.link_error.load(Ordering::SeqCst)
    }

    /// Clear a pending link failure (owner decides when to retry).
    pub fn clear_link_error(&self) {
        self.link_error.store(false, Ordering::SeqCst);
    }

    /// Count one self-released (bundled) frame, returning the running
    /// count since the last external ack.
    pub fn count_bundled(&self) -> u32 {
        self.bundled_frames.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Self-released frames since the last external ack.
    pub fn bundled(&self) -> u32 {
        self.bundled_frames.load(Ordering::SeqCst)
    }

    /// Current inter-frame pause while bundling.
    pub fn bundle_delay(&self) -> Duration {
        Duration::from_micros(u64::from(self.bundle_delay_us.load(Ordering::SeqCst)))
    }

    /// RX-callback router for decoded status messages.
    pub fn on_status(&self, status: OtaStatus) {
        match status {
            OtaStatus::Ack => self.notify_ack(false),
            OtaStatus::Restart => {
                warn!("mainboard requested OTA restart");
                self.notify_restart();
            },
            OtaStatus::Error | OtaStatus::Success => self.mailbox.post(status),
        }
    }
}

impl Default for OtaSignals {
    fn default() -> Self {
        Self::new()
    }
}
