//! Link transports toward the mainboard.
//!
//! The protocol layer is I/O-agnostic: the sender writes frames through
//! the [`Transport`] trait and a separate RX context feeds decoded
//! status messages back through [`crate::ota::OtaSignals`]. Native
//! serial hardware lives in [`serial`] behind the `native` feature;
//! tests substitute in-memory transports.

#[cfg(feature = "native")]
pub mod serial;

use crate::error::{Error, Result};
use crate::ota::OtaSignals;
use crate::protocol::frame::{OtaMessage, read_frame};
use log::{debug, trace, warn};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outbound frame sink toward the mainboard.
pub trait Transport: Send {
    /// Write one complete frame, blocking until handed to the link.
    fn transmit(&mut self, frame: &[u8]) -> Result<()>;

    /// Human-readable link name for diagnostics.
    fn name(&self) -> &str;
}

/// Receive loop for the status direction of the link.
///
/// Runs until `stop` is raised or the reader fails hard. Corrupt
/// frames and read timeouts are tolerated (the mainboard re-sends
/// status it cares about); an unexpected non-status command is logged
/// and dropped. A fatal reader error is reported through
/// [`OtaSignals::report_link_error`] so a blocked sender aborts
/// instead of waiting out its gate timeout.
pub fn run_status_rx<R: Read>(mut reader: R, signals: &OtaSignals, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        let frame = match read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(Error::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                continue;
            },
            Err(Error::Frame(err)) => {
                trace!("dropping corrupt frame: {err}");
                continue;
            },
            Err(err) => {
                warn!("status RX terminated: {err}");
                signals.report_link_error();
                return;
            },
        };

        match OtaMessage::decode(&frame) {
            Ok(OtaMessage::Status(status)) => {
                trace!("status RX: {status:?}");
                signals.on_status(status);
            },
            Ok(other) => debug!("ignoring unexpected {:?} frame", other.command()),
            Err(err) => trace!("dropping corrupt frame: {err}"),
        }
    }
}
