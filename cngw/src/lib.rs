//! # cngw
//!
//! A library for delivering firmware distributions from a gateway to
//! its mainboard MCUs.
//!
//! This crate provides the core functionality for pushing OTA updates
//! over the gateway-to-mainboard link, including:
//!
//! - Distribution binary parsing (file header, package headers, crypto
//!   blocks, payloads)
//! - The CRC-framed OTA command protocol
//! - A flow-gated sender state machine with restart and frame-bundling
//!   support
//! - CRC-8 frame checksums and CRC-32 payload verification
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport`
//!   crate
//!
//! ## Features
//!
//! - `native` (default): Native serial link support
//!
//! ## Example
//!
//! ```rust,no_run
//! use cngw::{Distribution, OtaSender, OtaSignals, SenderConfig};
//! use cngw::transport::serial::SerialTransport;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let buf = std::fs::read("distribution.bin")?;
//!     let dist = Distribution::parse(&buf)?;
//!
//!     let mut transport = SerialTransport::open("/dev/ttyUSB0", 115_200)?;
//!     let signals = Arc::new(OtaSignals::new());
//!     // A status RX loop feeding `signals` runs on its own thread;
//!     // see `transport::run_status_rx`.
//!
//!     let mut sender = OtaSender::new(&mut transport, signals, SenderConfig::default());
//!     sender.send(&dist)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod ota;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use transport::serial::SerialTransport;
pub use {
    error::{Error, Result},
    image::dist::{DistReader, Distribution, FileHeader, PackageEntry, ParseError},
    ota::{
        BundlingPolicy, OtaBinary, OtaSender, OtaSession, OtaSignals, SenderConfig, TransportClass,
    },
    protocol::frame::{
        BinaryKind, CryptoBlock, FirmwareVersion, FrameError, OtaCommand, OtaMessage, OtaStatus,
        PackageHeader,
    },
    transport::{Transport, run_status_rx},
};
