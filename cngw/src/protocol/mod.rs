//! Protocol implementations.

pub mod crc;
pub mod frame;

// Re-export common types
pub use frame::{
    BinaryKind, CryptoBlock, FirmwareVersion, FrameError, HeaderType, OtaCommand, OtaMessage,
    OtaStatus, PackageHeader, read_frame,
};
