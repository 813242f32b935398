//! Firmware image formats.

pub mod dist;

pub use dist::{DistReader, Distribution, FileHeader, PackageEntry, ParseError};
