//! Firmware distribution binary format.
//!
//! A distribution binary bundles one or more sub-binaries destined for
//! different MCU targets behind a single file header:
//!
//! ```text
//! +----------------------+
//! |  FileHeader (10B)    |  serial[9] + binary_count
//! +----------------------+
//! |  PackageHeader (15B) |  kind + version + size + crc32
//! +----------------------+
//! |  CryptoBlock (128B)  |  zero-filled placeholders
//! +----------------------+
//! |  Payload (size B)    |
//! +----------------------+
//! |  ... repeated per    |
//! |  binary_count ...    |
//! +----------------------+
//! ```
//!
//! Sizes are tracked explicitly, never NUL-terminated. Every cursor
//! advance is bounds-checked before it happens; a truncated or
//! malformed buffer surfaces as [`ParseError::BufferExhausted`] instead
//! of an out-of-bounds read.

use crate::protocol::crc::crc32_words;
use crate::protocol::frame::{
    CRYPTO_BLOCK_LEN, CryptoBlock, FrameError, PACKAGE_HEADER_LEN, PackageHeader,
};
use log::debug;
use std::ops::Range;
use thiserror::Error;

/// Length of the distribution serial number.
pub const SERIAL_LEN: usize = 9;

/// Wire length of the file header.
pub const FILE_HEADER_LEN: usize = SERIAL_LEN + 1;

/// Distribution parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The next read would run past the end of the buffer.
    #[error("buffer exhausted: needed {needed} bytes, {available} available")]
    BufferExhausted {
        /// Bytes the next structure requires.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// The file header declares zero sub-binaries.
    #[error("distribution contains no binaries")]
    NoBinaries,

    /// A structure inside the buffer failed to decode.
    #[error("invalid field: {0}")]
    InvalidField(#[from] FrameError),
}

/// Distribution file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Device serial number this distribution was built for.
    pub serial: [u8; SERIAL_LEN],
    /// Number of sub-binaries in the distribution.
    pub binary_count: u8,
}

impl FileHeader {
    /// Serial number as a lossy string for display.
    pub fn serial_str(&self) -> String {
        String::from_utf8_lossy(&self.serial).into_owned()
    }
}

/// Sequential, non-owning cursor over a distribution buffer.
///
/// The methods must be called in wire order: [`Self::file_header`],
/// then per sub-binary [`Self::package_header`], [`Self::crypto`], and
/// [`Self::payload_chunk`] until the declared payload size is consumed.
#[derive(Debug, Clone)]
pub struct DistReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DistReader<'a> {
    /// Create a reader positioned at the file header.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current byte offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], ParseError> {
        let available = self.remaining();
        if needed > available {
            return Err(ParseError::BufferExhausted { needed, available });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    /// Read the file header and advance past it.
    pub fn file_header(&mut self) -> Result<FileHeader, ParseError> {
        let bytes = self.take(FILE_HEADER_LEN)?;
        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(&bytes[..SERIAL_LEN]);
        Ok(FileHeader {
            serial,
            binary_count: bytes[SERIAL_LEN],
        })
    }

    /// Read the next package header and advance past it.
    pub fn package_header(&mut self) -> Result<PackageHeader, ParseError> {
        let bytes = self.take(PACKAGE_HEADER_LEN)?;
        Ok(PackageHeader::decode(bytes)?)
    }

    /// Read the crypto block and advance past it.
    pub fn crypto(&mut self) -> Result<CryptoBlock, ParseError> {
        let bytes = self.take(CRYPTO_BLOCK_LEN)?;
        Ok(CryptoBlock::decode(bytes)?)
    }

    /// Read `len` payload bytes and advance past them.
    pub fn payload_chunk(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        self.take(len)
    }
}

/// One parsed sub-binary entry.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    /// Package header.
    pub header: PackageHeader,
    /// Crypto block.
    pub crypto: CryptoBlock,
    /// Byte range of the payload within the distribution buffer.
    pub payload: Range<usize>,
}

/// A fully walked distribution binary.
///
/// Eager parsing validates the whole layout up front; the sender uses
/// this to reject a truncated download before the first frame goes out.
#[derive(Debug, Clone)]
pub struct Distribution<'a> {
    buf: &'a [u8],
    /// File header.
    pub file_header: FileHeader,
    /// Parsed sub-binaries, in wire order.
    pub packages: Vec<PackageEntry>,
}

impl<'a> Distribution<'a> {
    /// Parse a distribution buffer, validating every offset.
    ///
    /// Produces exactly `binary_count` package entries or fails with
    /// [`ParseError::BufferExhausted`] on the first offset that would
    /// leave the buffer.
    pub fn parse(buf: &'a [u8]) -> Result<Self, ParseError> {
        let mut reader = DistReader::new(buf);
        let file_header = reader.file_header()?;

        if file_header.binary_count == 0 {
            return Err(ParseError::NoBinaries);
        }

        debug!(
            "distribution: serial {}, {} binaries, {} bytes",
            file_header.serial_str(),
            file_header.binary_count,
            buf.len()
        );

        let mut packages = Vec::with_capacity(usize::from(file_header.binary_count));
        for i in 0..file_header.binary_count {
            let header = reader.package_header()?;
            let crypto = reader.crypto()?;
            let start = reader.position();
            reader.payload_chunk(header.size as usize)?;
            debug!(
                "  [{}] {} v{}, {} bytes, crc32 {:#010x}",
                i, header.kind, header.version, header.size, header.crc32
            );
            packages.push(PackageEntry {
                header,
                crypto,
                payload: start..start + header.size as usize,
            });
        }

        Ok(Self {
            buf,
            file_header,
            packages,
        })
    }

    /// Total payload bytes across all sub-binaries.
    pub fn total_payload(&self) -> u64 {
        self.packages.iter().map(|p| u64::from(p.header.size)).sum()
    }

    /// Payload bytes of one entry.
    pub fn payload(&self, entry: &PackageEntry) -> &'a [u8] {
        &self.buf[entry.payload.clone()]
    }

    /// Verify the declared CRC-32 of one entry against its payload.
    pub fn verify_crc32(&self, entry: &PackageEntry) -> bool {
        crc32_words(self.payload(entry)) == entry.header.crc32
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::build_distribution;
    use super::*;
    use crate::protocol::frame::BinaryKind;

    const SERIAL: &[u8; SERIAL_LEN] = b"ABC123456";

    #[test]
    fn test_parse_single_binary() {
        let payload = vec![0x5A; 300];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);

        let dist = Distribution::parse(&buf).unwrap();
        assert_eq!(dist.file_header.serial_str(), "ABC123456");
        assert_eq!(dist.file_header.binary_count, 1);
        assert_eq!(dist.packages.len(), 1);
        assert_eq!(dist.packages[0].header.size, 300);
        assert_eq!(dist.payload(&dist.packages[0]), payload.as_slice());
        assert!(dist.verify_crc32(&dist.packages[0]));
    }

    #[test]
    fn test_parse_multi_binary_in_order() {
        let first = vec![0x11; 130];
        let second = vec![0x22; 64];
        let buf = build_distribution(
            SERIAL,
            &[(BinaryKind::CnMcu, &first), (BinaryKind::DrMcu, &second)],
        );

        let dist = Distribution::parse(&buf).unwrap();
        assert_eq!(dist.packages.len(), 2);
        assert_eq!(dist.packages[0].header.kind, BinaryKind::CnMcu);
        assert_eq!(dist.packages[1].header.kind, BinaryKind::DrMcu);
        assert_eq!(dist.payload(&dist.packages[1]), second.as_slice());
        assert_eq!(dist.total_payload(), 194);
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let payload = vec![0x5A; 300];
        let mut buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        // One byte short of the declared last payload end.
        buf.pop();

        let err = Distribution::parse(&buf).unwrap_err();
        assert!(matches!(err, ParseError::BufferExhausted { .. }));
    }

    #[test]
    fn test_parse_rejects_empty_count() {
        let mut buf = Vec::new();
        buf.extend_from_slice(SERIAL);
        buf.push(0);
        assert_eq!(Distribution::parse(&buf).unwrap_err(), ParseError::NoBinaries);
    }

    #[test]
    fn test_reader_bounds_check_before_advance() {
        let buf = [0u8; FILE_HEADER_LEN + 3];
        let mut reader = DistReader::new(&buf);
        reader.file_header().unwrap();

        let before = reader.position();
        let err = reader.package_header().unwrap_err();
        assert!(matches!(err, ParseError::BufferExhausted { needed: 15, .. }));
        // Failed reads must not move the cursor.
        assert_eq!(reader.position(), before);
    }

    #[test]
    fn test_reader_chunked_payload_walk() {
        let payload: Vec<u8> = (0u8..=199).collect();
        let buf = build_distribution(SERIAL, &[(BinaryKind::DrMcu, &payload)]);

        let mut reader = DistReader::new(&buf);
        reader.file_header().unwrap();
        let header = reader.package_header().unwrap();
        reader.crypto().unwrap();

        let first = reader.payload_chunk(128).unwrap();
        assert_eq!(first, &payload[..128]);
        let rest = reader.payload_chunk(header.size as usize - 128).unwrap();
        assert_eq!(rest, &payload[128..]);
        assert_eq!(reader.remaining(), 0);
    }
}
