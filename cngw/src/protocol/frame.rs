//! CN⇄GW wire frame codec.
//!
//! Every message exchanged with the mainboard over the half-duplex link
//! uses the same packed layout:
//!
//! ```text
//! +--------+---------------+-------------+
//! | Header |    Payload    | Trailer CRC |
//! +--------+---------------+-------------+
//!
//! Header : [type: u8][data_size: u16 BE][header_crc: u8]    (4 bytes)
//! Payload: [command: u8][...command-specific fields...]
//! Trailer: [crc: u8] over [command .. last field byte]
//! ```
//!
//! `data_size` counts the payload bytes including the trailing CRC.
//! Both CRCs are CRC-8 with seed 0 (see [`crate::protocol::crc`]).
//!
//! Payloads are modelled as the tagged enum [`OtaMessage`]; there is one
//! variant per OTA command and construction/matching is exhaustive.

use crate::error::Result;
use crate::protocol::crc::crc8;
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use thiserror::Error;

/// Wire length of the frame header.
pub const HEADER_LEN: usize = 4;

/// Maximum number of binary payload bytes per `BinaryData` frame.
///
/// Bounded by the mainboard's SPI RX DMA buffer.
pub const MAX_BINARY_CHUNK: usize = 128;

/// Wire length of a packed [`FirmwareVersion`].
pub const VERSION_LEN: usize = 6;

/// Wire length of a packed [`PackageHeader`].
pub const PACKAGE_HEADER_LEN: usize = 15;

/// Wire length of a packed [`CryptoBlock`].
pub const CRYPTO_BLOCK_LEN: usize = 128;

/// Frame decoding errors.
///
/// Corrupt frames are always detected locally via CRC and never
/// silently accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a complete frame.
    #[error("frame truncated: {0} bytes")]
    Truncated(usize),

    /// Header CRC-8 did not match.
    #[error("header CRC mismatch")]
    BadHeaderCrc,

    /// Trailer CRC-8 did not match.
    #[error("trailer CRC mismatch")]
    BadTrailerCrc,

    /// Declared payload size disagrees with the bytes present.
    #[error("size mismatch: declared {declared}, actual {actual}")]
    SizeMismatch {
        /// Size from the frame header.
        declared: usize,
        /// Size actually available or required.
        actual: usize,
    },

    /// Unrecognized header type byte.
    #[error("unknown header type: {0:#04x}")]
    UnknownHeaderType(u8),

    /// Unrecognized OTA command byte.
    #[error("unknown OTA command: {0:#04x}")]
    UnknownCommand(u8),

    /// Unrecognized OTA status byte.
    #[error("unknown OTA status: {0:#04x}")]
    UnknownStatus(u8),

    /// Unrecognized binary kind byte in a package header.
    #[error("unknown binary kind: {0:#04x}")]
    UnknownBinaryKind(u8),

    /// Binary chunk larger than [`MAX_BINARY_CHUNK`].
    #[error("binary chunk of {0} bytes exceeds the 128 byte limit")]
    Oversize(usize),
}

/// Header types used on the CN⇄GW link.
///
/// Only `OtaCommand` frames are produced by this crate, but the full
/// enum is kept so incoming traffic can be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderType {
    /// Action command.
    ActionCommand = 0x01,
    /// Query command.
    QueryCommand = 0x02,
    /// Configuration command.
    ConfigurationCommand = 0x03,
    /// Configuration request command.
    ConfigurationRequestCommand = 0x04,
    /// Config message command.
    ConfigMessageCommand = 0x05,
    /// Handshake command.
    HandshakeCommand = 0x06,
    /// Handshake response.
    HandshakeResponse = 0x07,
    /// Firmware update command.
    FirmwareUpdateCommand = 0x08,
    /// Status update command.
    StatusUpdateCommand = 0x09,
    /// Log command.
    LogCommand = 0x0A,
    /// OTA command (all messages in this module).
    OtaCommand = 0x0B,
    /// Device report.
    DeviceReport = 0x0C,
    /// Control command.
    ControlCommand = 0x0D,
    /// Direct control command.
    DirectControlCommand = 0x0E,
}

impl TryFrom<u8> for HeaderType {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            0x01 => Ok(Self::ActionCommand),
            0x02 => Ok(Self::QueryCommand),
            0x03 => Ok(Self::ConfigurationCommand),
            0x04 => Ok(Self::ConfigurationRequestCommand),
            0x05 => Ok(Self::ConfigMessageCommand),
            0x06 => Ok(Self::HandshakeCommand),
            0x07 => Ok(Self::HandshakeResponse),
            0x08 => Ok(Self::FirmwareUpdateCommand),
            0x09 => Ok(Self::StatusUpdateCommand),
            0x0A => Ok(Self::LogCommand),
            0x0B => Ok(Self::OtaCommand),
            0x0C => Ok(Self::DeviceReport),
            0x0D => Ok(Self::ControlCommand),
            0x0E => Ok(Self::DirectControlCommand),
            v => Err(FrameError::UnknownHeaderType(v)),
        }
    }
}

/// OTA command tags (first payload byte of every OTA frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaCommand {
    /// Distribution file header information.
    FileHeaderInfo = 1,
    /// Sub-binary package header information.
    PackageHeaderInfo = 2,
    /// Crypto block for the upcoming sub-binary.
    CryptoInfo = 3,
    /// A chunk of binary data.
    BinaryData = 4,
    /// Status report from the mainboard.
    Status = 5,
}

impl TryFrom<u8> for OtaCommand {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            1 => Ok(Self::FileHeaderInfo),
            2 => Ok(Self::PackageHeaderInfo),
            3 => Ok(Self::CryptoInfo),
            4 => Ok(Self::BinaryData),
            5 => Ok(Self::Status),
            v => Err(FrameError::UnknownCommand(v)),
        }
    }
}

/// Status values reported by the mainboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaStatus {
    /// Unrecoverable error on the mainboard; abort the transfer.
    Error = 0,
    /// Entire distribution received and saved to flash.
    Success = 1,
    /// Mainboard requests the whole distribution be re-sent.
    Restart = 2,
    /// One OTA message processed; the next frame may be sent.
    Ack = 3,
}

impl TryFrom<u8> for OtaStatus {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            0 => Ok(Self::Error),
            1 => Ok(Self::Success),
            2 => Ok(Self::Restart),
            3 => Ok(Self::Ack),
            v => Err(FrameError::UnknownStatus(v)),
        }
    }
}

/// Firmware binary types carried in the distribution binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryKind {
    /// Invalid / unset.
    Invalid = 0,
    /// Configuration image (mainboard erases flash before the first
    /// chunk, which takes seconds).
    Config = 1,
    /// Mainboard (CN) MCU application.
    CnMcu = 2,
    /// Switch MCU application.
    SwMcu = 3,
    /// LED driver MCU application.
    DrMcu = 4,
    /// Gateway MCU application.
    GwMcu = 5,
}

impl BinaryKind {
    /// Whether this is the configuration image type.
    pub fn is_config(self) -> bool {
        self == Self::Config
    }
}

impl TryFrom<u8> for BinaryKind {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::Config),
            2 => Ok(Self::CnMcu),
            3 => Ok(Self::SwMcu),
            4 => Ok(Self::DrMcu),
            5 => Ok(Self::GwMcu),
            v => Err(FrameError::UnknownBinaryKind(v)),
        }
    }
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Config => "config",
            Self::CnMcu => "cn-mcu",
            Self::SwMcu => "sw-mcu",
            Self::DrMcu => "dr-mcu",
            Self::GwMcu => "gw-mcu",
        };
        f.write_str(name)
    }
}

/// Firmware version as packed on the wire.
///
/// The mainboard packs this as bitfields: `major:8`, `minor:8`,
/// `ci:29`, `branch_id:3` — six bytes total, with `ci` and `branch_id`
/// sharing one little-endian `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// CI build number (29 bits).
    pub ci: u32,
    /// Git branch identifier (3 bits).
    pub branch_id: u8,
}

impl FirmwareVersion {
    /// Create a version with zero CI build and branch fields.
    pub fn new(major: u8, minor: u8) -> Self {
        Self {
            major,
            minor,
            ci: 0,
            branch_id: 0,
        }
    }

    /// Pack into the 6-byte wire representation.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.major);
        out.push(self.minor);
        let packed = (self.ci & 0x1FFF_FFFF) | (u32::from(self.branch_id & 0x07) << 29);
        out.write_u32::<LittleEndian>(packed)
            .expect("writing to Vec cannot fail");
    }

    /// Unpack from the 6-byte wire representation.
    pub fn decode(bytes: &[u8; VERSION_LEN]) -> Self {
        let packed = LittleEndian::read_u32(&bytes[2..6]);
        Self {
            major: bytes[0],
            minor: bytes[1],
            ci: packed & 0x1FFF_FFFF,
            branch_id: ((packed >> 29) & 0x07) as u8,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-{}",
            self.major, self.minor, self.ci, self.branch_id
        )
    }
}

/// Error parsing a [`FirmwareVersion`] from a string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version string: {0:?} (expected MAJOR.MINOR[.CI[.BRANCH]])")]
pub struct VersionParseError(String);

impl FromStr for FirmwareVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, VersionParseError> {
        let bad = || VersionParseError(s.to_string());
        let mut parts = s.split('.');
        let major = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let minor = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let ci = match parts.next() {
            Some(p) => p.parse().map_err(|_| bad())?,
            None => 0,
        };
        let branch_id: u8 = match parts.next() {
            Some(p) => p.parse().map_err(|_| bad())?,
            None => 0,
        };
        if parts.next().is_some() || ci > 0x1FFF_FFFF || branch_id > 7 {
            return Err(bad());
        }
        Ok(Self {
            major,
            minor,
            ci,
            branch_id,
        })
    }
}

/// Package header of one sub-binary inside a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Target MCU / image type.
    pub kind: BinaryKind,
    /// Version of this sub-binary.
    pub version: FirmwareVersion,
    /// Payload size in bytes.
    pub size: u32,
    /// CRC-32 over the full payload.
    pub crc32: u32,
}

impl PackageHeader {
    /// Pack into the 15-byte wire representation.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.kind as u8);
        self.version.encode_into(out);
        out.write_u32::<LittleEndian>(self.size)
            .expect("writing to Vec cannot fail");
        out.write_u32::<LittleEndian>(self.crc32)
            .expect("writing to Vec cannot fail");
    }

    /// Unpack from the wire representation.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, FrameError> {
        if bytes.len() < PACKAGE_HEADER_LEN {
            return Err(FrameError::Truncated(bytes.len()));
        }
        let mut version = [0u8; VERSION_LEN];
        version.copy_from_slice(&bytes[1..7]);
        Ok(Self {
            kind: BinaryKind::try_from(bytes[0])?,
            version: FirmwareVersion::decode(&version),
            size: LittleEndian::read_u32(&bytes[7..11]),
            crc32: LittleEndian::read_u32(&bytes[11..15]),
        })
    }
}

/// Crypto block preceding each sub-binary payload.
///
/// Signing is not implemented yet; all fields are zero-filled
/// placeholders kept for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoBlock {
    /// ECDSA signature placeholder.
    pub ecdsa: [u8; 64],
    /// Random nonce placeholder.
    pub random: [u8; 32],
    /// Padding to 128 bytes.
    pub padding: [u8; 32],
}

impl Default for CryptoBlock {
    fn default() -> Self {
        Self {
            ecdsa: [0; 64],
            random: [0; 32],
            padding: [0; 32],
        }
    }
}

impl CryptoBlock {
    /// Pack into the 128-byte wire representation.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ecdsa);
        out.extend_from_slice(&self.random);
        out.extend_from_slice(&self.padding);
    }

    /// Unpack from the wire representation.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, FrameError> {
        if bytes.len() < CRYPTO_BLOCK_LEN {
            return Err(FrameError::Truncated(bytes.len()));
        }
        let mut block = Self::default();
        block.ecdsa.copy_from_slice(&bytes[..64]);
        block.random.copy_from_slice(&bytes[64..96]);
        block.padding.copy_from_slice(&bytes[96..128]);
        Ok(block)
    }
}

/// One OTA message, tagged by command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaMessage {
    /// Announces a new distribution: release version + binary count.
    /// The mainboard resets its download state on receipt.
    FileHeaderInfo {
        /// Distribution release version.
        release: FirmwareVersion,
        /// Number of sub-binaries that will follow.
        count: u8,
    },
    /// Announces the next sub-binary.
    PackageHeaderInfo(PackageHeader),
    /// Crypto block for the announced sub-binary.
    CryptoInfo(CryptoBlock),
    /// Up to 128 bytes of payload data.
    BinaryData(Vec<u8>),
    /// Status report (mainboard → gateway only).
    Status(OtaStatus),
}

impl OtaMessage {
    /// The command tag of this message.
    pub fn command(&self) -> OtaCommand {
        match self {
            Self::FileHeaderInfo { .. } => OtaCommand::FileHeaderInfo,
            Self::PackageHeaderInfo(_) => OtaCommand::PackageHeaderInfo,
            Self::CryptoInfo(_) => OtaCommand::CryptoInfo,
            Self::BinaryData(_) => OtaCommand::BinaryData,
            Self::Status(_) => OtaCommand::Status,
        }
    }

    /// Encode into a complete wire frame (header + payload + trailer CRC).
    ///
    /// # Panics
    ///
    /// Panics if a `BinaryData` chunk exceeds [`MAX_BINARY_CHUNK`];
    /// senders chunk payloads before constructing messages.
    #[allow(clippy::cast_possible_truncation)] // payload is always < 64 KiB
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(CRYPTO_BLOCK_LEN + 2);
        payload.push(self.command() as u8);

        match self {
            Self::FileHeaderInfo { release, count } => {
                release.encode_into(&mut payload);
                payload.push(*count);
            },
            Self::PackageHeaderInfo(header) => {
                header.encode_into(&mut payload);
            },
            Self::CryptoInfo(block) => {
                block.encode_into(&mut payload);
            },
            Self::BinaryData(data) => {
                assert!(
                    data.len() <= MAX_BINARY_CHUNK,
                    "binary chunk exceeds {MAX_BINARY_CHUNK} bytes"
                );
                payload.extend_from_slice(data);
            },
            Self::Status(status) => {
                payload.push(*status as u8);
            },
        }

        // Trailer CRC over [command .. last field byte].
        let trailer = crc8(&payload);
        payload.push(trailer);

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.push(HeaderType::OtaCommand as u8);
        frame
            .write_u16::<BigEndian>(payload.len() as u16)
            .expect("writing to Vec cannot fail");
        frame.push(crc8(&frame[..3]));
        frame.extend_from_slice(&payload);
        frame
    }

    /// Decode a complete wire frame.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN + 2 {
            return Err(FrameError::Truncated(bytes.len()));
        }

        let header_type = HeaderType::try_from(bytes[0])?;
        if crc8(&bytes[..3]) != bytes[3] {
            return Err(FrameError::BadHeaderCrc);
        }
        if header_type != HeaderType::OtaCommand {
            return Err(FrameError::UnknownHeaderType(bytes[0]));
        }

        let declared = usize::from(BigEndian::read_u16(&bytes[1..3]));
        let actual = bytes.len() - HEADER_LEN;
        if declared != actual {
            return Err(FrameError::SizeMismatch { declared, actual });
        }

        let payload = &bytes[HEADER_LEN..];
        let (body, trailer) = payload.split_at(payload.len() - 1);
        if crc8(body) != trailer[0] {
            return Err(FrameError::BadTrailerCrc);
        }

        let command = OtaCommand::try_from(body[0])?;
        let fields = &body[1..];
        let expect = |len: usize| -> std::result::Result<(), FrameError> {
            if fields.len() == len {
                Ok(())
            } else {
                Err(FrameError::SizeMismatch {
                    declared: len,
                    actual: fields.len(),
                })
            }
        };

        match command {
            OtaCommand::FileHeaderInfo => {
                expect(VERSION_LEN + 1)?;
                let mut version = [0u8; VERSION_LEN];
                version.copy_from_slice(&fields[..VERSION_LEN]);
                Ok(Self::FileHeaderInfo {
                    release: FirmwareVersion::decode(&version),
                    count: fields[VERSION_LEN],
                })
            },
            OtaCommand::PackageHeaderInfo => {
                expect(PACKAGE_HEADER_LEN)?;
                Ok(Self::PackageHeaderInfo(PackageHeader::decode(fields)?))
            },
            OtaCommand::CryptoInfo => {
                expect(CRYPTO_BLOCK_LEN)?;
                Ok(Self::CryptoInfo(CryptoBlock::decode(fields)?))
            },
            OtaCommand::BinaryData => {
                if fields.len() > MAX_BINARY_CHUNK {
                    return Err(FrameError::Oversize(fields.len()));
                }
                Ok(Self::BinaryData(fields.to_vec()))
            },
            OtaCommand::Status => {
                expect(1)?;
                Ok(Self::Status(OtaStatus::try_from(fields[0])?))
            },
        }
    }
}

/// Read one complete frame from a byte stream.
///
/// Blocks until a full frame arrives or the reader errors. The header
/// is validated before the payload length is trusted, so a corrupt
/// length field cannot cause an oversized read.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    if crc8(&header[..3]) != header[3] {
        return Err(FrameError::BadHeaderCrc.into());
    }
    HeaderType::try_from(header[0])?;

    let payload_len = usize::from(BigEndian::read_u16(&header[1..3]));
    let mut frame = Vec::with_capacity(HEADER_LEN + payload_len);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_LEN + payload_len, 0);
    reader.read_exact(&mut frame[HEADER_LEN..])?;

    Ok(frame)
}
