//! CRC checksum implementations used by the CN⇄GW protocol.
//!
//! Two independent checksums are in play:
//!
//! - **CRC-8** (reflected polynomial 0x31, seed 0): covers every wire
//!   frame header and payload. The mainboard rejects frames whose CRC-8
//!   does not match bit-for-bit, so this implementation must stay
//!   byte-identical to the mainboard's table.
//! - **CRC-32** (STM32 hardware style, polynomial 0x04C11DB7, seed
//!   0xFFFFFFFF): covers a whole sub-binary payload. It matches the
//!   mainboard's hardware CRC unit running in 32-bit word mode, which is
//!   why it consumes little-endian words rather than bytes.

/// Reflected table polynomial for CRC-8 (0x31 bit-reversed).
const CRC8_POLY: u8 = 0x8C;

/// STM32 hardware CRC polynomial.
const CRC32_POLY: u32 = 0x04C11DB7;

/// Build the reflected CRC-8 lookup table at compile time.
const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC8_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC8_TABLE: [u8; 256] = crc8_table();

/// Compute CRC-8 over `data`, continuing from a previous `crc` value.
///
/// Pass `0` as the seed for a fresh calculation.
pub fn crc8_continue(crc: u8, data: &[u8]) -> u8 {
    let mut crc = crc;
    for &byte in data {
        crc = CRC8_TABLE[usize::from(crc ^ byte)];
    }
    crc
}

/// Compute CRC-8 over `data` with the protocol's fixed seed of 0.
pub fn crc8(data: &[u8]) -> u8 {
    crc8_continue(0, data)
}

/// Accumulating CRC-32 matching the mainboard's hardware CRC unit.
///
/// The unit operates on 32-bit words, so input is consumed as
/// little-endian words; trailing bytes that do not fill a word are
/// ignored, exactly as the hardware does when fed whole words only.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Start a new CRC-32 calculation.
    pub fn new() -> Self {
        Self { state: 0xFFFFFFFF }
    }

    /// Accumulate full 32-bit little-endian words from `data`.
    pub fn accumulate(&mut self, data: &[u8]) {
        for word in data.chunks_exact(4) {
            let w = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.state ^= w;
            for _ in 0..32 {
                self.state = if self.state & 0x8000_0000 != 0 {
                    (self.state << 1) ^ CRC32_POLY
                } else {
                    self.state << 1
                };
            }
        }
    }

    /// Finish the calculation and return the CRC value.
    pub fn finish(&self) -> u32 {
        self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC-32 over the full words of `data`.
pub fn crc32_words(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.accumulate(data);
    crc.finish()
}
