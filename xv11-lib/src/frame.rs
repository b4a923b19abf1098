//! XV-11 frame wire format and checksum.
//!
//! A frame is 22 bytes, all multi-byte fields little-endian:
//!
//! | offset | field                                   |
//! |--------|-----------------------------------------|
//! | 0      | start marker, always `0xFA`             |
//! | 1      | index, `0xA0..=0xF9` (90 per revolution)|
//! | 2..4   | speed                                   |
//! | 4..20  | four 4 byte [Reading]s                  |
//! | 20..22 | checksum over bytes 0..20               |
//!
//! See <http://xv11hacking.wikispaces.com/LIDAR+Sensor>.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Total frame length in bytes.
pub const FRAME_LEN: usize = 22;
/// First byte of every frame.
pub const START: u8 = 0xFA;
/// Index of the first frame of a revolution.
pub const INDEX_BASE: u8 = 0xA0;
pub const FRAMES_PER_REVOLUTION: usize = 90;
pub const READINGS_PER_FRAME: usize = 4;
/// Distance code written into readings of a frame that failed its checksum.
pub const CRC_FAILURE: u16 = 0x66;

pub(crate) const INDEX_OFFSET: usize = 1;
pub(crate) const CHECKSUM_OFFSET: usize = 20;

/// Compute the checksum of a frame.
///
/// The first 20 bytes are taken as ten little-endian words, accumulated with a
/// left shift per word, then folded down to 15 bits.
///
/// # Panics
/// If `dat` is shorter than 20 bytes.
#[must_use]
pub fn checksum(dat: &[u8]) -> u16 {
    let acc = dat[..CHECKSUM_OFFSET]
        .chunks_exact(2)
        .fold(0u32, |acc, word| {
            (acc << 1) + u32::from(u16::from_le_bytes([word[0], word[1]]))
        });
    let folded = (acc & 0x7fff) + (acc >> 15);
    (folded & 0x7fff) as u16
}

/// Returns true if the checksum field of `dat` matches the computed checksum.
///
/// # Panics
/// If `dat` is shorter than [FRAME_LEN].
#[must_use]
pub fn is_valid(dat: &[u8]) -> bool {
    embedded_checksum(dat) == checksum(dat)
}

/// Overwrite the checksum field of `dat` with its computed checksum.
///
/// # Panics
/// If `dat` is shorter than [FRAME_LEN].
pub fn patch_checksum(dat: &mut [u8]) {
    let crc = checksum(dat);
    dat[CHECKSUM_OFFSET..FRAME_LEN].copy_from_slice(&crc.to_le_bytes());
}

fn embedded_checksum(dat: &[u8]) -> u16 {
    u16::from_le_bytes([dat[CHECKSUM_OFFSET], dat[CHECKSUM_OFFSET + 1]])
}

/// Zero-based position within a revolution for a raw index byte, or `None` if the
/// byte is outside the revolution range.
#[must_use]
pub fn position(index: u8) -> Option<usize> {
    let pos = usize::from(index.checked_sub(INDEX_BASE)?);
    (pos < FRAMES_PER_REVOLUTION).then_some(pos)
}

/// Calculate the number of frames missing between the `expected` index and the
/// `actual` index that was observed, taking revolution wrap into account.
///
/// `None` if either index is outside the revolution range.
#[must_use]
pub fn missing_frames(actual: u8, expected: u8) -> Option<usize> {
    let actual = position(actual)?;
    let expected = position(expected)?;
    Some((actual + FRAMES_PER_REVOLUTION - expected) % FRAMES_PER_REVOLUTION)
}

/// A single angle sample.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Distance, or an error code when `invalid_data` is set. 14 bits.
    pub distance: u16,
    /// Reported signal strength is lower than expected.
    pub strength_warning: bool,
    /// Distance could not be calculated.
    pub invalid_data: bool,
    pub signal_strength: u16,
}

impl Reading {
    /// Reading length in bytes
    pub const LEN: usize = 4;
    pub const DISTANCE_MASK: u16 = 0x3fff;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        let x = u16::from_le_bytes([dat[0], dat[1]]);
        Some(Reading {
            distance: x & Self::DISTANCE_MASK,
            strength_warning: (x >> 14) & 0x1 == 1,
            invalid_data: (x >> 15) & 0x1 == 1,
            signal_strength: u16::from_le_bytes([dat[2], dat[3]]),
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let x = (self.distance & Self::DISTANCE_MASK)
            | (u16::from(self.strength_warning) << 14)
            | (u16::from(self.invalid_data) << 15);
        let [a, b] = x.to_le_bytes();
        let [c, d] = self.signal_strength.to_le_bytes();
        [a, b, c, d]
    }

    /// The error code carried in the distance field, if this reading is invalid.
    #[must_use]
    pub fn error_code(&self) -> Option<u16> {
        self.invalid_data.then_some(self.distance)
    }

    /// True if this reading was substituted because its frame failed the checksum.
    #[must_use]
    pub fn is_crc_failure(&self) -> bool {
        self.error_code() == Some(CRC_FAILURE)
    }
}

/// One 4-angle slice of a revolution.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Frame {
    pub start: u8,
    /// Raw index byte; `index - INDEX_BASE` is the frame position in the revolution.
    pub index: u8,
    /// Raw rotation speed sample.
    pub speed: u16,
    pub readings: [Reading; READINGS_PER_FRAME],
    pub checksum: u16,
}

impl Frame {
    pub const LEN: usize = FRAME_LEN;

    /// Decode ``dat`` into a ``Frame``, or `None` if not enough bytes.
    ///
    /// No validation is performed, see [is_valid].
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        let mut readings = [Reading::default(); READINGS_PER_FRAME];
        for (i, reading) in readings.iter_mut().enumerate() {
            let start = 4 + i * Reading::LEN;
            *reading = Reading::decode(&dat[start..start + Reading::LEN])?;
        }
        Some(Frame {
            start: dat[0],
            index: dat[INDEX_OFFSET],
            speed: u16::from_le_bytes([dat[2], dat[3]]),
            readings,
            checksum: embedded_checksum(dat),
        })
    }

    /// Encode to wire bytes. The checksum field is written as-is, not recomputed.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut dat = [0u8; FRAME_LEN];
        dat[0] = self.start;
        dat[INDEX_OFFSET] = self.index;
        dat[2..4].copy_from_slice(&self.speed.to_le_bytes());
        for (i, reading) in self.readings.iter().enumerate() {
            let start = 4 + i * Reading::LEN;
            dat[start..start + Reading::LEN].copy_from_slice(&reading.encode());
        }
        dat[CHECKSUM_OFFSET..].copy_from_slice(&self.checksum.to_le_bytes());
        dat
    }

    /// Zero-based position in the revolution, `None` if the index is out of range.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        position(self.index)
    }

    #[must_use]
    pub fn is_revolution_start(&self) -> bool {
        self.index == INDEX_BASE
    }

    /// Replace index and readings of a frame that failed its checksum so garbage
    /// never reaches the consumer.
    pub(crate) fn invalidate(&mut self, index: u8) {
        self.index = index;
        for reading in &mut self.readings {
            reading.invalid_data = true;
            reading.distance = CRC_FAILURE;
        }
    }
}
