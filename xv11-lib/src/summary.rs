#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::decoder::{DecodedBatch, Event, Status};

/// Tracks stats on decoded batches.
///
/// # Example
/// ```no_run
/// use xv11::{initialize, Summary};
///
/// let tty = std::fs::File::open("/dev/ttyS0").unwrap();
/// let mut summary = Summary::default();
/// for batch in initialize(tty, 10, 5).unwrap().batches().map_while(Result::ok) {
///     summary.add(&batch);
/// }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Summary {
    pub batches: usize,
    pub frames: usize,
    /// Frames that started a revolution.
    pub revolutions: usize,
    pub crc_failures: usize,
    /// Number of times the sensor skipped frames.
    pub skips: usize,
    /// Total frames missing as implied by skips with in-range indexes.
    pub missing: usize,
    /// Batches that reported a synchronization loss.
    pub sync_lost: usize,
    /// Readings flagged invalid, including those replaced due to checksum failures.
    pub invalid_readings: usize,
    pub low_strength_readings: usize,
}

impl Summary {
    pub fn add(&mut self, batch: &DecodedBatch) {
        self.batches += 1;
        if batch.status == Status::SynchronizationLost {
            self.sync_lost += 1;
        }

        for frame in &batch.frames {
            self.frames += 1;
            if frame.is_revolution_start() {
                self.revolutions += 1;
            }
            for reading in &frame.readings {
                if reading.invalid_data {
                    self.invalid_readings += 1;
                }
                if reading.strength_warning {
                    self.low_strength_readings += 1;
                }
            }
        }

        for event in &batch.events {
            match event {
                Event::ChecksumFailure { .. } => self.crc_failures += 1,
                Event::FramesSkipped { missing, .. } => {
                    self.skips += 1;
                    self.missing += missing.unwrap_or_default();
                }
                Event::SyncLost { .. } => {}
            }
        }
    }
}
