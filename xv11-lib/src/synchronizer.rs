use std::io::Read;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::bytes::ByteStream;
use crate::frame::{self, FRAMES_PER_REVOLUTION, FRAME_LEN, INDEX_OFFSET, START};
use crate::prelude::*;

/// Default number of consecutive frames that must pass their checksum before the
/// stream is considered aligned.
pub const REQUIRED_SYNC_FRAMES: usize = 45;

/// A synchronized stream location.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Lock {
    /// Index of the last frame validated during synchronization.
    pub index: u8,
    /// Stream offset of the first byte of the next revolution's index 0 frame.
    pub offset: usize,
    /// Number of candidate alignments rejected before locking.
    pub restarts: usize,
}

/// Synchronizer locates frame boundaries in a stream with no out-of-band framing.
///
/// A start marker byte is only a candidate; the frame it starts must pass its checksum,
/// followed by a run of consecutive valid frames. On success the stream is advanced to
/// the start of the next revolution.
pub(crate) struct Synchronizer<'a, R>
where
    R: Read,
{
    stream: &'a mut ByteStream<R>,
    // Number of consecutive valid frames, including the first, required to lock
    required: usize,
    // One frame of working data
    window: [u8; FRAME_LEN],
    restarts: usize,
}

impl<'a, R> Synchronizer<'a, R>
where
    R: Read,
{
    pub fn new(stream: &'a mut ByteStream<R>, required: usize) -> Self {
        Synchronizer {
            stream,
            required,
            window: [0u8; FRAME_LEN],
            restarts: 0,
        }
    }

    /// Read windows until one can be aligned on a start marker and passes its checksum.
    fn scan(&mut self) -> Result<()> {
        loop {
            self.stream.fill(&mut self.window)?;

            let Some(idx) = self.window.iter().position(|b| *b == START) else {
                trace!(offset = self.stream.offset(), "no start marker in window");
                continue;
            };

            if idx > 0 {
                // shift the partial frame to the front and read the rest of it
                self.window.copy_within(idx.., 0);
                self.stream.fill(&mut self.window[FRAME_LEN - idx..])?;
            }

            if frame::is_valid(&self.window) {
                return Ok(());
            }
            self.restarts += 1;
            trace!(
                offset = self.stream.offset(),
                "start marker candidate failed checksum"
            );
        }
    }

    /// Check the frames immediately following the scanned frame. Returns false at the
    /// first frame that does not start with a marker or fails its checksum.
    fn confirm(&mut self) -> Result<bool> {
        for num in 1..self.required {
            self.stream.fill(&mut self.window)?;
            if self.window[0] != START || !frame::is_valid(&self.window) {
                debug!(
                    offset = self.stream.offset(),
                    "sync run broken after {num} frames"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run the synchronization protocol to completion.
    ///
    /// `scratch` is used to discard bytes up to the next revolution boundary; it is
    /// expected to be the size of a decode batch.
    ///
    /// # Errors
    /// [Error::Transport] if the stream fails at any point. The stream position is
    /// undefined afterward.
    pub fn lock(mut self, scratch: &mut [u8]) -> Result<Lock> {
        loop {
            self.scan()?;
            if !self.confirm()? {
                self.restarts += 1;
                continue;
            }

            let index = self.window[INDEX_OFFSET];
            let Some(position) = frame::position(index) else {
                debug!(index, "sync run ended on out of range index");
                self.restarts += 1;
                continue;
            };

            let remaining = (FRAMES_PER_REVOLUTION - 1 - position) * FRAME_LEN;
            self.stream.discard(remaining, scratch)?;

            let lock = Lock {
                index,
                offset: self.stream.offset(),
                restarts: self.restarts,
            };
            debug!(?lock, "synchronized");
            return Ok(lock);
        }
    }
}
