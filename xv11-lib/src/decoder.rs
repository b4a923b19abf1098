use std::io::Read;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, span, warn, Level};
use typed_builder::TypedBuilder;

use super::bytes::ByteStream;
use super::synchronizer::{Lock, Synchronizer, REQUIRED_SYNC_FRAMES};
use crate::frame::{self, Frame, FRAMES_PER_REVOLUTION, FRAME_LEN, INDEX_BASE, START};
use crate::prelude::*;

// Index of the last frame in a revolution
const LAST_INDEX: u8 = INDEX_BASE + (FRAMES_PER_REVOLUTION - 1) as u8;

/// The index expected after `index`, wrapping to the start of the revolution.
fn next_index(index: u8) -> u8 {
    match index.checked_add(1) {
        Some(next) if next <= LAST_INDEX => next,
        _ => INDEX_BASE,
    }
}

/// Options used for synchronization and decoding.
///
/// # Example
/// ```
/// use xv11::DecoderOpts;
///
/// let opts = DecoderOpts::builder()
///     .frames_per_read(10)
///     .crc_tolerance_percent(5)
///     .build();
/// assert_eq!(opts.crc_tolerance(), 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecoderOpts {
    /// Number of frames read from the stream per decode cycle.
    #[builder(default = 1)]
    pub frames_per_read: usize,
    /// Percent of a revolution's frames that may fail their checksum before
    /// synchronization is considered lost, 0 to 100.
    #[builder(default = 10)]
    pub crc_tolerance_percent: u8,
    /// Number of consecutive valid frames required to synchronize.
    #[builder(default = REQUIRED_SYNC_FRAMES)]
    pub sync_frames: usize,
}

impl Default for DecoderOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DecoderOpts {
    /// Create options with the default number of sync frames.
    #[must_use]
    pub fn new(frames_per_read: usize, crc_tolerance_percent: u8) -> Self {
        Self::builder()
            .frames_per_read(frames_per_read)
            .crc_tolerance_percent(crc_tolerance_percent)
            .build()
    }

    /// Maximum number of checksum failures tolerated per revolution.
    #[must_use]
    pub fn crc_tolerance(&self) -> usize {
        usize::from(self.crc_tolerance_percent) * FRAMES_PER_REVOLUTION / 100
    }

    fn validate(&self) -> Result<()> {
        if self.frames_per_read == 0 {
            return Err(Error::InvalidConfig(
                "frames_per_read must be at least 1".to_string(),
            ));
        }
        if self.crc_tolerance_percent > 100 {
            return Err(Error::InvalidConfig(format!(
                "crc_tolerance_percent={} must be in 0..=100",
                self.crc_tolerance_percent
            )));
        }
        if self.sync_frames == 0 {
            return Err(Error::InvalidConfig(
                "sync_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Frame alignment state of a [Decoder].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SyncState {
    Unsynchronized,
    /// Scanning the stream for frame boundaries.
    Synchronizing,
    /// Frame boundaries are trusted; frames are only checked by checksum.
    Locked,
    /// The checksum failure budget was exceeded. Decoding still works, but alignment
    /// is suspect until [Decoder::synchronize] is called.
    Lost,
}

/// Result of a decode cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Status {
    Success,
    /// More frames failed their checksum within a revolution than tolerated.
    SynchronizationLost,
}

/// Notifications produced while decoding a batch.
///
/// `position` is the zero-based frame position within the batch.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Event {
    /// The frame failed its checksum or start marker check and was replaced.
    ChecksumFailure {
        position: usize,
        /// The predicted index written into the replaced frame.
        index: u8,
        /// Failures so far in this revolution, including this one.
        failures: usize,
    },
    /// The observed index was not the one expected; the sensor dropped frames.
    FramesSkipped {
        position: usize,
        expected: u8,
        actual: u8,
        /// Frames missing between expected and actual, if both are in range.
        missing: Option<usize>,
    },
    /// The failure budget was first exceeded in this batch at `position`.
    SyncLost { position: usize, failures: usize },
}

/// The frames decoded in one cycle.
///
/// Frames that failed their checksum are present, with their readings replaced by
/// [frame::CRC_FAILURE] codes, so there are always `frames_per_read` frames.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedBatch {
    pub frames: Vec<Frame>,
    pub status: Status,
    pub events: Vec<Event>,
}

/// Synchronizes with and decodes frames from an XV-11 byte stream.
///
/// The reader is expected to block until data is available, e.g., a tty configured
/// for raw 115200 baud input. Any read failure, including end-of-stream, is fatal.
///
/// # Example
/// ```no_run
/// use std::fs::File;
/// use xv11::{Decoder, DecoderOpts, Status};
///
/// let tty = File::open("/dev/ttyS0").unwrap();
/// let mut decoder = Decoder::new(tty, DecoderOpts::new(10, 5)).unwrap();
/// loop {
///     let batch = decoder.decode_batch().unwrap();
///     if batch.status == Status::SynchronizationLost {
///         decoder.synchronize().unwrap();
///     }
/// }
/// ```
pub struct Decoder<R>
where
    R: Read,
{
    stream: ByteStream<R>,
    opts: DecoderOpts,
    crc_tolerance: usize,
    crc_failures: usize,
    expected_index: u8,
    state: SyncState,
    lock: Option<Lock>,
    buf: Vec<u8>,
}

/// Initialize a [Decoder] with the default number of sync frames.
///
/// # Errors
/// [Error::InvalidConfig] for invalid arguments, [Error::Transport] if reading fails
/// during synchronization.
pub fn initialize<R>(
    reader: R,
    frames_per_read: usize,
    crc_tolerance_percent: u8,
) -> Result<Decoder<R>>
where
    R: Read,
{
    Decoder::new(reader, DecoderOpts::new(frames_per_read, crc_tolerance_percent))
}

impl<R> Decoder<R>
where
    R: Read,
{
    /// Create a new decoder and synchronize with the stream.
    ///
    /// # Errors
    /// [Error::InvalidConfig] if `opts` are not valid, [Error::Transport] if reading
    /// fails during synchronization.
    pub fn new(reader: R, opts: DecoderOpts) -> Result<Self> {
        opts.validate()?;
        let mut decoder = Decoder {
            stream: ByteStream::new(reader),
            crc_tolerance: opts.crc_tolerance(),
            crc_failures: 0,
            expected_index: LAST_INDEX,
            state: SyncState::Unsynchronized,
            lock: None,
            buf: vec![0u8; opts.frames_per_read * FRAME_LEN],
            opts,
        };
        decoder.synchronize()?;
        Ok(decoder)
    }

    /// (Re-)run the synchronization protocol.
    ///
    /// Failure counts and index expectations are reset and the stream is advanced to the
    /// start of the next revolution.
    ///
    /// # Errors
    /// [Error::Transport] if reading fails, after which the decoder is unsynchronized.
    pub fn synchronize(&mut self) -> Result<Lock> {
        self.state = SyncState::Synchronizing;
        self.lock = None;
        let zult = Synchronizer::new(&mut self.stream, self.opts.sync_frames).lock(&mut self.buf);
        let lock = match zult {
            Ok(lock) => lock,
            Err(err) => {
                self.state = SyncState::Unsynchronized;
                return Err(err);
            }
        };
        self.crc_failures = 0;
        self.expected_index = LAST_INDEX;
        self.state = SyncState::Locked;
        self.lock = Some(lock.clone());
        Ok(lock)
    }

    /// Read and decode `frames_per_read` frames.
    ///
    /// Frame boundaries are not re-scanned; each frame is checked by its start marker
    /// and checksum only. Invalid frames are replaced, see [DecodedBatch].
    ///
    /// # Errors
    /// [Error::Transport] if reading fails. Checksum failures are not errors, they are
    /// reported through [DecodedBatch::status] and [DecodedBatch::events].
    pub fn decode_batch(&mut self) -> Result<DecodedBatch> {
        self.stream.fill(&mut self.buf)?;

        let mut status = Status::Success;
        let mut frames = Vec::with_capacity(self.opts.frames_per_read);
        let mut events = Vec::default();

        for (position, dat) in self.buf.chunks_exact(FRAME_LEN).enumerate() {
            self.expected_index = next_index(self.expected_index);
            let span = span!(
                Level::TRACE,
                "frame",
                position,
                expected = self.expected_index
            );
            let _guard = span.enter();

            let Some(mut frame) = Frame::decode(dat) else {
                unreachable!("chunks are exactly one frame long");
            };

            if frame.start != START || !frame::is_valid(dat) {
                self.crc_failures += 1;
                debug!(failures = self.crc_failures, "frame checksum failed");
                if self.crc_failures > self.crc_tolerance && status == Status::Success {
                    warn!(
                        failures = self.crc_failures,
                        tolerance = self.crc_tolerance,
                        "checksum failures exceeded tolerance; synchronization lost"
                    );
                    status = Status::SynchronizationLost;
                    events.push(Event::SyncLost {
                        position,
                        failures: self.crc_failures,
                    });
                }
                frame.invalidate(self.expected_index);
                events.push(Event::ChecksumFailure {
                    position,
                    index: self.expected_index,
                    failures: self.crc_failures,
                });
            }

            // The tolerance budget is per revolution
            if frame.is_revolution_start() {
                self.crc_failures = 0;
            }

            if frame.index != self.expected_index {
                let missing = frame::missing_frames(frame.index, self.expected_index);
                debug!(actual = frame.index, ?missing, "lidar skipped frames");
                events.push(Event::FramesSkipped {
                    position,
                    expected: self.expected_index,
                    actual: frame.index,
                    missing,
                });
                self.expected_index = frame.index;
            }

            frames.push(frame);
        }

        if status == Status::SynchronizationLost {
            self.state = SyncState::Lost;
        }

        Ok(DecodedBatch {
            frames,
            status,
            events,
        })
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Lock information from the most recent successful synchronization.
    #[must_use]
    pub fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }

    #[must_use]
    pub fn opts(&self) -> &DecoderOpts {
        &self.opts
    }

    /// Checksum failures since the last revolution start.
    #[must_use]
    pub fn crc_failures(&self) -> usize {
        self.crc_failures
    }

    /// Maximum checksum failures tolerated per revolution.
    #[must_use]
    pub fn crc_tolerance(&self) -> usize {
        self.crc_tolerance
    }

    /// Index of the most recently decoded frame, i.e., the index the next frame is
    /// expected to follow.
    #[must_use]
    pub fn expected_index(&self) -> u8 {
        self.expected_index
    }

    /// Total bytes consumed from the stream.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.stream.offset()
    }

    /// Release decode buffers and return the underlying reader.
    pub fn shutdown(self) -> R {
        self.stream.into_inner()
    }

    /// Iterate over decoded batches until the stream fails.
    pub fn batches(self) -> Batches<R> {
        Batches {
            decoder: self,
            done: false,
        }
    }
}

impl<R> IntoIterator for Decoder<R>
where
    R: Read,
{
    type Item = Result<DecodedBatch>;
    type IntoIter = Batches<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches()
    }
}

/// Iterates over [DecodedBatch]es. Created using [Decoder::batches].
///
/// ## Errors
/// A transport error is yielded once, after which the iterator ends.
pub struct Batches<R>
where
    R: Read,
{
    decoder: Decoder<R>,
    done: bool,
}

impl<R> Batches<R>
where
    R: Read,
{
    /// Access the decoder, e.g., to re-synchronize after a synchronization loss.
    pub fn decoder(&mut self) -> &mut Decoder<R> {
        &mut self.decoder
    }

    pub fn into_inner(self) -> Decoder<R> {
        self.decoder
    }
}

impl<R> Iterator for Batches<R>
where
    R: Read,
{
    type Item = Result<DecodedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let zult = self.decoder.decode_batch();
        if zult.is_err() {
            self.done = true;
        }
        Some(zult)
    }
}
