use std::io::Read;

use crate::prelude::*;

/// ByteStream is the blocking cursor over the device transport.
///
/// Every read is satisfied completely or fails. A zero-byte read from the transport
/// is reported as [ErrorKind::UnexpectedEof](std::io::ErrorKind::UnexpectedEof) and,
/// like any other I/O failure, surfaces as [Error::Transport].
pub(crate) struct ByteStream<R>
where
    R: Read,
{
    reader: R,
    num_read: usize,
}

impl<R> ByteStream<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        ByteStream {
            reader,
            num_read: 0,
        }
    }

    /// Fill `buf` entirely from the transport.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        self.num_read += buf.len();
        Ok(())
    }

    /// Consume and drop `count` bytes using `scratch` as the read buffer.
    ///
    /// Whole `scratch` sized chunks are read while more than a chunk remains, then
    /// the final partial amount.
    pub fn discard(&mut self, count: usize, scratch: &mut [u8]) -> Result<()> {
        let mut remaining = count;
        while remaining > scratch.len() {
            self.fill(scratch)?;
            remaining -= scratch.len();
        }
        self.fill(&mut scratch[..remaining])
    }

    /// Total number of bytes consumed from the transport.
    pub fn offset(&self) -> usize {
        self.num_read
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
