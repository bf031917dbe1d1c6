//! JSON Lines framing for [`Envelope`] streams.
//!
//! Each envelope occupies one `\n`-terminated line of at most
//! [`MAX_FRAME_BYTES`] bytes. Blank lines are ignored so tools may pad
//! interactive sessions.

use std::io::{self, BufRead, BufReader, Read, Write};

use thiserror::Error;

use crate::frame::Envelope;

/// Largest accepted line, newline included.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Errors raised while framing envelopes.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A line was not a valid envelope.
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    /// A line exceeded the size limit; the stream is no longer aligned.
    #[error("frame too large: {size} bytes exceeds {max} byte limit")]
    TooLarge {
        /// Bytes read before giving up.
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// Reading or writing the stream failed.
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),
    /// An envelope could not be serialised.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

impl FrameError {
    /// Reports whether the stream can still yield further frames.
    ///
    /// Decode failures only spoil one line; size and I/O failures leave the
    /// stream unusable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Reads envelopes from a byte stream, one per line.
///
/// The reader yields `None` at end of stream and stops after the first
/// unrecoverable error.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    max: usize,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a stream using [`MAX_FRAME_BYTES`] as the line limit.
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_FRAME_BYTES)
    }

    /// Wraps a stream with a custom line limit.
    pub fn with_limit(inner: R, max: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: Vec::new(),
            max,
            finished: false,
        }
    }

    /// Reads the next envelope, skipping blank lines.
    ///
    /// A final line without a trailing newline is still decoded.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] for oversized lines,
    /// [`FrameError::Decode`] for malformed ones and [`FrameError::Io`] when
    /// the stream fails.
    pub fn read_frame(&mut self) -> Result<Option<Envelope>, FrameError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            self.line.clear();
            let limit = u64::try_from(self.max.saturating_add(1)).unwrap_or(u64::MAX);
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.line);
            let bytes = match read {
                Ok(bytes) => bytes,
                Err(error) => {
                    self.finished = true;
                    return Err(FrameError::Io(error));
                }
            };
            if bytes == 0 {
                self.finished = true;
                return Ok(None);
            }
            if self.line.len() > self.max {
                self.finished = true;
                return Err(FrameError::TooLarge {
                    size: self.line.len(),
                    max: self.max,
                });
            }
            let trimmed = self.line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_slice(trimmed)
                .map(Some)
                .map_err(FrameError::Decode);
        }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Envelope, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

/// Serialises an envelope as one line and flushes the writer.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialisation fails,
/// [`FrameError::TooLarge`] if the line would exceed [`MAX_FRAME_BYTES`] and
/// [`FrameError::Io`] if writing fails.
pub fn write_frame<W: Write>(writer: &mut W, envelope: &Envelope) -> Result<(), FrameError> {
    let mut line = serde_json::to_vec(envelope).map_err(FrameError::Encode)?;
    line.push(b'\n');
    if line.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}
