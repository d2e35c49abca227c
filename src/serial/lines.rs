//! Newline framing for the raw serial byte stream.

use futures_util::Stream;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RelayError, Result};

const READ_BUFFER_SIZE: usize = 1024;

/// longest line kept; longer input is dropped up to its next `\n`
pub const MAX_LINE_LEN: usize = 4096;

/// Reassembles `\n`-terminated lines from arbitrary read chunks.
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
    /// bytes of `buffer` already known to hold no `\n`
    scanned: usize,
    /// inside an overlong line, dropping until its terminator
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        LineReader {
            reader,
            buffer: Vec::with_capacity(READ_BUFFER_SIZE),
            scanned: 0,
            discarding: false,
        }
    }

    /// Next complete line without its terminator.
    ///
    /// A trailing `\r` is stripped as well. `Ok(None)` means the device
    /// closed the stream; an unterminated tail is discarded. Lines longer
    /// than [`MAX_LINE_LEN`] are skipped.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut chunk = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            let read = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(|e| RelayError::port_read(e.to_string()))?;
            if read == 0 {
                if !self.buffer.is_empty() {
                    debug!("Dropping {} unterminated bytes at end of stream", self.buffer.len());
                    self.buffer.clear();
                }
                self.scanned = 0;
                self.discarding = false;
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Lazy sequence of lines, ending at end of stream or on the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> {
        futures_util::stream::try_unfold(self, |mut reader| async move {
            Ok::<_, RelayError>(reader.next_line().await?.map(|line| (line, reader)))
        })
    }

    fn take_line(&mut self) -> Option<String> {
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buffer.len();
                if self.discarding || self.buffer.len() > MAX_LINE_LEN {
                    self.start_discarding();
                    self.buffer.clear();
                    self.scanned = 0;
                }
                return None;
            };
            let end = self.scanned + offset;
            let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            frame.pop();
            if std::mem::take(&mut self.discarding) {
                debug!("Skipped the rest of an overlong line");
                continue;
            }
            if frame.len() > MAX_LINE_LEN {
                warn!("Skipping a {} byte serial line", frame.len());
                continue;
            }
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
            return Some(String::from_utf8_lossy(&frame).into_owned());
        }
    }

    fn start_discarding(&mut self) {
        if !self.discarding {
            warn!("No line terminator within {MAX_LINE_LEN} bytes, skipping input until the next one");
            self.discarding = true;
        }
    }
}
