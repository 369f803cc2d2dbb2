//! Line codec for the serial link
//!
//! Inbound bytes are UTF-8 text split into lines. A line ends at any of:
//! ```text
//! "\n"   "\r\n"   "\r"
//! ```
//! Terminators are not part of the returned line. Invalid UTF-8 is replaced
//! with U+FFFD rather than rejected.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Maximum line length (64 KiB) to prevent memory exhaustion
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Errors that can occur while decoding lines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Line too long: {0} bytes without terminator (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),
}

/// Streaming line decoder
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
    /// Previous line ended with '\r' at the end of the buffer; drop a leading '\n'
    skip_lf: bool,
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            skip_lf: false,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete line from the buffer
    ///
    /// Returns:
    /// - `Ok(Some(line))` if a terminated line was available
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the pending line exceeds [`MAX_LINE_LENGTH`]; that
    ///   line is discarded
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        if self.skip_lf && !self.buffer.is_empty() {
            if self.buffer[0] == b'\n' {
                self.buffer.advance(1);
            }
            self.skip_lf = false;
        }

        let Some(pos) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') else {
            if self.buffer.len() > MAX_LINE_LENGTH {
                let len = self.buffer.len();
                self.buffer.clear();
                return Err(CodecError::LineTooLong(len));
            }
            return Ok(None);
        };

        let line = self.buffer.split_to(pos);
        let terminator = self.buffer[0];
        self.buffer.advance(1);

        if terminator == b'\r' {
            match self.buffer.first() {
                Some(b'\n') => self.buffer.advance(1),
                Some(_) => {}
                None => self.skip_lf = true,
            }
        }

        // Only the oversized line is dropped; later lines stay buffered
        if pos > MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong(pos));
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Flush an unterminated trailing line at end of stream
    pub fn finish(&mut self) -> Option<String> {
        self.skip_lf = false;
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
