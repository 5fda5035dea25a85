use std::io;

use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Longest line accepted by default, excluding the CRLF terminator.
pub const DEFAULT_MAX_LINE: usize = 1024;

/// Provides a facility to read CRLF-terminated lines from a stream, refusing
/// lines longer than a configured limit.
pub struct LineReader<T: AsyncRead + Unpin> {
    /// Stores data that's been read in but lacks a CRLF.
    buf: BytesMut,
    /// Index in buf from which a valid CRLF pair may appear (and before which
    /// a CRLF sequence hasn't been seen).
    maybe_crlf_from: usize,
    /// Data source
    reader: T,
    /// On a reading error, this field is set and its value returned once the
    /// buffer is drained of pending lines.
    pending_error: Option<io::Error>,
    /// Longest line, without CRLF, that `read_line` will return.
    max_line: usize,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    pub fn with_limit(reader: T, max_line: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            maybe_crlf_from: 0,
            reader,
            pending_error: None,
            max_line,
        }
    }

    /// Reads a line from the internal buffer and/or reader. On an end-of-stream
    /// condition, returns a None result, discarding any partly-read line in the
    /// internal buffer.
    ///
    /// This function is cancel-safe: its only async operation is a `read_buf`
    /// against the internal `reader`, and so it has the same guarantees:
    /// either a complete read occurs and is processed, or this is cancelled.
    ///
    /// If more than `max_line` bytes arrive without a CRLF, an `InvalidData`
    /// error is returned. The stream can't be resynchronised after that, so
    /// callers should drop the connection.
    ///
    /// On a read error, the error value is returned after processing all
    /// pending lines in the internal buffer, but calling `read_line` again will
    /// attempt a new read safely.
    pub async fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            // Scan from one byte before the newest data in case a \r arrived
            // at the end of the previous read and its \n at the start of this
            // one. Only the unscanned tail is examined, so total work stays
            // O(bytes_read).
            if let Some(eoc) = self
                .buf
                .iter()
                .skip(self.maybe_crlf_from)
                .tuple_windows::<(_, _)>()
                .position(|x| x == (&b'\r', &b'\n'))
            {
                let end = self.maybe_crlf_from + eoc;
                self.maybe_crlf_from = 0;

                if end > self.max_line {
                    return Err(too_long(self.max_line));
                }

                // Freeze the line to make it read-only and drop the CRLF.
                let line = self.buf.split_to(end + 2).freeze();
                return Ok(Some(line.slice(0..end)));
            }

            // No terminator yet. A lone trailing \r may still be the start of
            // one, so allow a single extra byte before giving up.
            if self.buf.len() > self.max_line + 1 {
                return Err(too_long(self.max_line));
            }

            let n_bytes_read =
                match self.reader.read_buf(&mut self.buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        self.pending_error = Some(e);
                        0
                    },
                };

            // Point maybe_crlf_from at the byte before the first byte returned
            // by this read_buf call (or 0 if buf is otherwise empty).
            self.maybe_crlf_from =
                self.buf.len().saturating_sub(n_bytes_read + 1);

            // Zero bytes read means end-of-stream: no further line can be
            // parsed, so surface any pending error.
            if n_bytes_read == 0 {
                return match self.pending_error.take() {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            }
        }
    }
}

fn too_long(max_line: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line exceeds {max_line} bytes"),
    )
}

impl<T: AsyncRead + Unpin> From<T> for LineReader<T> {
    fn from(value: T) -> Self {
        Self::with_limit(value, DEFAULT_MAX_LINE)
    }
}
