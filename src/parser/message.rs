//! In-memory RFC 5322 messages (no MBOX framing), e.g. `.eml` files or a
//! message just appended to a folder.

use std::path::Path;

use crate::error::{Result, SummaryError};
use crate::parser::header::RawHeaders;

/// A complete message held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeMessage {
    raw: Vec<u8>,
    header_end: usize,
    body_start: usize,
}

impl MimeMessage {
    /// Wrap raw message bytes. A message with no blank line is all headers.
    pub fn parse(raw: Vec<u8>) -> Self {
        let (header_end, body_start) = match find_header_end(&raw) {
            Some((end, sep_len)) => (end, end + sep_len),
            None => (raw.len(), raw.len()),
        };
        Self {
            raw,
            header_end,
            body_start,
        }
    }

    /// Read a message from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| SummaryError::io(path, e))?;
        Ok(Self::parse(data))
    }

    /// Raw header block, including the final line ending.
    pub fn header_bytes(&self) -> &[u8] {
        &self.raw[..self.header_end]
    }

    pub fn headers(&self) -> RawHeaders {
        RawHeaders::parse(self.header_bytes())
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[self.body_start..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Total size in bytes, saturated to `u32`.
    pub fn size(&self) -> u32 {
        u32::try_from(self.raw.len()).unwrap_or(u32::MAX)
    }
}

/// Locate the blank line ending the headers.
///
/// Returns the offset just past the last header line's newline and the
/// length of the blank line (`\n` or `\r\n`).
fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    if data.starts_with(b"\r\n") {
        return Some((0, 2));
    }
    if data.starts_with(b"\n") {
        return Some((0, 1));
    }
    let mut i = 0;
    while let Some(pos) = data[i..].iter().position(|&b| b == b'\n') {
        let line_end = i + pos + 1;
        let rest = &data[line_end..];
        if rest.starts_with(b"\r\n") {
            return Some((line_end, 2));
        }
        if rest.starts_with(b"\n") {
            return Some((line_end, 1));
        }
        i = line_end;
    }
    None
}
