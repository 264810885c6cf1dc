//! Streaming MBOX parser.
//!
//! Reads input line-by-line through a `BufRead` and never holds more than
//! one message in memory. The caller drives it with [`MboxParser::step`],
//! which moves between message boundaries:
//!
//! ```text
//! Initial ─step→ Header | Message | Multipart ─step→ Body ─step→ Header … ─step→ Eof
//! ```
//!
//! A record can be decoded whenever the parser sits on a header boundary
//! (`Header`, `Message` or `Multipart`). Tolerant of:
//!
//! - Mixed `\n` and `\r\n` line endings
//! - `From ` lines not preceded by a blank line (logs a warning)
//! - Garbage before the first `From ` line
//! - Truncated messages at EOF
//! - UTF-8 BOM at the start of the file

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, SummaryError};
use crate::parser::header::RawHeaders;

/// Size of the internal read buffer (1 MB for fast sequential reads on modern SSDs).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size kept in memory (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Where the parser currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Nothing read yet.
    Initial,
    /// Headers of a single-part message are available.
    Header,
    /// Headers of a `message/*` message are available.
    Message,
    /// Headers of a `multipart/*` message are available.
    Multipart,
    /// The body of the current message has been consumed.
    Body,
    /// Input exhausted.
    Eof,
}

impl ParserState {
    /// States at which a record can be decoded.
    pub fn is_header_boundary(self) -> bool {
        matches!(
            self,
            ParserState::Header | ParserState::Message | ParserState::Multipart
        )
    }
}

/// Borrowed view of the message the parser is positioned on.
#[derive(Debug, Clone, Copy)]
pub struct ParserPosition<'a> {
    pub state: ParserState,
    /// Raw header block, without the `From ` line and the blank separator.
    pub headers: &'a [u8],
    /// Offset of the message (its `From ` line in an mbox) in the input.
    pub message_offset: u64,
    /// Size of headers plus body, excluding the `From ` line.
    pub message_size: u64,
    /// The `From ` separator line, trimmed.
    pub from_line: Option<&'a str>,
}

/// Streaming MBOX (or single message) parser.
pub struct MboxParser<R> {
    reader: R,
    path: Option<PathBuf>,
    file_size: Option<u64>,
    scan_from: bool,
    state: ParserState,
    offset: u64,
    pending_from: Option<(u64, Vec<u8>)>,
    from_line: Option<String>,
    headers: Vec<u8>,
    body: Vec<u8>,
    message_offset: u64,
    message_size: u64,
    max_message_size: usize,
    line_buf: Vec<u8>,
}

impl MboxParser<BufReader<File>> {
    /// Open an MBOX file for streaming.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| SummaryError::io(&path, e))?;
        let file_size = file.metadata().map_err(|e| SummaryError::io(&path, e))?.len();
        let mut parser = Self::new(BufReader::with_capacity(READ_BUFFER_SIZE, file), true);
        parser.path = Some(path);
        parser.file_size = Some(file_size);
        Ok(parser)
    }
}

impl<R: BufRead> MboxParser<R> {
    /// Wrap a reader. With `scan_from`, the input is an mbox split on
    /// `From ` lines; otherwise it is a single RFC 822 message.
    pub fn new(reader: R, scan_from: bool) -> Self {
        Self {
            reader,
            path: None,
            file_size: None,
            scan_from,
            state: ParserState::Initial,
            offset: 0,
            pending_from: None,
            from_line: None,
            headers: Vec::with_capacity(16 * 1024),
            body: Vec::with_capacity(64 * 1024),
            message_offset: 0,
            message_size: 0,
            max_message_size: MAX_MESSAGE_SIZE,
            line_buf: Vec::with_capacity(4096),
        }
    }

    /// Cap how much of a body is kept in memory. Sizes are still counted in full.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Advance to the next boundary and return the new state.
    pub fn step(&mut self) -> Result<ParserState> {
        self.state = match self.state {
            ParserState::Eof => ParserState::Eof,
            ParserState::Header | ParserState::Message | ParserState::Multipart => ParserState::Body,
            ParserState::Initial | ParserState::Body => self.read_message()?,
        };
        Ok(self.state)
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Borrowed view of the current message.
    pub fn position(&self) -> ParserPosition<'_> {
        ParserPosition {
            state: self.state,
            headers: &self.headers,
            message_offset: self.message_offset,
            message_size: self.message_size,
            from_line: self.from_line.as_deref(),
        }
    }

    /// Raw header block of the current message.
    pub fn headers(&self) -> &[u8] {
        &self.headers
    }

    /// Parsed headers of the current message.
    pub fn raw_headers(&self) -> RawHeaders {
        RawHeaders::parse(&self.headers)
    }

    /// Body bytes kept for the current message (possibly truncated).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn message_offset(&self) -> u64 {
        self.message_offset
    }

    pub fn message_size(&self) -> u64 {
        self.message_size
    }

    /// Bytes consumed from the input so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total input size, when reading from a file.
    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    /// Read one line into `line_buf`. Returns its length, 0 at EOF.
    fn read_line(&mut self) -> Result<usize> {
        self.line_buf.clear();
        // A line may straddle the buffer end; keep reading until newline.
        while !self.line_buf.ends_with(b"\n") {
            let buf = self
                .reader
                .fill_buf()
                .map_err(|e| stream_error(self.path.as_deref(), e))?;
            if buf.is_empty() {
                break; // EOF
            }
            let consume_len = match memchr_newline(buf) {
                Some(pos) => pos + 1,
                None => buf.len(),
            };
            self.line_buf.extend_from_slice(&buf[..consume_len]);
            self.reader.consume(consume_len);
        }
        let total = self.line_buf.len();
        self.offset += total as u64;
        Ok(total)
    }

    fn read_message(&mut self) -> Result<ParserState> {
        self.headers.clear();
        self.body.clear();
        self.from_line = None;
        self.message_size = 0;

        if self.scan_from {
            let (from_offset, from_line) = match self.pending_from.take() {
                Some(pending) => pending,
                None => match self.find_first_separator()? {
                    Some(found) => found,
                    None => return Ok(ParserState::Eof),
                },
            };
            self.message_offset = from_offset;
            self.from_line = Some(String::from_utf8_lossy(strip_bom(&from_line)).trim().to_string());
        } else {
            if self.state != ParserState::Initial {
                return Ok(ParserState::Eof);
            }
            self.message_offset = self.offset;
        }

        // Headers up to the first blank line.
        let mut prev_line_was_empty = false;
        loop {
            let len = self.read_line()?;
            if len == 0 {
                break;
            }
            self.message_size += len as u64;
            if is_blank_line(&self.line_buf) {
                prev_line_was_empty = true;
                break;
            }
            self.headers.extend_from_slice(&self.line_buf);
        }

        // Body up to the next separator.
        let mut truncated = false;
        loop {
            let start = self.offset;
            let len = self.read_line()?;
            if len == 0 {
                break;
            }
            if self.scan_from && is_mbox_separator(&self.line_buf) {
                if !prev_line_was_empty {
                    warn!(
                        offset = start,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                self.pending_from = Some((start, self.line_buf.clone()));
                break;
            }
            self.message_size += len as u64;
            prev_line_was_empty = is_blank_line(&self.line_buf);
            if self.body.len() + len <= self.max_message_size {
                self.body.extend_from_slice(&self.line_buf);
            } else if !truncated {
                truncated = true;
                warn!(
                    offset = self.message_offset,
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating body"
                );
            }
        }

        Ok(classify(&self.headers))
    }

    /// Skip anything before the first `From ` line.
    fn find_first_separator(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        loop {
            let start = self.offset;
            if self.read_line()? == 0 {
                return Ok(None);
            }
            if is_mbox_separator(&self.line_buf) {
                return Ok(Some((start, self.line_buf.clone())));
            }
            if !is_blank_line(&self.line_buf) {
                warn!(offset = start, "Skipping data before first 'From ' separator");
            }
        }
    }
}

fn stream_error(path: Option<&Path>, e: std::io::Error) -> SummaryError {
    SummaryError::io(path.unwrap_or(Path::new("<stream>")), e)
}

/// Pick the header-boundary state from the message's Content-Type.
fn classify(headers: &[u8]) -> ParserState {
    let content_type = RawHeaders::parse(headers)
        .get("content-type")
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if content_type.starts_with("multipart/") {
        ParserState::Multipart
    } else if content_type.starts_with("message/") {
        ParserState::Message
    } else {
        ParserState::Header
    }
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn strip_bom(line: &[u8]) -> &[u8] {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(line)
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    strip_bom(line).starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TWO_MESSAGES: &[u8] = b"From a@example.com Thu Jan 01 00:00:00 2024\n\
Subject: First\n\
\n\
Hello\n\
\n\
From b@example.com Thu Jan 01 00:00:00 2024\n\
Subject: Second\n\
Content-Type: multipart/mixed; boundary=x\n\
\n\
--x\n\
";

    #[test]
    fn test_is_mbox_separator() {
        assert!(is_mbox_separator(
            b"From user@example.com Thu Jan 01 00:00:00 2024\n"
        ));
        assert!(is_mbox_separator(
            b"From sender@example.com Mon Feb 12 10:00:00 2024\n"
        ));
        assert!(!is_mbox_separator(b"from user@example.com\n")); // lowercase
        assert!(!is_mbox_separator(b">From user@example.com\n")); // escaped
        assert!(!is_mbox_separator(b"Subject: From here\n"));
    }

    #[test]
    fn test_is_blank_line() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(is_blank_line(b"  \n"));
        assert!(!is_blank_line(b"hello\n"));
    }

    #[test]
    fn test_is_mbox_separator_with_bom() {
        let mut line = vec![0xEF, 0xBB, 0xBF];
        line.extend_from_slice(b"From user@example.com Thu Jan 01 00:00:00 2024\n");
        assert!(is_mbox_separator(&line));
    }

    #[test]
    fn test_step_through_two_messages() {
        let mut parser = MboxParser::new(Cursor::new(TWO_MESSAGES), true);
        assert_eq!(parser.state(), ParserState::Initial);

        assert_eq!(parser.step().unwrap(), ParserState::Header);
        assert_eq!(parser.message_offset(), 0);
        assert_eq!(parser.raw_headers().get("subject").as_deref(), Some("First"));
        assert_eq!(parser.body(), b"Hello\n\n");
        assert_eq!(parser.message_size(), ("Subject: First\n\nHello\n\n").len() as u64);
        assert_eq!(
            parser.position().from_line,
            Some("From a@example.com Thu Jan 01 00:00:00 2024")
        );

        assert_eq!(parser.step().unwrap(), ParserState::Body);
        assert_eq!(parser.step().unwrap(), ParserState::Multipart);
        assert_eq!(parser.raw_headers().get("subject").as_deref(), Some("Second"));
        assert_eq!(parser.step().unwrap(), ParserState::Body);
        assert_eq!(parser.step().unwrap(), ParserState::Eof);
        assert_eq!(parser.step().unwrap(), ParserState::Eof);
    }

    #[test]
    fn test_single_message_mode() {
        let raw = b"Subject: Only\r\nContent-Type: message/rfc822\r\n\r\ninner\r\n";
        let mut parser = MboxParser::new(Cursor::new(&raw[..]), false);
        assert_eq!(parser.step().unwrap(), ParserState::Message);
        assert_eq!(parser.message_size(), raw.len() as u64);
        assert_eq!(parser.step().unwrap(), ParserState::Body);
        assert_eq!(parser.step().unwrap(), ParserState::Eof);
    }

    #[test]
    fn test_leading_garbage_and_empty_input() {
        let mut parser = MboxParser::new(Cursor::new(&b""[..]), true);
        assert_eq!(parser.step().unwrap(), ParserState::Eof);

        let raw = b"junk line\nFrom x Thu Jan 01 00:00:00 2024\nSubject: Ok\n\nbody\n";
        let mut parser = MboxParser::new(Cursor::new(&raw[..]), true);
        assert_eq!(parser.step().unwrap(), ParserState::Header);
        assert_eq!(parser.message_offset(), 10);
    }

    #[test]
    fn test_body_truncation_keeps_size() {
        let raw = b"From x Thu Jan 01 00:00:00 2024\nSubject: Big\n\n0123456789\n0123456789\n";
        let mut parser = MboxParser::new(Cursor::new(&raw[..]), true).with_max_message_size(12);
        parser.step().unwrap();
        assert_eq!(parser.body(), b"0123456789\n");
        assert_eq!(parser.message_size(), ("Subject: Big\n\n0123456789\n0123456789\n").len() as u64);
    }
}
