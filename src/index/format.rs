//! Binary summary file format.
//!
//! All integers are big-endian.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER                               │
//! │  version: i32                        │
//! │  flags: i32                          │
//! │  time: i64        (last save, secs)  │
//! │  count: i32                          │
//! │  -- version >= 3 --                  │
//! │  next_uid: u32                       │
//! │  unread: u32                         │
//! │  deleted: u32                        │
//! │  junk: u32                           │
//! ├──────────────────────────────────────┤
//! │ RECORD × count                       │
//! │  uid: string                         │
//! │  flags: u32                          │
//! │  size: u32                           │
//! │  date_sent: i64   (secs)             │
//! │  date_received: i64   (secs)         │
//! │  message_id: u8 present + [u8; 16]   │
//! │  references: u32 n + n × [u8; 16]    │
//! │  subject, from, to, cc: string       │
//! │  mailing_list: string (version >= 3) │
//! │  user_flags: u32 n + n × string      │
//! │  user_tags: u32 n + n × 2 × string   │
//! │  class extra fields                  │
//! └──────────────────────────────────────┘
//!
//! string = u32 (byte length + 1, 0 = absent) + UTF-8 bytes
//! ```
//!
//! The helpers here are public so record classes can write their extra
//! fields with the same encoding.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::message_id::MessageIdHash;

/// Current summary format version.
pub const VERSION: i32 = 3;

/// Oldest version this build can still read. Version 2 files have no
/// header counters and no mailing-list field.
pub const MIN_VERSION: i32 = 2;

/// Upper bound on pre-allocation driven by counts read from disk.
pub(crate) const PREALLOC_LIMIT: usize = 1024;

/// Summary file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SummaryHeader {
    pub version: i32,
    pub flags: i32,
    /// Unix time of the save that wrote the file.
    pub time: i64,
    /// Number of records that follow.
    pub count: i32,
    pub next_uid: u32,
    pub unread: u32,
    pub deleted: u32,
    pub junk: u32,
}

impl SummaryHeader {
    /// Read a header. Counters are zero for files older than version 3.
    ///
    /// The version is not validated here.
    pub fn read<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        let version = r.read_i32::<BigEndian>()?;
        let flags = r.read_i32::<BigEndian>()?;
        let time = r.read_i64::<BigEndian>()?;
        let count = r.read_i32::<BigEndian>()?;
        let mut header = Self {
            version,
            flags,
            time,
            count,
            ..Self::default()
        };
        if version >= 3 {
            header.next_uid = r.read_u32::<BigEndian>()?;
            header.unread = r.read_u32::<BigEndian>()?;
            header.deleted = r.read_u32::<BigEndian>()?;
            header.junk = r.read_u32::<BigEndian>()?;
        }
        Ok(header)
    }

    /// Write the header in the layout of `self.version`.
    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<BigEndian>(self.version)?;
        w.write_i32::<BigEndian>(self.flags)?;
        w.write_i64::<BigEndian>(self.time)?;
        w.write_i32::<BigEndian>(self.count)?;
        if self.version >= 3 {
            w.write_u32::<BigEndian>(self.next_uid)?;
            w.write_u32::<BigEndian>(self.unread)?;
            w.write_u32::<BigEndian>(self.deleted)?;
            w.write_u32::<BigEndian>(self.junk)?;
        }
        Ok(())
    }
}

pub(crate) fn invalid_data(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

/// Write an optional string as length + 1 followed by its bytes.
pub fn write_string<W: Write + ?Sized>(w: &mut W, value: Option<&str>) -> io::Result<()> {
    match value {
        None => w.write_u32::<BigEndian>(0),
        Some(s) => {
            let len = u32::try_from(s.len())
                .ok()
                .and_then(|l| l.checked_add(1))
                .ok_or_else(|| invalid_data("string too long to encode"))?;
            w.write_u32::<BigEndian>(len)?;
            w.write_all(s.as_bytes())
        }
    }
}

/// Read what [`write_string`] wrote, rejecting strings over `max_len` bytes.
pub fn read_string<R: Read + ?Sized>(r: &mut R, max_len: u32) -> io::Result<Option<String>> {
    let encoded = r.read_u32::<BigEndian>()?;
    if encoded == 0 {
        return Ok(None);
    }
    let len = encoded - 1;
    if len > max_len {
        return Err(invalid_data(format!(
            "string length {len} exceeds limit {max_len}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| invalid_data("string is not valid UTF-8"))
}

pub fn write_count<W: Write + ?Sized>(w: &mut W, count: usize) -> io::Result<()> {
    let count = u32::try_from(count).map_err(|_| invalid_data("list too long to encode"))?;
    w.write_u32::<BigEndian>(count)
}

/// Read a list length. Returns the count and a safe initial capacity.
pub fn read_count<R: Read + ?Sized>(r: &mut R) -> io::Result<(usize, usize)> {
    let count = r.read_u32::<BigEndian>()? as usize;
    Ok((count, count.min(PREALLOC_LIMIT)))
}

pub fn write_hash<W: Write + ?Sized>(w: &mut W, hash: &MessageIdHash) -> io::Result<()> {
    w.write_all(hash.as_bytes())
}

pub fn read_hash<R: Read + ?Sized>(r: &mut R) -> io::Result<MessageIdHash> {
    let mut bytes = [0u8; 16];
    r.read_exact(&mut bytes)?;
    Ok(MessageIdHash(bytes))
}

pub fn write_optional_hash<W: Write + ?Sized>(
    w: &mut W,
    hash: Option<&MessageIdHash>,
) -> io::Result<()> {
    match hash {
        Some(hash) => {
            w.write_u8(1)?;
            write_hash(w, hash)
        }
        None => w.write_u8(0),
    }
}

pub fn read_optional_hash<R: Read + ?Sized>(r: &mut R) -> io::Result<Option<MessageIdHash>> {
    match r.read_u8()? {
        0 => Ok(None),
        1 => read_hash(r).map(Some),
        other => Err(invalid_data(format!("bad message-id marker {other}"))),
    }
}

/// Dates are stored as whole Unix seconds; any sub-second part is dropped.
pub fn write_date<W: Write + ?Sized>(w: &mut W, date: DateTime<Utc>) -> io::Result<()> {
    w.write_i64::<BigEndian>(date.timestamp())
}

pub fn read_date<R: Read + ?Sized>(r: &mut R) -> io::Result<DateTime<Utc>> {
    let secs = r.read_i64::<BigEndian>()?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| invalid_data(format!("date {secs} out of range")))
}
