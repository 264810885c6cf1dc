//! Summary construction for local MBOX folders.
//!
//! [`MboxClass`] is the record class for mbox-backed summaries: every record
//! remembers the byte offset of its message in the mbox, and the class
//! searches with the built-in predicate language.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Result, SummaryError};
use crate::index::format::SummaryHeader;
use crate::model::class::RecordClass;
use crate::model::info::{Decoded, Extra, FieldValue, InfoField, MessageInfo};
use crate::parser::header::RawHeaders;
use crate::parser::mbox::{MboxParser, ParserPosition, ParserState};
use crate::summary::iter::MessageIterator;
use crate::summary::{FolderSummary, SummaryOptions};

/// Byte offset of a message's `From ` line in its mbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MboxOffset(pub u64);

/// Record class for summaries of a local mbox file.
#[derive(Debug, Default, Clone, Copy)]
pub struct MboxClass;

impl MboxClass {
    pub fn shared() -> Arc<dyn RecordClass> {
        Arc::new(MboxClass)
    }
}

/// The mbox offset stored on a record, if it has one.
pub fn mbox_offset(info: &MessageInfo) -> Option<u64> {
    info.with_extra::<MboxOffset, _>(|offset| offset.map(|o| o.0))
}

impl RecordClass for MboxClass {
    fn name(&self) -> &'static str {
        "mbox"
    }

    fn alloc(&self) -> Option<Extra> {
        Some(Box::new(MboxOffset::default()))
    }

    fn clone_extra(&self, extra: &Extra) -> Option<Extra> {
        extra
            .downcast_ref::<MboxOffset>()
            .map(|offset| Box::new(*offset) as Extra)
    }

    fn decode_from_parser(&self, position: &ParserPosition<'_>) -> Result<Decoded> {
        if !position.state.is_header_boundary() {
            return Err(SummaryError::InvalidParserState(position.state));
        }
        let headers = RawHeaders::parse(position.headers);
        let mut decoded = self.decode_header(&headers);
        decoded.fields.size = u32::try_from(position.message_size).unwrap_or(u32::MAX);
        decoded.extra = Some(Box::new(MboxOffset(position.message_offset)));
        Ok(decoded)
    }

    fn field(&self, info: &MessageInfo, id: InfoField) -> FieldValue {
        match id {
            InfoField::Custom("mbox-offset") => mbox_offset(info)
                .map_or(FieldValue::None, |o| FieldValue::Str(Arc::from(o.to_string()))),
            _ => info.default_field(id),
        }
    }

    fn save_extra(&self, info: &MessageInfo, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_u64::<BigEndian>(mbox_offset(info).unwrap_or(0))
    }

    fn load_extra(&self, reader: &mut dyn Read, _version: i32) -> io::Result<Option<Extra>> {
        Ok(Some(Box::new(MboxOffset(reader.read_u64::<BigEndian>()?))))
    }

    fn search(
        &self,
        summary: &FolderSummary,
        view_id: Option<&str>,
        expression: &str,
        subset: Option<Box<dyn MessageIterator>>,
    ) -> Result<Box<dyn MessageIterator>> {
        crate::search::search_summary(summary, view_id, expression, subset)
    }
}

/// Options for [`build_summary`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Rescan the mbox even when an up-to-date summary exists.
    pub force_rebuild: bool,
    /// Where to write the summary. Defaults to [`resolve_summary_path`].
    pub output: Option<PathBuf>,
    pub summary: SummaryOptions,
}

/// Build (or load) the summary for an MBOX file.
///
/// 1. If a summary exists, is not older than the mbox and `force_rebuild`
///    is false, load it.
/// 2. Otherwise, scan every message with the streaming parser, index it and
///    save the summary.
///
/// `progress` receives `(bytes_read, total_bytes)` after each message.
pub fn build_summary(
    mbox_path: &Path,
    options: &BuildOptions,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<FolderSummary> {
    let summary_path = match &options.output {
        Some(path) => path.clone(),
        None => resolve_summary_path(mbox_path),
    };
    let summary = FolderSummary::with_class(
        Some(summary_path.clone()),
        MboxClass::shared(),
        options.summary.clone(),
    );

    if !options.force_rebuild && summary_path.exists() {
        match try_load(&summary, mbox_path) {
            Ok(true) => {
                debug!(
                    path = %summary_path.display(),
                    count = summary.len(),
                    "Loaded existing summary"
                );
                return Ok(summary);
            }
            Ok(false) => debug!(path = %summary_path.display(), "Summary is stale"),
            Err(e) => warn!(path = %summary_path.display(), error = %e, "Discarding unreadable summary"),
        }
    }

    info!(path = %mbox_path.display(), "Building summary");
    summary.clear();

    let mut parser = MboxParser::open(mbox_path)?;
    let total = parser.file_size().unwrap_or(0);
    loop {
        match parser.step()? {
            ParserState::Eof => break,
            state if state.is_header_boundary() => {
                let record = MessageInfo::new_from_parser(Some(&summary), &parser)?;
                summary.add(&record)?;
                if let Some(cb) = progress {
                    cb(parser.offset(), total);
                }
            }
            _ => {}
        }
    }

    if let Some(parent) = summary_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SummaryError::io(parent, e))?;
    }
    summary.touch();
    summary.save()?;
    info!(
        path = %summary_path.display(),
        count = summary.len(),
        "Summary written"
    );
    Ok(summary)
}

/// Load `summary` if its file is at least as new as the mbox.
fn try_load(summary: &FolderSummary, mbox_path: &Path) -> Result<bool> {
    let header = summary.header_load()?;
    if is_stale(mbox_path, &header)? {
        return Ok(false);
    }
    summary.load()?;
    Ok(true)
}

/// Whether the mbox was modified after the summary was saved.
pub fn is_stale(mbox_path: &Path, header: &SummaryHeader) -> Result<bool> {
    let meta = std::fs::metadata(mbox_path).map_err(|e| SummaryError::io(mbox_path, e))?;
    let mbox_mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(mbox_mtime > header.time)
}

/// Pick the summary location for an mbox: an existing summary wins, then
/// a hidden file next to the mbox if its directory is writable, then the
/// user cache directory.
pub fn resolve_summary_path(mbox_path: &Path) -> PathBuf {
    let local = summary_path_for(mbox_path);
    if local.exists() {
        return local;
    }
    let cache = cache_summary_path_for(mbox_path);
    if cache.exists() {
        return cache;
    }
    let dir = mbox_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let writable = std::fs::metadata(dir)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false);
    if writable {
        local
    } else {
        cache
    }
}

/// Primary summary path: hidden file next to the MBOX.
///
/// Example: `/data/mail.mbox` → `/data/.mail.mbox.summary`
pub fn summary_path_for(mbox_path: &Path) -> PathBuf {
    let filename = mbox_path.file_name().unwrap_or_default().to_string_lossy();
    mbox_path.with_file_name(format!(".{filename}.summary"))
}

/// Fallback summary path inside the user cache directory.
///
/// Example: `~/.cache/foldersummary/<sha256_of_path>.summary`
pub fn cache_summary_path_for(mbox_path: &Path) -> PathBuf {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("foldersummary");

    let mut hasher = Sha256::new();
    hasher.update(mbox_path.to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    cache_dir.join(format!("{hash}.summary"))
}
