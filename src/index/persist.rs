//! Loading and saving a [`FolderSummary`] in the binary summary format.
//!
//! Both directions hold the summary's content lock for their whole
//! duration. Saves write a temp file next to the target and rename it over
//! the target, so a failed save never damages the previous file.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;
use tracing::debug;

use crate::error::{Result, SummaryError};
use crate::index::format::{
    self, invalid_data, read_count, read_date, read_optional_hash, read_string, write_count,
    write_date, write_optional_hash, write_string, SummaryHeader, MIN_VERSION, VERSION,
};
use crate::model::class::RecordClass;
use crate::model::flags::MessageFlags;
use crate::model::info::{Decoded, MessageInfo, RecordFields, RecordState};
use crate::model::pool;
use crate::model::tags::{UserFlags, UserTags};
use crate::summary::events::SummaryEvent;
use crate::summary::FolderSummary;

/// Write a file through a temp file in the same directory, then rename it
/// over `path`. The temp file is removed if anything fails.
pub fn write_atomically<F>(path: &Path, fsync: bool, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| SummaryError::io(path, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer).map_err(|e| SummaryError::io(path, e))?;
        writer.flush().map_err(|e| SummaryError::io(path, e))?;
    }
    if fsync {
        tmp.as_file()
            .sync_all()
            .map_err(|e| SummaryError::io(path, e))?;
    }
    tmp.persist(path)
        .map_err(|e| SummaryError::io(path, e.error))?;
    Ok(())
}

/// Map a decoding failure onto the summary error taxonomy.
pub(crate) fn decode_error(path: &Path, e: io::Error) -> SummaryError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => SummaryError::invalid(path, "unexpected end of file"),
        io::ErrorKind::InvalidData => SummaryError::invalid(path, e.to_string()),
        _ => SummaryError::io(path, e),
    }
}

pub(crate) fn open_reader(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| SummaryError::io(path, e))?;
    Ok(BufReader::new(file))
}

fn read_header(path: &Path, reader: &mut dyn Read) -> Result<SummaryHeader> {
    let header = SummaryHeader::read(reader).map_err(|e| decode_error(path, e))?;
    if header.version < MIN_VERSION || header.version > VERSION {
        return Err(SummaryError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: header.version,
            min: MIN_VERSION,
            max: VERSION,
        });
    }
    if header.count < 0 {
        return Err(SummaryError::invalid(
            path,
            format!("negative record count {}", header.count),
        ));
    }
    Ok(header)
}

/// Serialize one record's shared fields followed by its class fields.
fn write_record(
    w: &mut dyn Write,
    uid: &str,
    info: &MessageInfo,
    state: &RecordState,
    class: &dyn RecordClass,
) -> io::Result<()> {
    let fields = info.fields();
    write_string(w, Some(uid))?;
    w.write_u32::<BigEndian>(state.flags.bits())?;
    w.write_u32::<BigEndian>(fields.size)?;
    write_date(w, fields.date_sent)?;
    write_date(w, fields.date_received)?;
    write_optional_hash(w, fields.message_id.as_ref())?;
    write_count(w, fields.references.len())?;
    for hash in &fields.references {
        format::write_hash(w, hash)?;
    }
    write_string(w, fields.subject.as_deref())?;
    write_string(w, fields.from.as_deref())?;
    write_string(w, fields.to.as_deref())?;
    write_string(w, fields.cc.as_deref())?;
    write_string(w, fields.mailing_list.as_deref())?;
    write_count(w, state.user_flags.len())?;
    for name in state.user_flags.iter() {
        write_string(w, Some(name))?;
    }
    write_count(w, state.user_tags.len())?;
    for (name, value) in state.user_tags.iter() {
        write_string(w, Some(name))?;
        write_string(w, Some(value))?;
    }
    class.save_extra(info, w)
}

fn read_interned(r: &mut dyn Read, max_len: u32) -> io::Result<Option<Arc<str>>> {
    Ok(pool::intern_opt(read_string(r, max_len)?.as_deref()))
}

/// Inverse of [`write_record`].
fn read_record(
    r: &mut dyn Read,
    version: i32,
    max_len: u32,
    class: &dyn RecordClass,
) -> io::Result<(Arc<str>, Decoded)> {
    let uid: Arc<str> = read_string(r, max_len)?
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| invalid_data("record without uid"))?
        .into();
    let flags = MessageFlags::from_bits_retain(r.read_u32::<BigEndian>()?);
    let size = r.read_u32::<BigEndian>()?;
    let date_sent = read_date(r)?;
    let date_received = read_date(r)?;
    let message_id = read_optional_hash(r)?;

    let (count, capacity) = read_count(r)?;
    let mut references = Vec::with_capacity(capacity);
    for _ in 0..count {
        references.push(format::read_hash(r)?);
    }

    let subject = read_interned(r, max_len)?;
    let from = read_interned(r, max_len)?;
    let to = read_interned(r, max_len)?;
    let cc = read_interned(r, max_len)?;
    let mailing_list = if version >= 3 {
        read_interned(r, max_len)?
    } else {
        None
    };

    let (count, _) = read_count(r)?;
    let mut user_flags = UserFlags::new();
    for _ in 0..count {
        let name = read_string(r, max_len)?.ok_or_else(|| invalid_data("absent user flag"))?;
        user_flags.set_flag(&name, true);
    }

    let (count, _) = read_count(r)?;
    let mut user_tags = UserTags::new();
    for _ in 0..count {
        let name = read_string(r, max_len)?.ok_or_else(|| invalid_data("absent user tag"))?;
        let value = read_string(r, max_len)?.unwrap_or_default();
        user_tags.set_tag(&name, Some(&value));
    }

    let extra = class.load_extra(r, version)?;

    let decoded = Decoded {
        fields: RecordFields {
            subject,
            from,
            to,
            cc,
            mailing_list,
            size,
            date_sent,
            date_received,
            message_id,
            references,
        },
        state: RecordState {
            flags,
            user_flags,
            user_tags,
        },
        extra,
    };
    Ok((uid, decoded))
}

impl FolderSummary {
    /// Read only the header of the summary file.
    ///
    /// The summary's `time`, `flags` and `next_uid` are taken from the file
    /// and the dirty flag is cleared.
    pub fn header_load(&self) -> Result<SummaryHeader> {
        let path = self.path().ok_or(SummaryError::NoPath)?;
        let mut content = self.shared.write_content();
        let mut reader = open_reader(path)?;
        let header = read_header(path, &mut reader)?;

        content.time = header.time;
        content.flags = header.flags;
        if header.next_uid > content.next_uid {
            content.next_uid = header.next_uid;
        }
        content.saved = Some(header);
        self.shared.set_dirty(false);
        debug!(
            path = %path.display(),
            version = header.version,
            count = header.count,
            "Summary header loaded"
        );
        Ok(header)
    }

    /// Load every record from the summary file.
    ///
    /// Records currently in the summary are replaced. Once the lock is
    /// released, listeners see a `Removed` event for every replaced record
    /// followed by an `Added` event per loaded record, in file order. On
    /// failure the in-memory state is left untouched and nothing is emitted.
    pub fn load(&self) -> Result<()> {
        let path = self.path().ok_or(SummaryError::NoPath)?;
        let class = Arc::clone(&self.shared.class);
        let max_len = self.shared.options.max_string_len;
        let owner = Arc::downgrade(&self.shared);

        let mut content = self.shared.write_content();
        let mut reader = open_reader(path)?;
        let header = read_header(path, &mut reader)?;

        let capacity = (header.count as usize).min(format::PREALLOC_LIMIT);
        let mut loaded: Vec<(Arc<str>, MessageInfo)> = Vec::with_capacity(capacity);
        let mut seen = std::collections::HashSet::with_capacity(capacity);
        for index in 0..header.count {
            let (uid, decoded) = read_record(&mut reader, header.version, max_len, class.as_ref())
                .map_err(|e| decode_error(path, e))?;
            if !seen.insert(Arc::clone(&uid)) {
                return Err(SummaryError::invalid(
                    path,
                    format!("duplicate uid '{uid}' at record {index}"),
                ));
            }
            let info = MessageInfo::assemble(
                Some(owner.clone()),
                Arc::clone(&class),
                Some(Arc::clone(&uid)),
                decoded,
            );
            loaded.push((uid, info));
        }

        let replaced = content.clear();
        let mut events: Vec<SummaryEvent> = replaced
            .iter()
            .filter_map(|info| info.uid())
            .map(|uid| SummaryEvent::Removed(uid.to_string()))
            .collect();
        for (uid, info) in loaded {
            events.push(SummaryEvent::Added(uid.to_string()));
            content.insert(uid, info);
        }
        content.time = header.time;
        content.flags = header.flags;
        if header.next_uid > content.next_uid {
            content.next_uid = header.next_uid;
        }
        content.saved = Some(header);
        self.shared.set_dirty(false);
        debug!(
            path = %path.display(),
            version = header.version,
            count = header.count,
            replaced = replaced.len(),
            "Summary loaded"
        );
        drop(content);
        drop(replaced);
        for event in &events {
            self.shared.emit(event);
        }
        Ok(())
    }

    /// Write the summary file if anything changed since the last load or
    /// save.
    ///
    /// On failure the dirty flag stays set and the previous file is left in
    /// place.
    pub fn save(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let path = self.path().ok_or(SummaryError::NoPath)?;
        let class = Arc::clone(&self.shared.class);
        let fsync = self.shared.options.fsync;

        let mut content = self.shared.write_content();
        let count = i32::try_from(content.records.len())
            .map_err(|_| SummaryError::invalid(path, "too many records to save"))?;

        let states: Vec<RecordState> = content.records.values().map(MessageInfo::state).collect();
        let mut header = SummaryHeader {
            version: VERSION,
            flags: content.flags,
            time: Utc::now().timestamp(),
            count,
            next_uid: content.next_uid,
            ..SummaryHeader::default()
        };
        for state in &states {
            let flags = state.flags;
            if flags.contains(MessageFlags::JUNK) {
                header.junk += 1;
            }
            if flags.contains(MessageFlags::DELETED) {
                header.deleted += 1;
            }
            if flags.is_unread() {
                header.unread += 1;
            }
        }

        write_atomically(path, fsync, |w| {
            header.write(w)?;
            for ((uid, info), state) in content.records.iter().zip(&states) {
                write_record(w, uid, info, state, class.as_ref())?;
            }
            Ok(())
        })?;

        content.time = header.time;
        content.saved = Some(header);
        self.shared.set_dirty(false);
        debug!(path = %path.display(), count, "Summary saved");
        Ok(())
    }
}
