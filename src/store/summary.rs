//! The folder list of a mail store, persisted next to the per-folder
//! summaries.
//!
//! File layout (big-endian):
//!
//! ```text
//! header:  version: i32, flags: i32, time: i64, count: i32
//! entry:   path: string, flags: u32,
//!          unread: i32, total: i32   (version >= 2, -1 = unknown)
//!          class extra fields
//! ```

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SummaryError};
use crate::index::format::{invalid_data, read_string, write_string};
use crate::index::persist::{decode_error, open_reader, write_atomically};
use crate::summary::SummaryOptions;

use super::info::{base_store_class, StoreInfo, StoreInfoClass, StoreInfoFlags, StoreInfoState};

/// Current store summary format version.
pub const STORE_VERSION: i32 = 2;

/// Version 1 files carry no counts.
pub const STORE_MIN_VERSION: i32 = 1;

/// Store summary file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreHeader {
    pub version: i32,
    pub flags: i32,
    pub time: i64,
    pub count: i32,
}

impl StoreHeader {
    fn read<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            version: r.read_i32::<BigEndian>()?,
            flags: r.read_i32::<BigEndian>()?,
            time: r.read_i64::<BigEndian>()?,
            count: r.read_i32::<BigEndian>()?,
        })
    }

    fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<BigEndian>(self.version)?;
        w.write_i32::<BigEndian>(self.flags)?;
        w.write_i64::<BigEndian>(self.time)?;
        w.write_i32::<BigEndian>(self.count)
    }
}

fn write_count(w: &mut dyn Write, count: Option<u32>) -> io::Result<()> {
    let value = count.and_then(|c| i32::try_from(c).ok()).unwrap_or(-1);
    w.write_i32::<BigEndian>(value)
}

fn read_count(r: &mut dyn Read) -> io::Result<Option<u32>> {
    let value = r.read_i32::<BigEndian>()?;
    Ok(u32::try_from(value).ok())
}

struct StoreContent {
    infos: IndexMap<Arc<str>, StoreInfo>,
    time: i64,
    flags: i32,
}

struct StoreShared {
    path: Option<PathBuf>,
    class: Arc<dyn StoreInfoClass>,
    options: SummaryOptions,
    content: RwLock<StoreContent>,
    dirty: AtomicBool,
}

impl StoreShared {
    fn read_content(&self) -> RwLockReadGuard<'_, StoreContent> {
        self.content.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_content(&self) -> RwLockWriteGuard<'_, StoreContent> {
        self.content.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}

/// Folder-list summary keyed by folder path.
#[derive(Clone)]
pub struct StoreSummary {
    shared: Arc<StoreShared>,
}

impl StoreSummary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_class(Some(path.into()), base_store_class(), SummaryOptions::default())
    }

    pub fn in_memory() -> Self {
        Self::with_class(None, base_store_class(), SummaryOptions::default())
    }

    pub fn with_class(
        path: Option<PathBuf>,
        class: Arc<dyn StoreInfoClass>,
        options: SummaryOptions,
    ) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                path,
                class,
                options,
                content: RwLock::new(StoreContent {
                    infos: IndexMap::new(),
                    time: 0,
                    flags: 0,
                }),
                dirty: AtomicBool::new(false),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Allocate an entry through the store class without adding it.
    pub fn new_info(&self, path: &str) -> StoreInfo {
        StoreInfo::assemble(
            Arc::from(path),
            Arc::clone(&self.shared.class),
            StoreInfoState::default(),
            self.shared.class.alloc(path),
        )
    }

    /// Add an entry. Adding the same entry twice is a no-op; a different
    /// entry for a path already present is rejected.
    pub fn add(&self, info: &StoreInfo) -> Result<()> {
        let mut content = self.shared.write_content();
        match content.infos.get(info.path()).map(|e| StoreInfo::ptr_eq(e, info)) {
            Some(true) => return Ok(()),
            Some(false) => return Err(SummaryError::PathInUse(info.path().to_string())),
            None => {}
        }
        content
            .infos
            .insert(Arc::clone(info.path_arc()), info.clone());
        self.shared.set_dirty(true);
        Ok(())
    }

    /// Return the entry for `path`, creating and adding one if needed.
    pub fn add_from_path(&self, path: &str) -> StoreInfo {
        let mut content = self.shared.write_content();
        if let Some(existing) = content.infos.get(path) {
            return existing.clone();
        }
        let info = self.new_info(path);
        content
            .infos
            .insert(Arc::clone(info.path_arc()), info.clone());
        self.shared.set_dirty(true);
        info
    }

    pub fn get(&self, path: &str) -> Option<StoreInfo> {
        self.shared.read_content().infos.get(path).cloned()
    }

    /// Remove an entry. Returns `false` if it was not in this summary.
    pub fn remove(&self, info: &StoreInfo) -> bool {
        let mut content = self.shared.write_content();
        let same = content
            .infos
            .get(info.path())
            .is_some_and(|existing| StoreInfo::ptr_eq(existing, info));
        if same {
            content.infos.shift_remove(info.path());
            self.shared.set_dirty(true);
        }
        same
    }

    pub fn remove_path(&self, path: &str) -> Option<StoreInfo> {
        let removed = self.shared.write_content().infos.shift_remove(path)?;
        self.shared.set_dirty(true);
        Some(removed)
    }

    /// All entries in insertion order.
    pub fn array(&self) -> Vec<StoreInfo> {
        self.shared.read_content().infos.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.read_content().infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let removed: Vec<StoreInfo> = {
            let mut content = self.shared.write_content();
            self.shared.set_dirty(true);
            content.infos.drain(..).map(|(_, info)| info).collect()
        };
        drop(removed);
    }

    /// Record the unread and total counts of a folder. `None` means unknown.
    pub fn set_counts(&self, path: &str, unread: Option<u32>, total: Option<u32>) -> Result<bool> {
        self.update(path, |state| {
            let changed = state.unread != unread || state.total != total;
            state.unread = unread;
            state.total = total;
            changed
        })
    }

    /// `flags = (flags & !mask) | (set & mask)` on the entry for `path`.
    pub fn set_flags(&self, path: &str, mask: StoreInfoFlags, set: StoreInfoFlags) -> Result<bool> {
        self.update(path, |state| {
            let new = (state.flags & !mask) | (set & mask);
            let changed = new != state.flags;
            state.flags = new;
            changed
        })
    }

    fn update(&self, path: &str, f: impl FnOnce(&mut StoreInfoState) -> bool) -> Result<bool> {
        let content = self.shared.write_content();
        let info = content
            .infos
            .get(path)
            .ok_or_else(|| SummaryError::UnknownPath(path.to_string()))?;
        let changed = f(&mut info.lock_state());
        if changed {
            self.shared.set_dirty(true);
        }
        Ok(changed)
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        let _content = self.shared.write_content();
        self.shared.set_dirty(true);
    }

    /// Timestamp of the last save or load, in seconds.
    pub fn time(&self) -> i64 {
        self.shared.read_content().time
    }

    pub fn flags(&self) -> i32 {
        self.shared.read_content().flags
    }

    // ── Persistence ─────────────────────────────────────────────────

    fn read_header(&self, path: &Path, reader: &mut dyn Read) -> Result<StoreHeader> {
        let header = StoreHeader::read(reader).map_err(|e| decode_error(path, e))?;
        if header.version < STORE_MIN_VERSION || header.version > STORE_VERSION {
            return Err(SummaryError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: header.version,
                min: STORE_MIN_VERSION,
                max: STORE_VERSION,
            });
        }
        if header.count < 0 {
            return Err(SummaryError::invalid(
                path,
                format!("negative entry count {}", header.count),
            ));
        }
        Ok(header)
    }

    /// Read only the header. Clears the dirty flag on success.
    pub fn header_load(&self) -> Result<StoreHeader> {
        let path = self.path().ok_or(SummaryError::NoPath)?;
        let mut content = self.shared.write_content();
        let mut reader = open_reader(path)?;
        let header = self.read_header(path, &mut reader)?;
        content.time = header.time;
        content.flags = header.flags;
        self.shared.set_dirty(false);
        Ok(header)
    }

    /// Replace the entries with those in the store summary file.
    pub fn load(&self) -> Result<()> {
        let path = self.path().ok_or(SummaryError::NoPath)?;
        let class = Arc::clone(&self.shared.class);
        let max_len = self.shared.options.max_string_len;

        let mut content = self.shared.write_content();
        let mut reader = open_reader(path)?;
        let header = self.read_header(path, &mut reader)?;

        let mut loaded: IndexMap<Arc<str>, StoreInfo> = IndexMap::new();
        for index in 0..header.count {
            let info = read_entry(&mut reader, header.version, max_len, &class)
                .map_err(|e| decode_error(path, e))?;
            if loaded.contains_key(info.path()) {
                return Err(SummaryError::invalid(
                    path,
                    format!("duplicate path '{}' at entry {index}", info.path()),
                ));
            }
            loaded.insert(Arc::clone(info.path_arc()), info);
        }

        let replaced = std::mem::replace(&mut content.infos, loaded);
        content.time = header.time;
        content.flags = header.flags;
        self.shared.set_dirty(false);
        debug!(path = %path.display(), count = header.count, "Store summary loaded");
        drop(content);
        drop(replaced);
        Ok(())
    }

    /// Write the store summary file if it is dirty.
    pub fn save(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let path = self.path().ok_or(SummaryError::NoPath)?;
        let class = Arc::clone(&self.shared.class);

        let mut content = self.shared.write_content();
        let header = StoreHeader {
            version: STORE_VERSION,
            flags: content.flags,
            time: Utc::now().timestamp(),
            count: i32::try_from(content.infos.len())
                .map_err(|_| SummaryError::invalid(path, "too many entries to save"))?,
        };

        write_atomically(path, self.shared.options.fsync, |w| {
            header.write(w)?;
            for info in content.infos.values() {
                let state = info.state();
                write_string(w, Some(info.path()))?;
                w.write_u32::<BigEndian>(state.flags.bits())?;
                write_count(w, state.unread)?;
                write_count(w, state.total)?;
                class.save_extra(info, w)?;
            }
            Ok(())
        })?;

        content.time = header.time;
        self.shared.set_dirty(false);
        debug!(path = %path.display(), count = header.count, "Store summary saved");
        Ok(())
    }
}

fn read_entry(
    r: &mut dyn Read,
    version: i32,
    max_len: u32,
    class: &Arc<dyn StoreInfoClass>,
) -> io::Result<StoreInfo> {
    let path: Arc<str> = read_string(r, max_len)?
        .filter(|p| !p.is_empty())
        .ok_or_else(|| invalid_data("entry without path"))?
        .into();
    let flags = StoreInfoFlags::from_bits_retain(r.read_u32::<BigEndian>()?);
    let (unread, total) = if version >= 2 {
        (read_count(r)?, read_count(r)?)
    } else {
        (None, None)
    };
    let extra = class.load_extra(&path, r, version)?;
    Ok(StoreInfo::assemble(
        path,
        Arc::clone(class),
        StoreInfoState {
            flags,
            unread,
            total,
        },
        extra,
    ))
}

impl std::fmt::Debug for StoreSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSummary")
            .field("path", &self.shared.path)
            .field("class", &self.shared.class.name())
            .field("entries", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
