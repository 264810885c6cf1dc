//! The per-folder summary index.
//!
//! A [`FolderSummary`] maps uids to [`MessageInfo`] records in insertion
//! order and keeps every [`FolderView`] in step with the records it holds.
//!
//! Locking: one content `RwLock` guards the uid map, the view list and the
//! header counters. It is always taken before a record's state lock, which
//! is taken before a view's counter lock. Listeners run after every lock has
//! been released.

pub mod events;
pub mod iter;
pub mod view;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Result, SummaryError};
use crate::index::format::SummaryHeader;
use crate::model::class::{base_class, RecordClass};
use crate::model::flags::MessageFlags;
use crate::model::info::{MessageInfo, RecordState};
use crate::search::expression::Predicate;
use crate::search::matcher::Candidate;

use self::events::{ListenerId, SummaryEvent};
use self::iter::MessageIterator;
use self::view::FolderView;

/// Default cap on a single persisted string.
pub const DEFAULT_MAX_STRING_LEN: u32 = 1024 * 1024;

/// Persistence settings for one summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Flush the temp file to disk before it replaces the summary file.
    pub fsync: bool,
    /// Strings longer than this are rejected as corrupt on load.
    pub max_string_len: u32,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            fsync: true,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

type Listener = Arc<dyn Fn(&SummaryEvent) + Send + Sync>;

/// State guarded by the content lock.
pub(crate) struct Content {
    pub(crate) records: IndexMap<Arc<str>, MessageInfo>,
    pub(crate) root: Option<Arc<FolderView>>,
    pub(crate) views: Vec<Arc<FolderView>>,
    pub(crate) next_uid: u32,
    pub(crate) time: i64,
    pub(crate) flags: i32,
    /// Header of the file last loaded or saved.
    pub(crate) saved: Option<SummaryHeader>,
}

impl Content {
    fn new() -> Self {
        Self {
            records: IndexMap::new(),
            root: None,
            views: Vec::new(),
            next_uid: 1,
            time: 0,
            flags: 0,
            saved: None,
        }
    }

    pub(crate) fn all_views(&self) -> impl Iterator<Item = &Arc<FolderView>> {
        self.root.iter().chain(self.views.iter())
    }

    fn root(&mut self) -> Arc<FolderView> {
        if let Some(root) = &self.root {
            return Arc::clone(root);
        }
        let root = Arc::new(FolderView::root());
        scan_into(&root, self.records.values());
        self.root = Some(Arc::clone(&root));
        root
    }

    /// Hand out the next free numeric uid.
    ///
    /// Counts up from `next_uid`. Once the counter has reached `u32::MAX`
    /// and that uid is taken, the lowest free uid is reused instead.
    fn take_next_uid(&mut self) -> Result<Arc<str>> {
        let mut candidate = Some(self.next_uid);
        while let Some(n) = candidate {
            candidate = n.checked_add(1);
            let uid = n.to_string();
            if !self.records.contains_key(uid.as_str()) {
                self.next_uid = candidate.unwrap_or(u32::MAX);
                return Ok(Arc::from(uid));
            }
        }
        // A free value always shows up within `len + 1` tries.
        (1..=u32::MAX)
            .take(self.records.len().saturating_add(1))
            .map(|n| n.to_string())
            .find(|uid| !self.records.contains_key(uid.as_str()))
            .map(Arc::from)
            .ok_or(SummaryError::UidSpaceExhausted)
    }

    /// Keep `next_uid` ahead of every numeric uid in use.
    fn note_uid(&mut self, uid: &str) {
        if let Ok(n) = uid.parse::<u32>() {
            if n >= self.next_uid {
                self.next_uid = n.saturating_add(1);
            }
        }
    }

    /// Index a record that already carries a unique uid.
    pub(crate) fn insert(&mut self, uid: Arc<str>, info: MessageInfo) {
        self.note_uid(&uid);
        {
            let state = info.lock_state();
            let candidate = Candidate::new(info.fields(), &state);
            for view in self.all_views() {
                view.on_add(&candidate);
            }
        }
        info.set_indexed(true);
        self.records.insert(uid, info);
    }

    fn remove(&mut self, uid: &str) -> Option<MessageInfo> {
        let info = self.records.shift_remove(uid)?;
        {
            let state = info.lock_state();
            let candidate = Candidate::new(info.fields(), &state);
            for view in self.all_views() {
                view.on_remove(&candidate);
            }
        }
        info.set_indexed(false);
        Some(info)
    }

    /// Drop every record and zero every counter.
    pub(crate) fn clear(&mut self) -> Vec<MessageInfo> {
        for view in self.all_views() {
            view.reset();
        }
        self.records
            .drain(..)
            .map(|(_, info)| {
                info.set_indexed(false);
                info
            })
            .collect()
    }
}

fn scan_into<'a>(view: &FolderView, records: impl Iterator<Item = &'a MessageInfo>) {
    for info in records {
        let state = info.lock_state();
        view.on_add(&Candidate::new(info.fields(), &state));
    }
}

pub(crate) struct SummaryShared {
    pub(crate) path: Option<PathBuf>,
    pub(crate) class: Arc<dyn RecordClass>,
    pub(crate) options: SummaryOptions,
    pub(crate) content: RwLock<Content>,
    pub(crate) dirty: AtomicBool,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl SummaryShared {
    pub(crate) fn read_content(&self) -> RwLockReadGuard<'_, Content> {
        self.content.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write_content(&self) -> RwLockWriteGuard<'_, Content> {
        self.content.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn emit(&self, event: &SummaryEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Apply `f` to a record's mutable state, keeping views and the dirty
    /// flag in step when the record is indexed.
    pub(crate) fn mutate_record(
        &self,
        info: &MessageInfo,
        f: impl FnOnce(&mut RecordState) -> bool,
    ) -> bool {
        let notify = {
            let content = self.write_content();
            let mut state = info.lock_state();
            if !info.is_indexed() {
                return f(&mut state);
            }
            let before = state.clone();
            if !f(&mut state) {
                return false;
            }
            let fields = info.fields();
            for view in content.all_views() {
                view.on_change(&Candidate::new(fields, &before), &Candidate::new(fields, &state));
            }
            self.set_dirty(true);

            let public_flags = (before.flags ^ state.flags) & !MessageFlags::INTERNAL_MASK;
            let visible_change = !public_flags.is_empty()
                || before.user_flags != state.user_flags
                || before.user_tags != state.user_tags;
            if visible_change {
                info.uid()
            } else {
                None
            }
        };
        if let Some(uid) = notify {
            self.emit(&SummaryEvent::Changed(uid.to_string()));
        }
        true
    }
}

impl Drop for SummaryShared {
    fn drop(&mut self) {
        let content = self.content.get_mut().unwrap_or_else(|e| e.into_inner());
        for info in content.records.values() {
            info.set_indexed(false);
        }
        for view in &content.views {
            view.mark_deleted();
        }
    }
}

/// Shared handle to one folder's summary.
#[derive(Clone)]
pub struct FolderSummary {
    pub(crate) shared: Arc<SummaryShared>,
}

impl FolderSummary {
    /// A summary backed by `path`, using the base record class.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_class(Some(path.into()), base_class(), SummaryOptions::default())
    }

    /// A summary with no backing file. `load` and `save` fail with
    /// [`SummaryError::NoPath`].
    pub fn in_memory() -> Self {
        Self::with_class(None, base_class(), SummaryOptions::default())
    }

    /// A summary whose records are managed by `class`.
    pub fn with_class(
        path: Option<PathBuf>,
        class: Arc<dyn RecordClass>,
        options: SummaryOptions,
    ) -> Self {
        Self {
            shared: Arc::new(SummaryShared {
                path,
                class,
                options,
                content: RwLock::new(Content::new()),
                dirty: AtomicBool::new(false),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    pub fn class(&self) -> &Arc<dyn RecordClass> {
        &self.shared.class
    }

    pub fn options(&self) -> &SummaryOptions {
        &self.shared.options
    }

    /// Whether two handles refer to the same summary.
    pub fn ptr_eq(a: &FolderSummary, b: &FolderSummary) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    // ── Records ─────────────────────────────────────────────────────

    /// Index a record allocated by this summary.
    ///
    /// A record without a uid gets the next free numeric uid; one whose uid
    /// is taken by a different record is given a fresh uid. Adding a record
    /// that is already indexed is a no-op.
    pub fn add(&self, info: &MessageInfo) -> Result<()> {
        if !info.owned_by(&self.shared) {
            return Err(SummaryError::ForeignRecord(
                info.uid().as_deref().unwrap_or("<none>").to_string(),
            ));
        }

        let uid = {
            let mut content = self.shared.write_content();
            let uid = match info.uid() {
                Some(uid) => match content.records.get(&uid).map(|e| MessageInfo::ptr_eq(e, info)) {
                    Some(true) => return Ok(()),
                    Some(false) => {
                        let fresh = content.take_next_uid()?;
                        warn!(uid = %uid, new_uid = %fresh, "Uid already in use; reassigning");
                        info.set_uid_unchecked(Arc::clone(&fresh));
                        fresh
                    }
                    None => uid,
                },
                None => {
                    let fresh = content.take_next_uid()?;
                    info.set_uid_unchecked(Arc::clone(&fresh));
                    fresh
                }
            };
            content.insert(Arc::clone(&uid), info.clone());
            self.shared.set_dirty(true);
            uid
        };

        self.shared.emit(&SummaryEvent::Added(uid.to_string()));
        Ok(())
    }

    /// Add each record in turn. Earlier successes stay in place when a
    /// later record fails.
    pub fn add_many(&self, infos: &[MessageInfo]) -> Vec<Result<()>> {
        infos.iter().map(|info| self.add(info)).collect()
    }

    /// Remove a record. Returns `false` if it was not indexed here.
    pub fn remove(&self, info: &MessageInfo) -> bool {
        let Some(uid) = info.uid() else {
            return false;
        };
        let removed = {
            let mut content = self.shared.write_content();
            let same = content
                .records
                .get(&uid)
                .is_some_and(|existing| MessageInfo::ptr_eq(existing, info));
            if same {
                content.remove(&uid)
            } else {
                None
            }
        };
        self.finish_remove(removed).is_some()
    }

    /// Remove the record with `uid`, returning the summary's handle to it.
    pub fn remove_uid(&self, uid: &str) -> Option<MessageInfo> {
        let removed = self.shared.write_content().remove(uid);
        self.finish_remove(removed)
    }

    /// Remove several records. Returns how many were indexed here.
    pub fn remove_many(&self, infos: &[MessageInfo]) -> usize {
        infos.iter().filter(|info| self.remove(info)).count()
    }

    fn finish_remove(&self, removed: Option<MessageInfo>) -> Option<MessageInfo> {
        let info = removed?;
        self.shared.set_dirty(true);
        if let Some(uid) = info.uid() {
            self.shared.emit(&SummaryEvent::Removed(uid.to_string()));
        }
        Some(info)
    }

    /// Remove every record and zero every view's counts.
    pub fn clear(&self) {
        let removed = {
            let mut content = self.shared.write_content();
            let removed = content.clear();
            self.shared.set_dirty(true);
            removed
        };
        for info in &removed {
            if let Some(uid) = info.uid() {
                self.shared.emit(&SummaryEvent::Removed(uid.to_string()));
            }
        }
    }

    /// Look up a record. The returned handle keeps it alive past removal.
    pub fn get(&self, uid: &str) -> Option<MessageInfo> {
        self.shared.read_content().records.get(uid).cloned()
    }

    /// Look up several records, skipping uids that are not indexed.
    ///
    /// Hand the result back through [`FolderSummary::free_array`].
    pub fn get_array<I, S>(&self, uids: I) -> Vec<MessageInfo>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let content = self.shared.read_content();
        uids.into_iter()
            .filter_map(|uid| content.records.get(uid.as_ref()).cloned())
            .collect()
    }

    /// Release a batch obtained from [`FolderSummary::get_array`].
    pub fn free_array(&self, infos: Vec<MessageInfo>) {
        self.shared.class.free_array(infos);
    }

    /// All records in insertion order.
    pub fn array(&self) -> Vec<MessageInfo> {
        self.shared.read_content().records.values().cloned().collect()
    }

    /// All uids in insertion order.
    pub fn uids(&self) -> Vec<Arc<str>> {
        self.shared.read_content().records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.read_content().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.shared.read_content().records.contains_key(uid)
    }

    /// Update the system flags of the record with `uid`.
    pub fn set_flags(&self, uid: &str, mask: MessageFlags, set: MessageFlags) -> Result<bool> {
        let info = self
            .get(uid)
            .ok_or_else(|| SummaryError::UnknownUid(uid.to_string()))?;
        Ok(info.set_flags(mask, set))
    }

    /// The uid the next uid-less record will receive.
    pub fn next_uid(&self) -> u32 {
        self.shared.read_content().next_uid
    }

    pub fn set_next_uid(&self, next_uid: u32) {
        let mut content = self.shared.write_content();
        if content.next_uid != next_uid {
            content.next_uid = next_uid;
            self.shared.set_dirty(true);
        }
    }

    /// Allocate a uid without adding a record.
    pub fn next_uid_string(&self) -> Result<String> {
        let uid = self.shared.write_content().take_next_uid()?;
        self.shared.set_dirty(true);
        Ok(uid.to_string())
    }

    // ── Views ───────────────────────────────────────────────────────

    /// The unfiltered view over every record.
    pub fn root_view(&self) -> Arc<FolderView> {
        self.shared.write_content().root()
    }

    /// Find a view. `None` names the root view.
    pub fn view_lookup(&self, id: Option<&str>) -> Option<Arc<FolderView>> {
        match id {
            None => Some(self.root_view()),
            Some(id) => self
                .shared
                .read_content()
                .views
                .iter()
                .find(|v| v.id() == Some(id))
                .cloned(),
        }
    }

    /// Create a named view, or return the existing one if `id` already
    /// names a view with the same expression.
    ///
    /// A `None` id names the root view, which has no expression.
    pub fn view_create(&self, id: Option<&str>, expression: Option<&str>) -> Result<Arc<FolderView>> {
        let Some(id) = id else {
            if expression.is_some() {
                return Err(SummaryError::ViewExists("<root>".into()));
            }
            return Ok(self.root_view());
        };

        let predicate = expression.map(Predicate::parse).transpose()?;

        let mut content = self.shared.write_content();
        if let Some(existing) = content.views.iter().find(|v| v.id() == Some(id)) {
            if existing.expression() == expression {
                return Ok(Arc::clone(existing));
            }
            return Err(SummaryError::ViewExists(id.to_string()));
        }

        let view = Arc::new(FolderView::named(id, expression, predicate));
        scan_into(&view, content.records.values());
        content.views.push(Arc::clone(&view));
        debug!(
            view = id,
            is_static = view.is_static(),
            total = view.total(),
            "View created"
        );
        Ok(view)
    }

    /// Delete a named view. Iterators bound to it fail from now on.
    pub fn view_delete(&self, id: Option<&str>) -> Result<()> {
        let id = id.ok_or(SummaryError::RootView)?;
        let mut content = self.shared.write_content();
        let pos = content
            .views
            .iter()
            .position(|v| v.id() == Some(id))
            .ok_or_else(|| SummaryError::ViewNotFound(id.to_string()))?;
        let view = content.views.remove(pos);
        view.mark_deleted();
        debug!(view = id, "View deleted");
        Ok(())
    }

    /// The named views, in creation order.
    pub fn views(&self) -> Vec<Arc<FolderView>> {
        self.shared.read_content().views.clone()
    }

    // ── Search ──────────────────────────────────────────────────────

    /// Run `expression` through the record class.
    ///
    /// The base class has no search implementation and fails with
    /// [`SummaryError::NotImplemented`].
    pub fn search(
        &self,
        view_id: Option<&str>,
        expression: &str,
        subset: Option<Box<dyn MessageIterator>>,
    ) -> Result<Box<dyn MessageIterator>> {
        let class = Arc::clone(&self.shared.class);
        class.search(self, view_id, expression, subset)
    }

    // ── Notifications ───────────────────────────────────────────────

    /// Register a listener for [`SummaryEvent`]s.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SummaryEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    // ── Dirty tracking ──────────────────────────────────────────────

    /// Whether the in-memory state differs from the file on disk.
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    /// Force the next `save` to write.
    pub fn touch(&self) {
        let _content = self.shared.write_content();
        self.shared.set_dirty(true);
    }

    /// Header of the summary file as of the last `header_load`, `load` or
    /// `save`.
    pub fn saved_header(&self) -> Option<SummaryHeader> {
        self.shared.read_content().saved
    }

    /// Timestamp of the last save or load, in seconds.
    pub fn time(&self) -> i64 {
        self.shared.read_content().time
    }

    /// Summary-level flags persisted in the header.
    pub fn flags(&self) -> i32 {
        self.shared.read_content().flags
    }

    pub fn set_summary_flags(&self, flags: i32) {
        let mut content = self.shared.write_content();
        if content.flags != flags {
            content.flags = flags;
            self.shared.set_dirty(true);
        }
    }
}

impl std::fmt::Debug for FolderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let content = self.shared.read_content();
        f.debug_struct("FolderSummary")
            .field("path", &self.shared.path)
            .field("class", &self.shared.class.name())
            .field("records", &content.records.len())
            .field("views", &content.views.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
