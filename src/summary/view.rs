//! Live projections over a summary.
//!
//! Every [`FolderView`] keeps running aggregate counts. The owning summary
//! feeds it deltas on each add, remove and flag or tag change; the only full
//! scan happens when the view is created.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::model::flags::MessageFlags;
use crate::search::expression::Predicate;
use crate::search::matcher::{self, Candidate};

/// Aggregate counts of one view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewCounts {
    pub total: u32,
    /// Records with neither DELETED nor JUNK.
    pub visible: u32,
    /// Records with none of SEEN, DELETED, JUNK.
    pub unread: u32,
    pub deleted: u32,
    pub junk: u32,
}

impl ViewCounts {
    /// Count one record with the given flags.
    pub fn include(&mut self, flags: MessageFlags) {
        self.total += 1;
        self.apply(flags, |n| *n += 1);
    }

    /// Uncount one record with the given flags.
    pub fn exclude(&mut self, flags: MessageFlags) {
        self.total = self.total.saturating_sub(1);
        self.apply(flags, |n| *n = n.saturating_sub(1));
    }

    fn apply(&mut self, flags: MessageFlags, op: impl Fn(&mut u32)) {
        if flags.is_deleted() {
            op(&mut self.deleted);
        }
        if flags.is_junk() {
            op(&mut self.junk);
        }
        if !flags.is_hidden() {
            op(&mut self.visible);
        }
        if flags.is_unread() {
            op(&mut self.unread);
        }
    }
}

/// Lifecycle of a view. There is no way back from `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Active,
    Deleted,
}

/// A named (or root) projection with live counts.
///
/// Views are shared as `Arc<FolderView>`; a deleted view stays readable for
/// whoever still holds it, but iterators bound to it stop.
#[derive(Debug)]
pub struct FolderView {
    id: Option<String>,
    expression: Option<String>,
    predicate: Option<Predicate>,
    is_static: bool,
    deleted: AtomicBool,
    counts: Mutex<ViewCounts>,
}

impl FolderView {
    /// The unfiltered view that tracks every record.
    pub(crate) fn root() -> Self {
        Self {
            id: None,
            expression: None,
            predicate: None,
            is_static: true,
            deleted: AtomicBool::new(false),
            counts: Mutex::new(ViewCounts::default()),
        }
    }

    pub(crate) fn named(id: &str, expression: Option<&str>, predicate: Option<Predicate>) -> Self {
        let is_static = predicate.as_ref().is_none_or(Predicate::is_static);
        Self {
            id: Some(id.to_string()),
            expression: expression.map(str::to_string),
            predicate,
            is_static,
            deleted: AtomicBool::new(false),
            counts: Mutex::new(ViewCounts::default()),
        }
    }

    /// `None` for the root view.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.id.is_none()
    }

    /// True when membership never depends on flags or tags.
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn state(&self) -> ViewState {
        if self.deleted.load(Ordering::Acquire) {
            ViewState::Deleted
        } else {
            ViewState::Active
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state() == ViewState::Deleted
    }

    /// Snapshot of the current counts.
    pub fn counts(&self) -> ViewCounts {
        *self.lock_counts()
    }

    pub fn total(&self) -> u32 {
        self.lock_counts().total
    }

    pub fn visible(&self) -> u32 {
        self.lock_counts().visible
    }

    pub fn unread(&self) -> u32 {
        self.lock_counts().unread
    }

    pub fn deleted(&self) -> u32 {
        self.lock_counts().deleted
    }

    pub fn junk(&self) -> u32 {
        self.lock_counts().junk
    }

    /// Whether a record belongs to this view.
    pub fn matches(&self, candidate: &Candidate<'_>) -> bool {
        self.predicate
            .as_ref()
            .is_none_or(|p| matcher::matches(p, candidate))
    }

    pub(crate) fn on_add(&self, candidate: &Candidate<'_>) {
        if self.matches(candidate) {
            self.lock_counts().include(candidate.state.flags);
        }
    }

    pub(crate) fn on_remove(&self, candidate: &Candidate<'_>) {
        if self.matches(candidate) {
            self.lock_counts().exclude(candidate.state.flags);
        }
    }

    /// Move one record's contribution from `before` to `after`.
    pub(crate) fn on_change(&self, before: &Candidate<'_>, after: &Candidate<'_>) {
        let was_member = self.matches(before);
        let is_member = if self.is_static {
            was_member
        } else {
            self.matches(after)
        };
        let mut counts = self.lock_counts();
        if was_member {
            counts.exclude(before.state.flags);
        }
        if is_member {
            counts.include(after.state.flags);
        }
    }

    pub(crate) fn reset(&self) {
        *self.lock_counts() = ViewCounts::default();
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    fn lock_counts(&self) -> MutexGuard<'_, ViewCounts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}
