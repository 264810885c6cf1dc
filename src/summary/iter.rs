//! Cursors over records.
//!
//! A [`MessageIterator`] yields shared handles; dropping the iterator
//! releases whatever it still holds. Failures surface from `next()` as
//! errors, end of input as `Ok(None)`.

use std::sync::Arc;

use crate::error::{Result, SummaryError};
use crate::model::info::MessageInfo;
use crate::summary::view::FolderView;
use crate::summary::FolderSummary;

pub trait MessageIterator: Send {
    /// Advance and return the next record.
    fn next(&mut self) -> Result<Option<MessageInfo>>;

    /// Rewind to the first record.
    fn reset(&mut self);
}

/// Looks records up by uid for a [`UidIterator`].
pub trait MessageSource: Send + Sync {
    /// `Ok(None)` when the uid no longer exists.
    fn message_info(&self, uid: &str) -> Result<Option<MessageInfo>>;
}

impl MessageSource for FolderSummary {
    fn message_info(&self, uid: &str) -> Result<Option<MessageInfo>> {
        Ok(self.get(uid))
    }
}

fn check_view(view: Option<&Arc<FolderView>>) -> Result<()> {
    match view {
        Some(view) if view.is_deleted() => Err(SummaryError::ViewDeleted(
            view.id().unwrap_or_default().to_string(),
        )),
        _ => Ok(()),
    }
}

/// Iterates an owned list of records.
pub struct ListIterator {
    items: Vec<MessageInfo>,
    pos: usize,
    view: Option<Arc<FolderView>>,
}

impl ListIterator {
    /// Take ownership of `items`.
    pub fn new(items: Vec<MessageInfo>) -> Self {
        Self {
            items,
            pos: 0,
            view: None,
        }
    }

    /// Take a new reference to each record in `items`.
    pub fn from_slice(items: &[MessageInfo]) -> Self {
        Self::new(items.to_vec())
    }

    /// Stop with [`SummaryError::ViewDeleted`] once `view` is deleted.
    pub fn bind_view(mut self, view: Arc<FolderView>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl MessageIterator for ListIterator {
    fn next(&mut self) -> Result<Option<MessageInfo>> {
        check_view(self.view.as_ref())?;
        let item = self.items.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        Ok(item)
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

/// Iterates a list of uids, fetching each record from a [`MessageSource`]
/// on demand. Uids whose records have gone away are skipped.
pub struct UidIterator {
    uids: Vec<String>,
    source: Arc<dyn MessageSource>,
    pos: usize,
    view: Option<Arc<FolderView>>,
}

impl UidIterator {
    pub fn new<I, S>(uids: I, source: Arc<dyn MessageSource>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uids: uids.into_iter().map(Into::into).collect(),
            source,
            pos: 0,
            view: None,
        }
    }

    /// Stop with [`SummaryError::ViewDeleted`] once `view` is deleted.
    pub fn bind_view(mut self, view: Arc<FolderView>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }
}

impl MessageIterator for UidIterator {
    fn next(&mut self) -> Result<Option<MessageInfo>> {
        check_view(self.view.as_ref())?;
        while let Some(uid) = self.uids.get(self.pos) {
            self.pos += 1;
            if let Some(info) = self.source.message_info(uid)? {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

/// Drain an iterator into a vector.
pub fn collect(iter: &mut dyn MessageIterator) -> Result<Vec<MessageInfo>> {
    let mut out = Vec::new();
    while let Some(info) = iter.next()? {
        out.push(info);
    }
    Ok(out)
}
