//! Change notifications emitted by a summary.

use serde::Serialize;

/// One change to a summary, carrying the affected uid.
///
/// Events are delivered after the summary has released its locks, so a
/// listener may call back into the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "uid", rename_all = "lowercase")]
pub enum SummaryEvent {
    Added(String),
    Removed(String),
    Changed(String),
}

impl SummaryEvent {
    pub fn uid(&self) -> &str {
        match self {
            SummaryEvent::Added(uid) | SummaryEvent::Removed(uid) | SummaryEvent::Changed(uid) => uid,
        }
    }
}

/// Identifies a listener registered with [`crate::summary::FolderSummary::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// A batch of changes, folded from individual events.
///
/// A uid added and then removed within the same batch disappears entirely;
/// changes to a uid added in the same batch are not reported separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl FolderChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the batch.
    pub fn record(&mut self, event: &SummaryEvent) {
        match event {
            SummaryEvent::Added(uid) => {
                if let Some(pos) = self.removed.iter().position(|u| u == uid) {
                    self.removed.remove(pos);
                    push_unique(&mut self.changed, uid);
                } else {
                    push_unique(&mut self.added, uid);
                }
            }
            SummaryEvent::Removed(uid) => {
                self.changed.retain(|u| u != uid);
                if let Some(pos) = self.added.iter().position(|u| u == uid) {
                    self.added.remove(pos);
                } else {
                    push_unique(&mut self.removed, uid);
                }
            }
            SummaryEvent::Changed(uid) => {
                if !self.added.contains(uid) {
                    push_unique(&mut self.changed, uid);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
        self.changed.clear();
    }

    /// Hand out the accumulated batch and start a new one.
    pub fn take(&mut self) -> FolderChanges {
        std::mem::take(self)
    }
}

fn push_unique(list: &mut Vec<String>, uid: &str) {
    if !list.iter().any(|u| u == uid) {
        list.push(uid.to_string());
    }
}
