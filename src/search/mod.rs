//! Predicate language for views and searches.
//!
//! [`expression`] parses s-expressions into a [`Predicate`], [`matcher`]
//! evaluates one against a record. [`search_summary`] is the building block
//! record classes use to implement [`RecordClass::search`].
//!
//! [`RecordClass::search`]: crate::model::class::RecordClass::search

pub mod expression;
pub mod matcher;

use crate::error::{Result, SummaryError};
use crate::model::info::MessageInfo;
use crate::summary::iter::{ListIterator, MessageIterator};
use crate::summary::FolderSummary;

pub use self::expression::Predicate;
use self::matcher::Candidate;

/// Whether `info` satisfies `predicate`.
pub fn info_matches(predicate: &Predicate, info: &MessageInfo) -> bool {
    let state = info.lock_state();
    matcher::matches(predicate, &Candidate::new(info.fields(), &state))
}

/// Every record of `summary` matching `expression`, in insertion order.
pub fn filter(summary: &FolderSummary, expression: &str) -> Result<Vec<MessageInfo>> {
    let predicate = Predicate::parse(expression)?;
    Ok(summary
        .array()
        .into_iter()
        .filter(|info| info_matches(&predicate, info))
        .collect())
}

/// Evaluate `expression` over a summary.
///
/// With `view_id`, only records in that view are considered and the result
/// is bound to it. With `subset`, only the records it yields are considered.
pub fn search_summary(
    summary: &FolderSummary,
    view_id: Option<&str>,
    expression: &str,
    subset: Option<Box<dyn MessageIterator>>,
) -> Result<Box<dyn MessageIterator>> {
    let predicate = Predicate::parse(expression)?;

    let view = match view_id {
        Some(id) => Some(
            summary
                .view_lookup(Some(id))
                .ok_or_else(|| SummaryError::ViewNotFound(id.to_string()))?,
        ),
        None => None,
    };

    let candidates = match subset {
        Some(mut iter) => crate::summary::iter::collect(iter.as_mut())?,
        None => summary.array(),
    };

    let hits: Vec<MessageInfo> = candidates
        .into_iter()
        .filter(|info| {
            let state = info.lock_state();
            let candidate = Candidate::new(info.fields(), &state);
            view.as_ref().is_none_or(|v| v.matches(&candidate))
                && matcher::matches(&predicate, &candidate)
        })
        .collect();

    let iter = ListIterator::new(hits);
    Ok(Box::new(match view {
        Some(view) => iter.bind_view(view),
        None => iter,
    }))
}
