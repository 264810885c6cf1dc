//! In-memory predicate evaluation over one record.
//!
//! Complexity: O(n) over the records a search or view scan touches. Text
//! tests are case-insensitive.

use crate::model::info::{RecordFields, RecordState};

use super::expression::{HeaderField, Predicate, TextMatch};

/// The data a predicate reads from one record.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub fields: &'a RecordFields,
    pub state: &'a RecordState,
}

impl<'a> Candidate<'a> {
    pub fn new(fields: &'a RecordFields, state: &'a RecordState) -> Self {
        Self { fields, state }
    }

    fn header(&self, field: HeaderField) -> Option<&'a str> {
        let value = match field {
            HeaderField::Subject => &self.fields.subject,
            HeaderField::From => &self.fields.from,
            HeaderField::To => &self.fields.to,
            HeaderField::Cc => &self.fields.cc,
            HeaderField::MailingList => &self.fields.mailing_list,
        };
        value.as_deref()
    }
}

/// Evaluate `predicate` against one record.
pub fn matches(predicate: &Predicate, candidate: &Candidate<'_>) -> bool {
    match predicate {
        Predicate::Const(value) => *value,
        Predicate::And(items) => items.iter().all(|p| matches(p, candidate)),
        Predicate::Or(items) => items.iter().any(|p| matches(p, candidate)),
        Predicate::Not(inner) => !matches(inner, candidate),
        Predicate::SystemFlag(flag) => candidate.state.flags.intersects(*flag),
        Predicate::UserFlag(name) => candidate.state.user_flags.get_flag(name),
        Predicate::UserTag { name, value } => {
            match (candidate.state.user_tags.get_tag(name), value) {
                (Some(actual), Some(wanted)) => actual.eq_ignore_ascii_case(wanted),
                (Some(_), None) => true,
                (None, _) => false,
            }
        }
        Predicate::Header { field, test } => matches_text(candidate.header(*field), test),
        Predicate::SentBefore(date) => candidate.fields.date_sent.date_naive() < *date,
        Predicate::SentAfter(date) => candidate.fields.date_sent.date_naive() >= *date,
        Predicate::SizeGreater(size) => u64::from(candidate.fields.size) > *size,
        Predicate::SizeLess(size) => u64::from(candidate.fields.size) < *size,
    }
}

/// Match a header value. Absent headers only satisfy negations.
fn matches_text(value: Option<&str>, test: &TextMatch) -> bool {
    let Some(value) = value else {
        return false;
    };
    if let TextMatch::Exists = test {
        return true;
    }
    let lower = value.to_lowercase();
    match test {
        TextMatch::Contains(needles) => needles.iter().any(|n| lower.contains(n.as_str())),
        TextMatch::Equals(needle) => lower == *needle,
        TextMatch::StartsWith(needle) => lower.starts_with(needle.as_str()),
        TextMatch::Exists => true,
    }
}
