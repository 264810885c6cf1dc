//! Pluggable record strategy.
//!
//! A [`RecordClass`] is supplied to a summary at construction and decides how
//! its records are allocated, decoded, persisted, searched and released.
//! Backends that need protocol-specific fields (an IMAP server uid, an NNTP
//! article number, an mbox offset) implement it and keep those fields in the
//! record's extra payload. Every hook has a working default except
//! [`RecordClass::search`].

use std::io::{self, Read, Write};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{Result, SummaryError};
use crate::model::info::{Decoded, Extra, FieldValue, InfoField, MessageInfo};
use crate::parser::header::{self, RawHeaders};
use crate::parser::mbox::ParserPosition;
use crate::parser::message::MimeMessage;
use crate::summary::iter::MessageIterator;
use crate::summary::FolderSummary;

pub trait RecordClass: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "base"
    }

    /// Allocate the extra payload for a fresh, empty record.
    fn alloc(&self) -> Option<Extra> {
        None
    }

    /// Duplicate the extra payload when a record is cloned.
    fn clone_extra(&self, _extra: &Extra) -> Option<Extra> {
        None
    }

    /// Called once when the last reference to a record is dropped.
    fn free(&self, _uid: Option<&str>, _extra: Option<Extra>) {}

    /// Release a batch obtained from [`FolderSummary::get_array`].
    fn free_array(&self, infos: Vec<MessageInfo>) {
        drop(infos);
    }

    /// Decode a record from raw headers.
    ///
    /// Override to parse additional headers into the extra payload; call
    /// [`header::decode_record`] to keep the shared fields.
    fn decode_header(&self, headers: &RawHeaders) -> Decoded {
        let mut decoded = header::decode_record(headers);
        decoded.extra = self.alloc();
        decoded
    }

    /// Decode a record from a streaming parser.
    ///
    /// The parser must sit on a header, message or multipart boundary.
    fn decode_from_parser(&self, position: &ParserPosition<'_>) -> Result<Decoded> {
        if !position.state.is_header_boundary() {
            return Err(SummaryError::InvalidParserState(position.state));
        }
        let headers = RawHeaders::parse(position.headers);
        let mut decoded = self.decode_header(&headers);
        decoded.fields.size = u32::try_from(position.message_size).unwrap_or(u32::MAX);
        Ok(decoded)
    }

    /// Decode a record from an in-memory message.
    fn decode_from_message(&self, message: &MimeMessage) -> Decoded {
        let mut decoded = self.decode_header(&message.headers());
        decoded.fields.size = message.size();
        decoded
    }

    /// Single dispatch point for field access.
    fn field(&self, info: &MessageInfo, id: InfoField) -> FieldValue {
        info.default_field(id)
    }

    /// Append class-specific fields after a record's shared fields.
    fn save_extra(&self, _info: &MessageInfo, _writer: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Read what [`RecordClass::save_extra`] wrote.
    fn load_extra(&self, _reader: &mut dyn Read, _version: i32) -> io::Result<Option<Extra>> {
        Ok(self.alloc())
    }

    /// Run a search expression over a summary, optionally inside a view or a
    /// subset of records.
    ///
    /// There is no default: matching semantics belong to the concrete folder
    /// type. [`crate::search::search_summary`] is available for classes that
    /// want the built-in predicate language.
    fn search(
        &self,
        _summary: &FolderSummary,
        _view_id: Option<&str>,
        _expression: &str,
        _subset: Option<Box<dyn MessageIterator>>,
    ) -> Result<Box<dyn MessageIterator>> {
        Err(SummaryError::NotImplemented("search"))
    }
}

/// The class used by plain summaries and by records with no summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseClass;

impl RecordClass for BaseClass {}

static BASE: Lazy<Arc<dyn RecordClass>> = Lazy::new(|| Arc::new(BaseClass));

/// Shared instance of [`BaseClass`].
pub fn base_class() -> Arc<dyn RecordClass> {
    Arc::clone(&BASE)
}
