//! Message info records.
//!
//! A [`MessageInfo`] is a shared handle: cloning it takes a reference,
//! dropping it releases one. The record itself is destroyed, and its class
//! `free` hook runs, when the last handle goes away. A summary holds one
//! reference per indexed record, so removing a record from its summary never
//! invalidates handles held elsewhere.
//!
//! Header-derived fields are fixed at construction. Flags, user flags and
//! user tags live behind a per-record lock; when the record is indexed,
//! mutations go through the owning summary so every view is updated in the
//! same critical section.

use std::any::Any;
use std::fmt;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::{DateTime, Utc};

use crate::error::{Result, SummaryError};
use crate::model::class::{base_class, RecordClass};
use crate::model::flags::MessageFlags;
use crate::model::message_id::MessageIdHash;
use crate::model::pool;
use crate::model::tags::{UserFlags, UserTags};
use crate::parser::header::RawHeaders;
use crate::parser::mbox::MboxParser;
use crate::parser::message::MimeMessage;
use crate::summary::{FolderSummary, SummaryShared};

/// Class-specific payload carried by a record.
pub type Extra = Box<dyn Any + Send + Sync>;

/// Header-derived fields. Immutable once the record exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFields {
    pub subject: Option<Arc<str>>,
    pub from: Option<Arc<str>>,
    pub to: Option<Arc<str>>,
    pub cc: Option<Arc<str>>,
    pub mailing_list: Option<Arc<str>>,
    /// Message size in bytes.
    pub size: u32,
    /// Kept at full precision in memory but persisted as whole seconds, so
    /// a reload drops any sub-second part.
    pub date_sent: DateTime<Utc>,
    /// Same precision as `date_sent`.
    pub date_received: DateTime<Utc>,
    pub message_id: Option<MessageIdHash>,
    /// Ancestors, nearest parent first.
    pub references: Vec<MessageIdHash>,
}

impl RecordFields {
    /// Build fields with interned copies of the given strings.
    pub fn with_strings(
        subject: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
        cc: Option<&str>,
    ) -> Self {
        Self {
            subject: pool::intern_opt(subject),
            from: pool::intern_opt(from),
            to: pool::intern_opt(to),
            cc: pool::intern_opt(cc),
            ..Self::default()
        }
    }
}

/// The mutable part of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordState {
    pub flags: MessageFlags,
    pub user_flags: UserFlags,
    pub user_tags: UserTags,
}

impl RecordState {
    /// `flags = (flags & !mask) | (set & mask)`. Returns whether any bit flipped.
    pub fn set_flags(&mut self, mask: MessageFlags, set: MessageFlags) -> bool {
        let new = (self.flags & !mask) | (set & mask);
        let changed = new != self.flags;
        self.flags = new;
        changed
    }
}

/// Output of the record class decode hooks.
pub struct Decoded {
    pub fields: RecordFields,
    pub state: RecordState,
    pub extra: Option<Extra>,
}

impl Decoded {
    pub fn new(fields: RecordFields) -> Self {
        Self {
            fields,
            state: RecordState::default(),
            extra: None,
        }
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("fields", &self.fields)
            .field("state", &self.state)
            .field("extra", &self.extra.is_some())
            .finish()
    }
}

/// Field identifiers for generic access through [`MessageInfo::field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoField {
    Uid,
    Subject,
    From,
    To,
    Cc,
    MailingList,
    Flags,
    Size,
    DateSent,
    DateReceived,
    MessageId,
    References,
    UserFlags,
    UserTags,
    /// A field only a specific record class knows about.
    Custom(&'static str),
}

/// Value returned by a field access.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    None,
    Str(Arc<str>),
    Flags(MessageFlags),
    Size(u32),
    Date(DateTime<Utc>),
    MessageId(MessageIdHash),
    References(Vec<MessageIdHash>),
    UserFlags(UserFlags),
    UserTags(UserTags),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_str(self) -> Option<Arc<str>> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn from_str_opt(value: &Option<Arc<str>>) -> Self {
        value.clone().map_or(FieldValue::None, FieldValue::Str)
    }
}

pub(crate) struct InfoInner {
    owner: Option<Weak<SummaryShared>>,
    class: Arc<dyn RecordClass>,
    uid: RwLock<Option<Arc<str>>>,
    fields: RecordFields,
    state: Mutex<RecordState>,
    indexed: AtomicBool,
    extra: RwLock<Option<Extra>>,
}

impl Drop for InfoInner {
    fn drop(&mut self) {
        let uid = self.uid.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        let extra = self.extra.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        self.class.free(uid.as_deref(), extra);
        let fields = &mut self.fields;
        for value in [
            fields.subject.take(),
            fields.from.take(),
            fields.to.take(),
            fields.cc.take(),
            fields.mailing_list.take(),
        ]
        .into_iter()
        .flatten()
        {
            pool::release(value);
        }
    }
}

/// Shared handle to one message's metadata.
#[derive(Clone)]
pub struct MessageInfo {
    inner: Arc<InfoInner>,
}

type Owner = (Option<Weak<SummaryShared>>, Arc<dyn RecordClass>);

fn owner_of(summary: Option<&FolderSummary>) -> Owner {
    match summary {
        Some(s) => (Some(Arc::downgrade(&s.shared)), Arc::clone(&s.shared.class)),
        None => (None, base_class()),
    }
}

impl MessageInfo {
    /// Allocate an empty record, through the summary's class when one is given.
    pub fn new(summary: Option<&FolderSummary>) -> Self {
        let (owner, class) = owner_of(summary);
        let decoded = Decoded {
            extra: class.alloc(),
            ..Decoded::new(RecordFields::default())
        };
        Self::assemble(owner, class, None, decoded)
    }

    /// Build a record from already-decoded fields.
    pub fn with_fields(summary: Option<&FolderSummary>, fields: RecordFields) -> Self {
        let (owner, class) = owner_of(summary);
        let decoded = Decoded {
            extra: class.alloc(),
            ..Decoded::new(fields)
        };
        Self::assemble(owner, class, None, decoded)
    }

    /// Decode a record from raw message headers.
    pub fn new_from_header(summary: Option<&FolderSummary>, headers: &RawHeaders) -> Self {
        let (owner, class) = owner_of(summary);
        let decoded = class.decode_header(headers);
        Self::assemble(owner, class, None, decoded)
    }

    /// Decode a record from a parser positioned at a message boundary.
    pub fn new_from_parser<R: BufRead>(
        summary: Option<&FolderSummary>,
        parser: &MboxParser<R>,
    ) -> Result<Self> {
        let (owner, class) = owner_of(summary);
        let decoded = class.decode_from_parser(&parser.position())?;
        Ok(Self::assemble(owner, class, None, decoded))
    }

    /// Decode a record from an in-memory message.
    ///
    /// When `template` is given, its flags, user flags and user tags are
    /// copied onto the new record, system flags verbatim.
    pub fn new_from_message(
        summary: Option<&FolderSummary>,
        message: &MimeMessage,
        template: Option<&MessageInfo>,
    ) -> Self {
        let (owner, class) = owner_of(summary);
        let mut decoded = class.decode_from_message(message);
        if let Some(template) = template {
            let source = template.state();
            decoded.state.flags = source.flags;
            decoded.state.user_flags.copy_flags_from(&source.user_flags);
            decoded.state.user_tags.copy_tags_from(&source.user_tags);
        }
        Self::assemble(owner, class, None, decoded)
    }

    pub(crate) fn assemble(
        owner: Option<Weak<SummaryShared>>,
        class: Arc<dyn RecordClass>,
        uid: Option<Arc<str>>,
        decoded: Decoded,
    ) -> Self {
        Self {
            inner: Arc::new(InfoInner {
                owner,
                class,
                uid: RwLock::new(uid),
                fields: decoded.fields,
                state: Mutex::new(decoded.state),
                indexed: AtomicBool::new(false),
                extra: RwLock::new(decoded.extra),
            }),
        }
    }

    /// Deep copy. The copy has no uid and is not indexed anywhere, but is
    /// allocated by the same summary so it can be added to it.
    pub fn clone_info(&self) -> Self {
        let extra = self.raw_extra(|extra| extra.and_then(|e| self.inner.class.clone_extra(e)));
        let decoded = Decoded {
            fields: self.inner.fields.clone(),
            state: self.state(),
            extra,
        };
        Self::assemble(
            self.inner.owner.clone(),
            Arc::clone(&self.inner.class),
            None,
            decoded,
        )
    }

    // ── Identity and lifecycle ──────────────────────────────────────

    pub fn uid(&self) -> Option<Arc<str>> {
        self.inner.uid.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Assign the uid. Fails while the record is indexed.
    pub fn set_uid(&self, uid: &str) -> Result<()> {
        if self.is_indexed() {
            return Err(SummaryError::UidInUse(self.uid().as_deref().unwrap_or("").to_string()));
        }
        *self.inner.uid.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::from(uid));
        Ok(())
    }

    /// The summary that allocated this record, if it still exists.
    pub fn summary(&self) -> Option<FolderSummary> {
        self.inner
            .owner
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|shared| FolderSummary { shared })
    }

    pub fn is_indexed(&self) -> bool {
        self.inner.indexed.load(Ordering::Acquire)
    }

    /// Number of live handles to this record.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same record.
    pub fn ptr_eq(a: &MessageInfo, b: &MessageInfo) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn class(&self) -> &Arc<dyn RecordClass> {
        &self.inner.class
    }

    // ── Field access ────────────────────────────────────────────────

    /// Generic accessor, dispatched through the record class.
    pub fn field(&self, id: InfoField) -> FieldValue {
        self.inner.class.field(self, id)
    }

    /// Field access for the shared fields, used by classes that do not
    /// override a given field.
    pub fn default_field(&self, id: InfoField) -> FieldValue {
        let fields = &self.inner.fields;
        match id {
            InfoField::Uid => self.uid().map_or(FieldValue::None, FieldValue::Str),
            InfoField::Subject => FieldValue::from_str_opt(&fields.subject),
            InfoField::From => FieldValue::from_str_opt(&fields.from),
            InfoField::To => FieldValue::from_str_opt(&fields.to),
            InfoField::Cc => FieldValue::from_str_opt(&fields.cc),
            InfoField::MailingList => FieldValue::from_str_opt(&fields.mailing_list),
            InfoField::Flags => FieldValue::Flags(self.flags()),
            InfoField::Size => FieldValue::Size(fields.size),
            InfoField::DateSent => FieldValue::Date(fields.date_sent),
            InfoField::DateReceived => FieldValue::Date(fields.date_received),
            InfoField::MessageId => fields.message_id.map_or(FieldValue::None, FieldValue::MessageId),
            InfoField::References => FieldValue::References(fields.references.clone()),
            InfoField::UserFlags => FieldValue::UserFlags(self.lock_state().user_flags.clone()),
            InfoField::UserTags => FieldValue::UserTags(self.lock_state().user_tags.clone()),
            InfoField::Custom(_) => FieldValue::None,
        }
    }

    pub fn subject(&self) -> Option<Arc<str>> {
        self.field(InfoField::Subject).into_str()
    }

    pub fn from(&self) -> Option<Arc<str>> {
        self.field(InfoField::From).into_str()
    }

    pub fn to(&self) -> Option<Arc<str>> {
        self.field(InfoField::To).into_str()
    }

    pub fn cc(&self) -> Option<Arc<str>> {
        self.field(InfoField::Cc).into_str()
    }

    pub fn mailing_list(&self) -> Option<Arc<str>> {
        self.field(InfoField::MailingList).into_str()
    }

    /// Direct view of the header-derived fields.
    pub fn fields(&self) -> &RecordFields {
        &self.inner.fields
    }

    pub fn size(&self) -> u32 {
        self.inner.fields.size
    }

    pub fn date_sent(&self) -> DateTime<Utc> {
        self.inner.fields.date_sent
    }

    pub fn date_received(&self) -> DateTime<Utc> {
        self.inner.fields.date_received
    }

    pub fn message_id(&self) -> Option<MessageIdHash> {
        self.inner.fields.message_id
    }

    pub fn references(&self) -> &[MessageIdHash] {
        &self.inner.fields.references
    }

    pub fn flags(&self) -> MessageFlags {
        self.lock_state().flags
    }

    pub fn user_flag(&self, name: &str) -> bool {
        self.lock_state().user_flags.get_flag(name)
    }

    pub fn user_tag(&self, name: &str) -> Option<String> {
        self.lock_state().user_tags.get_tag(name).map(str::to_string)
    }

    /// Snapshot of the mutable state.
    pub fn state(&self) -> RecordState {
        self.lock_state().clone()
    }

    /// Run `f` with the extra payload downcast to `T`.
    pub fn with_extra<T: Any, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.inner.extra.read().unwrap_or_else(|e| e.into_inner());
        f(guard.as_ref().and_then(|e| e.downcast_ref::<T>()))
    }

    /// Run `f` with mutable access to the extra payload.
    ///
    /// Extra fields are outside view accounting; call
    /// [`FolderSummary::touch`] if the change must be persisted.
    pub fn with_extra_mut<T: Any, R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut guard = self.inner.extra.write().unwrap_or_else(|e| e.into_inner());
        f(guard.as_mut().and_then(|e| e.downcast_mut::<T>()))
    }

    pub(crate) fn raw_extra<R>(&self, f: impl FnOnce(Option<&Extra>) -> R) -> R {
        let guard = self.inner.extra.read().unwrap_or_else(|e| e.into_inner());
        f(guard.as_ref())
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Update system flags: `new = (old & !mask) | (set & mask)`.
    ///
    /// Returns whether any bit flipped. When the record is indexed, view
    /// counts are adjusted and a change notification fires for bits outside
    /// [`MessageFlags::INTERNAL_MASK`].
    pub fn set_flags(&self, mask: MessageFlags, set: MessageFlags) -> bool {
        self.mutate(|state| state.set_flags(mask, set))
    }

    pub fn set_user_flag(&self, name: &str, value: bool) -> bool {
        self.mutate(|state| state.user_flags.set_flag(name, value))
    }

    pub fn set_user_tag(&self, name: &str, value: Option<&str>) -> bool {
        self.mutate(|state| state.user_tags.set_tag(name, value))
    }

    /// Resynchronize user flags with `other`.
    pub fn set_user_flags_from(&self, other: &UserFlags) -> bool {
        self.mutate(|state| state.user_flags.copy_flags_from(other))
    }

    /// Resynchronize user tags with `other`.
    pub fn set_user_tags_from(&self, other: &UserTags) -> bool {
        self.mutate(|state| state.user_tags.copy_tags_from(other))
    }

    fn mutate(&self, f: impl FnOnce(&mut RecordState) -> bool) -> bool {
        if let Some(shared) = self.inner.owner.as_ref().and_then(Weak::upgrade) {
            return shared.mutate_record(self, f);
        }
        f(&mut self.lock_state())
    }

    // ── Crate-internal bookkeeping ──────────────────────────────────

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RecordState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_indexed(&self, indexed: bool) {
        self.inner.indexed.store(indexed, Ordering::Release);
    }

    pub(crate) fn set_uid_unchecked(&self, uid: Arc<str>) {
        *self.inner.uid.write().unwrap_or_else(|e| e.into_inner()) = Some(uid);
    }

    pub(crate) fn owned_by(&self, shared: &Arc<SummaryShared>) -> bool {
        self.inner
            .owner
            .as_ref()
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(shared)))
    }
}

impl fmt::Debug for MessageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageInfo")
            .field("uid", &self.uid())
            .field("subject", &self.inner.fields.subject)
            .field("flags", &self.flags())
            .field("class", &self.inner.class.name())
            .field("refs", &self.ref_count())
            .finish()
    }
}
