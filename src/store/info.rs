//! Per-folder entries of a [`StoreSummary`](super::StoreSummary).

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bitflags::bitflags;
use once_cell::sync::Lazy;

use crate::model::info::Extra;

bitflags! {
    /// Folder attributes as reported by the backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StoreInfoFlags: u32 {
        /// The folder cannot hold messages.
        const NOSELECT    = 1 << 0;
        /// The folder cannot have subfolders.
        const NOINFERIORS = 1 << 1;
        const CHILDREN    = 1 << 2;
        const NOCHILDREN  = 1 << 3;
        const SUBSCRIBED  = 1 << 4;
        const VIRTUAL     = 1 << 5;
        /// Inbox, Trash, Junk and similar.
        const SYSTEM      = 1 << 6;

        const _ = !0;
    }
}

/// The mutable part of a store info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreInfoState {
    pub flags: StoreInfoFlags,
    /// Unread count, `None` when unknown.
    pub unread: Option<u32>,
    /// Message count, `None` when unknown.
    pub total: Option<u32>,
}

/// Pluggable strategy for the protocol payload of store infos.
pub trait StoreInfoClass: Send + Sync {
    fn name(&self) -> &'static str {
        "base"
    }

    /// Allocate the payload for a new entry.
    fn alloc(&self, _path: &str) -> Option<Extra> {
        None
    }

    /// Called once when the last reference to an entry is dropped.
    fn free(&self, _path: &str, _extra: Option<Extra>) {}

    /// Append class fields after an entry's shared fields.
    fn save_extra(&self, _info: &StoreInfo, _writer: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Read what [`StoreInfoClass::save_extra`] wrote.
    fn load_extra(
        &self,
        path: &str,
        _reader: &mut dyn Read,
        _version: i32,
    ) -> io::Result<Option<Extra>> {
        Ok(self.alloc(path))
    }
}

/// Class with no payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseStoreClass;

impl StoreInfoClass for BaseStoreClass {}

static BASE: Lazy<Arc<dyn StoreInfoClass>> = Lazy::new(|| Arc::new(BaseStoreClass));

pub fn base_store_class() -> Arc<dyn StoreInfoClass> {
    Arc::clone(&BASE)
}

struct StoreInfoInner {
    path: Arc<str>,
    class: Arc<dyn StoreInfoClass>,
    state: Mutex<StoreInfoState>,
    extra: RwLock<Option<Extra>>,
}

impl Drop for StoreInfoInner {
    fn drop(&mut self) {
        let extra = self.extra.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        self.class.free(&self.path, extra);
    }
}

/// Shared handle to one folder entry. Cloning takes a reference.
#[derive(Clone)]
pub struct StoreInfo {
    inner: Arc<StoreInfoInner>,
}

impl StoreInfo {
    pub(crate) fn assemble(
        path: Arc<str>,
        class: Arc<dyn StoreInfoClass>,
        state: StoreInfoState,
        extra: Option<Extra>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInfoInner {
                path,
                class,
                state: Mutex::new(state),
                extra: RwLock::new(extra),
            }),
        }
    }

    /// Folder path, `/`-separated.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub(crate) fn path_arc(&self) -> &Arc<str> {
        &self.inner.path
    }

    /// Last path component.
    pub fn name(&self) -> &str {
        self.inner
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&self.inner.path)
    }

    pub fn flags(&self) -> StoreInfoFlags {
        self.lock_state().flags
    }

    pub fn unread(&self) -> Option<u32> {
        self.lock_state().unread
    }

    pub fn total(&self) -> Option<u32> {
        self.lock_state().total
    }

    pub fn state(&self) -> StoreInfoState {
        *self.lock_state()
    }

    pub fn with_extra<T: Any, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.inner.extra.read().unwrap_or_else(|e| e.into_inner());
        f(guard.as_ref().and_then(|e| e.downcast_ref::<T>()))
    }

    /// Mutable payload access. Call [`StoreSummary::touch`](super::StoreSummary::touch)
    /// if the change must be persisted.
    pub fn with_extra_mut<T: Any, R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut guard = self.inner.extra.write().unwrap_or_else(|e| e.into_inner());
        f(guard.as_mut().and_then(|e| e.downcast_mut::<T>()))
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(a: &StoreInfo, b: &StoreInfo) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn class(&self) -> &Arc<dyn StoreInfoClass> {
        &self.inner.class
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StoreInfoState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreInfo")
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .finish()
    }
}
