//! Process-wide pool of interned header strings.
//!
//! Subjects and addresses repeat heavily across a folder (mailing lists,
//! threads), so message infos share one `Arc<str>` per distinct value.
//! A record hands its strings back through [`release`] when it is destroyed;
//! [`prune`] sweeps values that were interned but never stored in a record.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

static POOL: Lazy<Mutex<HashSet<Arc<str>>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Return the shared copy of `value`, inserting it on first use.
pub fn intern(value: &str) -> Arc<str> {
    let mut pool = POOL.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = pool.get(value) {
        return Arc::clone(existing);
    }
    let shared: Arc<str> = Arc::from(value);
    pool.insert(Arc::clone(&shared));
    shared
}

/// Intern an optional value, mapping empty strings to `None`.
pub fn intern_opt(value: Option<&str>) -> Option<Arc<str>> {
    value.filter(|v| !v.is_empty()).map(intern)
}

/// Give back one reference to a pooled string.
///
/// The entry leaves the pool when the caller held the last reference
/// outside it. Values that are not the pooled copy are simply dropped.
pub fn release(value: Arc<str>) {
    let mut pool = POOL.lock().unwrap_or_else(|e| e.into_inner());
    if Arc::strong_count(&value) == 2 {
        let pooled = pool.get(&*value).is_some_and(|p| Arc::ptr_eq(p, &value));
        if pooled {
            pool.remove(&*value);
        }
    }
    // Counts only drop under the lock, so two releases cannot both miss.
    drop(value);
}

/// Whether `value` currently has a pooled copy.
pub fn is_pooled(value: &str) -> bool {
    POOL.lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains(value)
}

/// Drop every pooled string that only the pool still references.
///
/// Returns the number of entries released.
pub fn prune() -> usize {
    let mut pool = POOL.lock().unwrap_or_else(|e| e.into_inner());
    let before = pool.len();
    pool.retain(|s| Arc::strong_count(s) > 1);
    before - pool.len()
}
