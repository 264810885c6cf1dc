//! User flags and user tags: the open-ended, per-message attribute sets.
//!
//! Both are small owned-vector maps keyed by exact string match. Lookups are
//! linear scans; messages rarely carry more than a handful of entries.

/// A set of named boolean flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFlags {
    names: Vec<String>,
}

impl UserFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is set.
    pub fn get_flag(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Set or clear `name`. Returns whether the set changed.
    pub fn set_flag(&mut self, name: &str, value: bool) -> bool {
        let pos = self.names.iter().position(|n| n == name);
        match (pos, value) {
            (Some(i), false) => {
                self.names.remove(i);
                true
            }
            (None, true) => {
                self.names.push(name.to_string());
                true
            }
            _ => false,
        }
    }

    /// Make this set equal to `other`. Returns whether anything changed.
    pub fn copy_flags_from(&mut self, other: &UserFlags) -> bool {
        let before = self.names.len();
        self.names.retain(|n| other.get_flag(n));
        let mut changed = self.names.len() != before;
        for name in &other.names {
            if !self.get_flag(name) {
                self.names.push(name.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for UserFlags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut flags = UserFlags::new();
        for name in iter {
            let name = name.into();
            flags.set_flag(&name, true);
        }
        flags
    }
}

/// A map of named string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTags {
    entries: Vec<(String, String)>,
}

impl UserTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of tag `name`, if set.
    pub fn get_tag(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set `name` to `value`, or delete it when `value` is `None`.
    ///
    /// Returns whether the map changed; writing an equal value is a no-op.
    pub fn set_tag(&mut self, name: &str, value: Option<&str>) -> bool {
        let pos = self.entries.iter().position(|(n, _)| n == name);
        match (pos, value) {
            (Some(i), None) => {
                self.entries.remove(i);
                true
            }
            (Some(i), Some(v)) => {
                if self.entries[i].1 == v {
                    false
                } else {
                    self.entries[i].1 = v.to_string();
                    true
                }
            }
            (None, Some(v)) => {
                self.entries.push((name.to_string(), v.to_string()));
                true
            }
            (None, None) => false,
        }
    }

    /// Make this map equal to `other`. Returns whether anything changed.
    pub fn copy_tags_from(&mut self, other: &UserTags) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| other.get_tag(n).is_some());
        let mut changed = self.entries.len() != before;
        for (name, value) in &other.entries {
            if self.set_tag(name, Some(value)) {
                changed = true;
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UserTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = UserTags::new();
        for (name, value) in iter {
            let (name, value) = (name.into(), value.into());
            tags.set_tag(&name, Some(&value));
        }
        tags
    }
}
