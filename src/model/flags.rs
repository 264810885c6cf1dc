//! System message flags.

use bitflags::bitflags;

bitflags! {
    /// The 32-bit system flag word stored on every message info.
    ///
    /// The low 16 bits are message state visible to users and collaborators;
    /// a change there fires a change notification. The high 16 bits
    /// ([`MessageFlags::INTERNAL_MASK`]) are bookkeeping bits that never do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u32 {
        const ANSWERED     = 1 << 0;
        const DELETED      = 1 << 1;
        const DRAFT        = 1 << 2;
        const FLAGGED      = 1 << 3;
        const SEEN         = 1 << 4;
        const ATTACHMENTS  = 1 << 5;
        const ANSWERED_ALL = 1 << 6;
        const JUNK         = 1 << 7;
        const SECURE       = 1 << 8;
        const NOTJUNK      = 1 << 9;
        const FORWARDED    = 1 << 10;

        /// Set by a folder when the record needs to be written back.
        const FOLDER_FLAGGED = 1 << 16;
        /// The junk state was taught to a filter and must not be relearned.
        const JUNK_LEARN     = 1 << 17;

        const INTERNAL_MASK = 0xffff_0000;

        // Keep unknown bits from collaborators and older files intact.
        const _ = !0;
    }
}

macro_rules! flag_impl {
    (fn $name:ident, $val:expr) => {
        pub const fn $name(&self) -> bool {
            self.contains($val)
        }
    };
}

impl MessageFlags {
    flag_impl!(fn is_seen, MessageFlags::SEEN);
    flag_impl!(fn is_deleted, MessageFlags::DELETED);
    flag_impl!(fn is_junk, MessageFlags::JUNK);
    flag_impl!(fn is_flagged, MessageFlags::FLAGGED);
    flag_impl!(fn is_draft, MessageFlags::DRAFT);
    flag_impl!(fn is_answered, MessageFlags::ANSWERED);

    /// Deleted or junk records are excluded from the visible count.
    pub const fn is_hidden(&self) -> bool {
        self.intersects(MessageFlags::DELETED.union(MessageFlags::JUNK))
    }

    /// Unread means not seen and not hidden.
    pub const fn is_unread(&self) -> bool {
        !self.is_seen() && !self.is_hidden()
    }

    /// Resolve a flag name as used in search expressions.
    ///
    /// Matching is case-insensitive and accepts a few common aliases.
    pub fn from_flag_name(name: &str) -> Option<Self> {
        let flag = match name.to_ascii_lowercase().as_str() {
            "answered" | "replied" => Self::ANSWERED,
            "deleted" | "trashed" => Self::DELETED,
            "draft" => Self::DRAFT,
            "flagged" => Self::FLAGGED,
            "seen" | "read" => Self::SEEN,
            "attachments" => Self::ATTACHMENTS,
            "answered-all" | "answered_all" => Self::ANSWERED_ALL,
            "junk" | "spam" => Self::JUNK,
            "secure" => Self::SECURE,
            "notjunk" | "not-junk" => Self::NOTJUNK,
            "forwarded" | "passed" => Self::FORWARDED,
            _ => return None,
        };
        Some(flag)
    }

    /// Bits that are visible to collaborators (everything outside the internal mask).
    pub const fn public_bits(&self) -> u32 {
        self.bits() & !Self::INTERNAL_MASK.bits()
    }
}
