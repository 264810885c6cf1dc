//! `foldersummary`: a reference-counted mail folder summary cache.
//!
//! A [`FolderSummary`](summary::FolderSummary) keeps the metadata of every
//! message in a folder (subject, addresses, flags, threading references,
//! user flags and tags) so listing, searching and flag changes never touch
//! the raw message store. Named views keep live total, visible, unread,
//! deleted and junk counts, and the whole index persists to a versioned
//! binary file.

pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod parser;
pub mod search;
pub mod store;
pub mod summary;
