//! On-disk summary files: the binary format, load/save, and summary
//! construction for mbox folders.

pub mod builder;
pub mod format;
pub mod persist;
