//! Store summary: the list of folders in a mail store with their
//! attributes and cached counts.

pub mod info;
pub mod summary;

pub use self::info::{StoreInfo, StoreInfoClass, StoreInfoFlags, StoreInfoState};
pub use self::summary::{StoreHeader, StoreSummary};
