//! Record model: message infos, their flags and tags, and record classes.

pub mod address;
pub mod class;
pub mod flags;
pub mod info;
pub mod message_id;
pub mod pool;
pub mod tags;
