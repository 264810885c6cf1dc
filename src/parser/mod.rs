//! Message parsing: header decoding, the streaming MBOX parser and
//! in-memory messages. These are the three sources records are built from.

pub mod header;
pub mod mbox;
pub mod message;
