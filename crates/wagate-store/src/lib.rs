//! # wagate-store
//!
//! SQLite-backed persistence for wagate.

pub mod store;

pub use store::{ContactFields, MessageCounts, Store};
