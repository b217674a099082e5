//! Relational and file-backed persistence: channel messages, the usage
//! ledger, bug tickets, per-user rules, and service credentials.
//!
//! All SQLite stores share one connection behind a `Mutex` and tolerate
//! concurrent readers; writers serialize through the lock. Schema init is
//! idempotent and runs on every startup.

pub mod bugs;
pub mod creds;
pub mod db;
pub mod error;
pub mod messages;
pub mod rules;
pub mod usage;

pub use error::{Result, StoreError};
