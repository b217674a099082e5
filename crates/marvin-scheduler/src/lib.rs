//! Reminder persistence and the background delivery engine.
//!
//! Time-based reminders are pushed by a 15-second polling loop that checks
//! target presence through the IRC callback before sending. Join-based
//! reminders are pulled: the IRC client posts to `/irc/join-check` when a
//! user joins and the store hands back (and marks delivered) any matches.

pub mod db;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

pub use engine::{Deliverer, ReminderEngine};
pub use error::{Result, SchedulerError};
pub use store::ReminderStore;
pub use types::{Recurrence, Reminder, ReminderStatus, ReminderType};
