//! Durable catalog of Projects/Agents/Runs plus an append-only Event log.

pub mod models;
pub mod store;

pub use models::*;
pub use store::JournalStore;
