//! Database layer for gameevents
//!
//! This module provides the local event store using SQLite with:
//! - Schema migrations
//! - Repository methods for appending, leasing and acknowledging events
//! - The persisted client state (durable user id)

pub mod repo;
pub mod schema;

pub use repo::{Database, StoreStats};
