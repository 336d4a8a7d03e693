//! # gameevents-core
//!
//! Embedded telemetry client for games and apps.
//!
//! This library provides:
//! - A host-facing client that queues calls made before initialization
//! - Session and user state with bounded user properties
//! - A durable SQLite event store and a background HTTP deliverer
//! - Advertising identifier resolution and install attribution
//! - Capture of panics and error logs as `app_exception` events
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! All state lives on the host's coordination thread:
//! - **Host calls** reach the [`EventManager`] directly, or through the
//!   pre-init queue until it is ready
//! - **Events** are appended to the [`EventStore`] and delivered by a
//!   background sender after each flush
//! - **Background results** (identifier, attribution, delivery reports)
//!   come back through the [`Dispatcher`] and apply on the next tick
//!
//! ## Example
//!
//! ```rust,no_run
//! use gameevents_core::{Config, GameEvents};
//!
//! let config = Config::load().expect("failed to load config");
//! let mut events = GameEvents::with_http(config).expect("failed to start client");
//! events.initialize("gk_live_xxx", false);
//! events.log_event("tutorial_complete", None);
//! events.tick();
//! ```

// Re-export commonly used items at the crate root
pub use client::GameEvents;
pub use collaborators::HttpCollaborators;
pub use config::Config;
pub use db::{Database, StoreStats};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use manager::{Collaborators, EventManager, ManagerState, Services};
pub use store::{BatchSource, EventStore, LocalEventStore};
pub use types::*;

// Public modules
pub mod attribution;
pub mod capture;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod delivery;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod exceptions;
pub mod executor;
pub mod identifier;
pub mod logging;
pub mod manager;
pub mod preinit;
pub mod session;
pub mod store;
pub mod types;
