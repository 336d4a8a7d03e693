//! Event delivery to the collection endpoint
//!
//! Delivery follows a "local-first" principle:
//! - Events are always persisted in the local store first
//! - Sending happens on a background task after a flush wakes it
//! - Network failures never block the host; failed batches stay in the store
//!
//! ## Configuration
//!
//! ```toml
//! [collector]
//! server_url = "https://collect.gameevents.io"
//! batch_size = 50
//! timeout_secs = 30
//! max_retries = 3
//! ```
//!
//! The API key is supplied by the host at `initialize` time.

mod client;
mod sender;

pub(crate) use client::build_http_client;
pub use client::{CollectorClient, EventBatch, EventsResponse};
pub use sender::{DeliveryHandle, DeliveryReport, DeliveryStats, EventSender};

use std::future::Future;

use crate::error::Result;

/// Transport for event batches.
///
/// Implementations handle the specifics of reaching the endpoint; the
/// sender only needs to know whether a batch was accepted.
pub trait Transport: Send + Sync + 'static {
    /// Send a batch, retrying transient failures as the transport sees fit.
    fn send(&self, batch: &EventBatch) -> impl Future<Output = Result<EventsResponse>> + Send;
}
