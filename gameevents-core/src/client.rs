//! Host-facing client
//!
//! [`GameEvents`] is the object a host application holds. Calls made before
//! [`initialize`](GameEvents::initialize) are queued and replayed once the
//! pipeline is ready, so nothing logged during startup is lost.
//!
//! ```rust,no_run
//! use gameevents_core::{properties, Config, GameEvents};
//!
//! let mut events = GameEvents::with_http(Config::load().unwrap_or_default())
//!     .expect("failed to start client");
//!
//! // Queued until initialize completes
//! events.log_event("app_open", None);
//!
//! events.initialize("gk_live_xxx", false);
//! events.set_user_property("is_premium", true);
//! events.log_event("level_complete", Some(properties([("score", 100.into())])));
//!
//! // Once per frame
//! events.tick();
//!
//! events.shutdown();
//! ```

use std::fmt;
use std::time::Instant;

use crate::capture::SignalSink;
use crate::collaborators::HttpCollaborators;
use crate::config::Config;
use crate::delivery::DeliveryStats;
use crate::error::Result;
use crate::manager::{Collaborators, EventManager, ManagerState};
use crate::preinit::PreInitQueue;
use crate::types::{LogLevel, LogSignal, Properties, PropertyValue, TrackingStatus};

/// Telemetry client service object.
///
/// Every method must be called from the host's coordination thread. Use
/// [`signal_sink`](Self::signal_sink) to report errors from other threads.
pub struct GameEvents {
    manager: EventManager,
    pending: PreInitQueue<EventManager>,
    collaborators: Box<dyn Collaborators>,
}

impl GameEvents {
    pub fn new<C>(config: Config, collaborators: C) -> Self
    where
        C: Collaborators + 'static,
    {
        Self {
            manager: EventManager::new(config.sdk),
            pending: PreInitQueue::new(),
            collaborators: Box::new(collaborators),
        }
    }

    /// Client backed by the SQLite store and HTTP collection endpoint.
    pub fn with_http(config: Config) -> Result<Self> {
        let collaborators = HttpCollaborators::new(config.clone())?;
        Ok(Self::new(config, collaborators))
    }

    /// Start the pipeline and replay calls made before this point.
    ///
    /// Later calls log a warning and do nothing. If the pipeline cannot be
    /// set up, queued calls are kept for a later attempt.
    pub fn initialize(&mut self, api_key: &str, debug_mode: bool) {
        if !self
            .manager
            .initialize(api_key, debug_mode, self.collaborators.as_mut())
        {
            return;
        }

        let replayed = self.pending.drain_and_replay(&mut self.manager);
        tracing::info!(replayed, debug_mode, "Telemetry client initialized");
    }

    pub fn log_event(&mut self, name: &str, parameters: Option<Properties>) {
        if self.manager.is_ready() {
            self.manager.log_event(name, parameters);
            return;
        }
        let name = name.to_string();
        self.defer(move |manager| manager.log_event(&name, parameters));
    }

    pub fn set_user_property(&mut self, key: &str, value: impl Into<PropertyValue>) {
        let value = value.into();
        if self.manager.is_ready() {
            self.manager.set_user_property(key, value);
            return;
        }
        let key = key.to_string();
        self.defer(move |manager| manager.set_user_property(&key, value));
    }

    pub fn set_user_properties(&mut self, properties: Properties) {
        if self.manager.is_ready() {
            self.manager.set_user_properties(properties);
            return;
        }
        self.defer(move |manager| manager.set_user_properties(properties));
    }

    /// Ask the platform for tracking authorization.
    ///
    /// `callback` receives the status on a later [`tick`](Self::tick). Works
    /// before initialization.
    pub fn request_tracking_authorization<F>(&self, callback: F)
    where
        F: FnOnce(TrackingStatus) + Send + 'static,
    {
        let authorizer = self.collaborators.tracking_authorizer();
        self.manager
            .request_tracking_authorization(authorizer.as_ref(), callback);
    }

    /// Register a handler for attribution JSON from the backend.
    pub fn on_attribution_data_received<F>(&mut self, handler: F)
    where
        F: FnMut(&str) + 'static,
    {
        self.manager.on_attribution_data_received(handler);
    }

    /// Run background results and the recurring flush.
    pub fn tick(&mut self) -> usize {
        self.manager.tick()
    }

    pub fn tick_at(&mut self, now: Instant) -> usize {
        self.manager.tick_at(now)
    }

    pub fn on_pause(&mut self, paused: bool) {
        self.manager.on_pause(paused);
    }

    pub fn on_quit(&mut self) {
        self.manager.on_quit();
    }

    /// Report a host log message. Only errors, asserts and exceptions are
    /// recorded.
    pub fn capture_log(&mut self, condition: &str, stack_trace: &str, level: LogLevel) {
        self.manager
            .capture_log(LogSignal::new(condition, stack_trace, level));
    }

    /// Thread-safe sink for error signals, panic hook and `tracing` layer.
    pub fn signal_sink(&self) -> SignalSink {
        self.manager.signal_sink()
    }

    /// Flush, then stop background delivery.
    pub fn shutdown(&mut self) {
        if self.manager.is_ready() {
            self.manager.shutdown();
        }
        if !self.pending.is_empty() {
            tracing::warn!(
                pending = self.pending.len(),
                "Shutting down with calls still waiting for initialization"
            );
        }
    }

    pub fn state(&self) -> ManagerState {
        self.manager.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.manager.is_ready()
    }

    pub fn manager(&self) -> &EventManager {
        &self.manager
    }

    pub fn delivery_stats(&self) -> &DeliveryStats {
        self.manager.delivery_stats()
    }

    /// Calls waiting for initialization
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn defer<F>(&mut self, call: F)
    where
        F: FnOnce(&mut EventManager) + 'static,
    {
        if !self.pending.enqueue(call) {
            tracing::warn!("Call dropped: pre-init queue already replayed");
        }
    }
}

impl fmt::Debug for GameEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameEvents")
            .field("manager", &self.manager)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
