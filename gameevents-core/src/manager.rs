//! Event manager
//!
//! The only component that mutates session state or decides when the store
//! flushes. It lives on the host's coordination thread. Background work
//! (identifier lookup, attribution, delivery reports) comes back to it
//! through its [`Dispatcher`], drained by [`EventManager::tick`].
//!
//! ```text
//!   Uninitialized ──initialize──► Initializing ──► Ready
//!        │  (collaborators fail: stays Uninitialized)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::attribution::{AttributionClient, AttributionRequest};
use crate::capture::SignalSink;
use crate::config::SdkConfig;
use crate::delivery::{DeliveryHandle, DeliveryReport, DeliveryStats};
use crate::device;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::exceptions::ExceptionDeduper;
use crate::executor::Executor;
use crate::identifier::{IdentifierResolution, IdentifierSource, TrackingAuthorizer};
use crate::session::{new_id, truncate_chars, SessionContext};
use crate::store::EventStore;
use crate::types::{
    event_names, property_keys, LogSignal, Properties, PropertyValue, TrackingStatus,
};

/// Period of the recurring flush.
///
/// Fixed: `SdkConfig::send_interval_secs` is accepted but does not drive it.
pub const FLUSH_PERIOD: Duration = Duration::from_secs(10);

/// Lifecycle of the manager. There is no way back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Callback carrying delivery reports back to the manager.
pub type DeliveryReporter = Arc<dyn Fn(DeliveryReport) + Send + Sync>;

/// Collaborators bound to one API key.
pub struct Services {
    pub store: Arc<dyn EventStore>,
    pub attribution: Arc<dyn AttributionClient>,
    pub identifier: IdentifierSource,
    pub executor: Arc<dyn Executor>,
    /// Background deliverer, stopped on shutdown
    pub delivery: Option<DeliveryHandle>,
}

/// Factory for the manager's collaborators.
pub trait Collaborators {
    /// Construct the store, deliverer and lookups bound to `api_key`.
    ///
    /// `reporter` should receive every delivery report.
    fn build(&mut self, api_key: &str, reporter: DeliveryReporter) -> Result<Services>;

    /// Tracking authorization prompt; usable before initialization.
    fn tracking_authorizer(&self) -> Arc<dyn TrackingAuthorizer>;
}

type AttributionListener = Box<dyn FnMut(&str)>;

macro_rules! diag {
    ($self:ident, $($arg:tt)+) => {
        if $self.debug_mode {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// Session state, store access and background result handling.
pub struct EventManager {
    state: ManagerState,
    limits: SdkConfig,
    debug_mode: bool,
    dispatcher: Dispatcher<EventManager>,
    session: Option<SessionContext>,
    services: Option<Services>,
    exceptions: ExceptionDeduper,
    attribution_listeners: Vec<AttributionListener>,
    next_flush: Option<Instant>,
    delivery_stats: DeliveryStats,
}

impl EventManager {
    pub fn new(limits: SdkConfig) -> Self {
        Self {
            state: ManagerState::Uninitialized,
            limits,
            debug_mode: false,
            dispatcher: Dispatcher::new(),
            session: None,
            services: None,
            exceptions: ExceptionDeduper::new(),
            attribution_listeners: Vec::new(),
            next_flush: None,
            delivery_stats: DeliveryStats::default(),
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ManagerState::Ready
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    pub fn limits(&self) -> &SdkConfig {
        &self.limits
    }

    pub fn delivery_stats(&self) -> &DeliveryStats {
        &self.delivery_stats
    }

    /// Queue feeding this manager from other threads
    pub fn dispatcher(&self) -> &Dispatcher<EventManager> {
        &self.dispatcher
    }

    /// Thread-safe entry point for error signals
    pub fn signal_sink(&self) -> SignalSink {
        SignalSink::new(self.dispatcher.clone())
    }

    /// When the recurring flush next fires
    pub fn next_flush(&self) -> Option<Instant> {
        self.next_flush
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Bring the pipeline up. Returns `true` if this call made it ready.
    ///
    /// A second call logs a warning and does nothing. If collaborators
    /// cannot be built the manager stays `Uninitialized`.
    pub fn initialize(
        &mut self,
        api_key: &str,
        debug_mode: bool,
        collaborators: &mut dyn Collaborators,
    ) -> bool {
        if self.state != ManagerState::Uninitialized {
            tracing::warn!(state = ?self.state, "Already initialized");
            return false;
        }

        self.debug_mode = debug_mode;
        diag!(self, "Event manager initializing");

        let services = match collaborators.build(api_key, self.delivery_reporter()) {
            Ok(services) => services,
            Err(e) => {
                tracing::error!(error = %e, "Failed to set up event pipeline");
                return false;
            }
        };

        self.state = ManagerState::Initializing;

        let user_id = resolve_user_id(services.store.as_ref());
        let session = SessionContext::start(user_id, &self.limits);
        tracing::info!(
            session_id = %session.session_id(),
            user_id = %session.user_id(),
            "Session started"
        );
        self.session = Some(session);
        self.services = Some(services);

        self.append(event_names::SESSION_START, Some(device::device_info()));
        self.flush();

        self.request_advertising_id();
        self.next_flush = Some(Instant::now() + FLUSH_PERIOD);

        self.state = ManagerState::Ready;
        true
    }

    /// Run dispatched work and the recurring flush. Call once per frame.
    pub fn tick(&mut self) -> usize {
        self.tick_at(Instant::now())
    }

    /// [`tick`](Self::tick) with an explicit clock.
    pub fn tick_at(&mut self, now: Instant) -> usize {
        let dispatcher = self.dispatcher.clone();
        let ran = dispatcher.drain(self);

        if let Some(due) = self.next_flush {
            if now >= due {
                self.flush();
                self.next_flush = Some(now + FLUSH_PERIOD);
            }
        }
        ran
    }

    /// Host paused or resumed. Pausing flushes.
    pub fn on_pause(&mut self, paused: bool) {
        if paused {
            self.flush();
        }
    }

    /// Host is quitting.
    pub fn on_quit(&mut self) {
        self.flush();
    }

    /// Flush and stop background delivery.
    ///
    /// Undelivered events stay in the store for the next launch.
    pub fn shutdown(&mut self) {
        self.flush();
        self.next_flush = None;
        if let Some(delivery) = self.services.as_mut().and_then(|s| s.delivery.take()) {
            delivery.shutdown();
        }
        tracing::debug!("Event manager shut down");
    }

    // ============================================
    // Host API
    // ============================================

    /// Record an event. Empty names are ignored; long names are truncated.
    pub fn log_event(&mut self, name: &str, parameters: Option<Properties>) {
        if !self.is_ready() {
            tracing::warn!(event = name, "log_event before initialization, ignoring");
            return;
        }
        if name.is_empty() {
            tracing::debug!("Ignoring event with empty name");
            return;
        }
        let parameters = parameters.map(|params| storable_parameters(name, params));
        if let Some(params) = &parameters {
            if params.len() > self.limits.max_property_count {
                tracing::debug!(
                    event = name,
                    count = params.len(),
                    "Event has more parameters than the property limit"
                );
            }
        }
        self.append(name, parameters);
    }

    pub fn set_user_property(&mut self, key: &str, value: PropertyValue) {
        match self.session.as_mut() {
            Some(session) => {
                session.set_property(key, value);
            }
            None => tracing::warn!(key, "set_user_property before initialization, ignoring"),
        }
    }

    /// Apply each entry as if set individually.
    pub fn set_user_properties(&mut self, properties: Properties) {
        for (key, value) in properties {
            self.set_user_property(&key, value);
        }
    }

    pub fn on_attribution_data_received<F>(&mut self, listener: F)
    where
        F: FnMut(&str) + 'static,
    {
        self.attribution_listeners.push(Box::new(listener));
    }

    /// Ask for tracking authorization; `callback` runs on a later tick.
    pub fn request_tracking_authorization<F>(&self, authorizer: &dyn TrackingAuthorizer, callback: F)
    where
        F: FnOnce(TrackingStatus) + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        authorizer.request(Box::new(move |status: TrackingStatus| {
            dispatcher.enqueue(move |_: &mut EventManager| callback(status));
        }));
    }

    /// Record an error signal once per distinct condition and stack trace.
    pub fn capture_log(&mut self, signal: LogSignal) {
        if !signal.level.is_captured() {
            return;
        }
        if !self.is_ready() {
            tracing::debug!(level = %signal.level, "Error signal before initialization, ignoring");
            return;
        }
        if !self.exceptions.observe(&signal) {
            return;
        }

        let mut params = Properties::new();
        params.insert("error_message".to_string(), signal.condition.into());
        params.insert("stack_trace".to_string(), signal.stack_trace.into());
        params.insert("log_type".to_string(), signal.level.as_str().into());

        self.append(event_names::APP_EXCEPTION, Some(params));
        self.flush();
    }

    // ============================================
    // Background results
    // ============================================

    fn request_advertising_id(&mut self) {
        let Some(services) = &self.services else {
            return;
        };
        diag!(self, "Requesting advertising identifier");

        let dispatcher = self.dispatcher.clone();
        match &services.identifier {
            IdentifierSource::Blocking(provider) => {
                // Platform context must be taken on this thread
                let handle = provider.capture_handle();
                let provider = Arc::clone(provider);
                services.executor.spawn_blocking(Box::new(move || {
                    let resolution = IdentifierResolution::from_result(provider.resolve(handle));
                    dispatcher.enqueue(move |manager: &mut EventManager| {
                        manager.handle_advertising_id(resolution)
                    });
                }));
            }
            IdentifierSource::Callback(provider) => {
                provider.request(Box::new(move |resolution: IdentifierResolution| {
                    dispatcher.enqueue(move |manager: &mut EventManager| {
                        manager.handle_advertising_id(resolution)
                    });
                }));
            }
        }
    }

    /// Apply an identifier lookup result and start the attribution check.
    pub fn handle_advertising_id(&mut self, resolution: IdentifierResolution) {
        diag!(
            self,
            advertising_id = ?resolution.advertising_id,
            tracking_enabled = resolution.tracking_enabled,
            error = ?resolution.error,
            "Advertising identifier received"
        );

        let IdentifierResolution {
            advertising_id,
            tracking_enabled,
            ..
        } = resolution;

        if let Some(id) = &advertising_id {
            self.set_user_property(property_keys::ADVERTISING_ID, id.clone().into());
        }
        self.set_user_property(property_keys::TRACKING_ENABLED, tracking_enabled.into());

        let (Some(session), Some(services)) = (&self.session, &self.services) else {
            return;
        };

        // Runs without an identifier too, recording an organic install
        let request = AttributionRequest {
            advertising_id: advertising_id.unwrap_or_default(),
            user_id: session.user_id().to_string(),
            platform: device::platform().to_string(),
            session_id: session.session_id().to_string(),
        };
        let dispatcher = self.dispatcher.clone();
        services.attribution.check(
            request,
            Box::new(move |data: Option<String>| {
                dispatcher.enqueue(move |manager: &mut EventManager| {
                    manager.handle_attribution(data)
                });
            }),
        );
    }

    fn handle_attribution(&mut self, data: Option<String>) {
        match data.filter(|d| !d.is_empty()) {
            Some(json) => {
                diag!(self, attribution = %json, "Attribution data received");
                for listener in &mut self.attribution_listeners {
                    listener(&json);
                }
            }
            None => diag!(self, "Attribution check returned no data"),
        }
    }

    fn record_delivery(&mut self, report: DeliveryReport) {
        self.delivery_stats.apply(&report);
        tracing::debug!(
            accepted = report.accepted,
            rejected = report.rejected,
            error = ?report.error,
            "Delivery pass finished"
        );
    }

    fn delivery_reporter(&self) -> DeliveryReporter {
        let dispatcher = self.dispatcher.clone();
        Arc::new(move |report: DeliveryReport| {
            dispatcher.enqueue(move |manager: &mut EventManager| manager.record_delivery(report));
        })
    }

    // ============================================
    // Store access
    // ============================================

    fn append(&mut self, name: &str, parameters: Option<Properties>) {
        let (Some(session), Some(services)) = (&self.session, &self.services) else {
            return;
        };
        let name = truncate_chars(name, self.limits.max_event_name_length);
        let record = session.record(name, parameters);
        if let Err(e) = services.store.add_event(record) {
            tracing::warn!(event = name, error = %e, "Failed to store event");
        }
    }

    /// Best effort: a failed flush is logged, and nothing assumes success.
    fn flush(&self) {
        let Some(services) = &self.services else {
            return;
        };
        if let Err(e) = services.store.flush() {
            tracing::warn!(error = %e, "Failed to flush event store");
        }
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManager")
            .field("state", &self.state)
            .field("session", &self.session)
            .field("pending_jobs", &self.dispatcher.pending())
            .finish_non_exhaustive()
    }
}

/// Drop parameters JSON cannot represent (NaN, infinities); keep the rest.
fn storable_parameters(event: &str, mut params: Properties) -> Properties {
    params.retain(|key, value| {
        if value.is_finite() {
            return true;
        }
        tracing::debug!(event, key = key.as_str(), "Dropping non-finite event parameter");
        false
    });
    params
}

/// Stored user id, or a new one persisted on first launch.
///
/// If the store cannot be read the id is used for this session only, so a
/// stored id is never overwritten.
fn resolve_user_id(store: &dyn EventStore) -> String {
    match store.user_id() {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            let user_id = new_id();
            if let Err(e) = store.save_user_id(&user_id) {
                tracing::warn!(error = %e, "Failed to persist new user id");
            }
            user_id
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read user id, using a temporary one");
            new_id()
        }
    }
}
