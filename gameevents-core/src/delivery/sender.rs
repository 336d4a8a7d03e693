//! Background sender draining the local store
//!
//! One [`EventSender`] task runs per store. Each wake it leases batches of
//! persisted events in append order and sends them:
//! - accepted batches are acknowledged (deleted from the store)
//! - failed batches are released (kept, attempt count incremented) and the
//!   pass stops until the next wake
//!
//! Because a single task owns the lease, a batch is never in flight twice.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::store::BatchSource;

use super::client::EventBatch;
use super::Transport;

/// Outcome of one delivery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Batches sent (successfully or not)
    pub batches: usize,
    /// Events accepted by the endpoint
    pub accepted: usize,
    /// Events rejected by the endpoint and discarded
    pub rejected: usize,
    /// Error that ended the pass, if any
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Delivery statistics accumulated across passes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Total events sent successfully
    pub events_sent: usize,
    /// Total events rejected by server
    pub events_rejected: usize,
    /// Number of API calls made
    pub api_calls: usize,
    /// Number of passes that ended in a failure
    pub api_failures: usize,
}

impl DeliveryStats {
    pub fn apply(&mut self, report: &DeliveryReport) {
        self.events_sent += report.accepted;
        self.events_rejected += report.rejected;
        self.api_calls += report.batches;
        if report.error.is_some() {
            self.api_failures += 1;
        }
    }
}

type ReportFn = Arc<dyn Fn(DeliveryReport) + Send + Sync>;

/// Sends persisted events through a [`Transport`].
pub struct EventSender<T> {
    source: Arc<dyn BatchSource>,
    transport: T,
    wake: Arc<Notify>,
    batch_size: usize,
    on_report: Option<ReportFn>,
}

impl<T: Transport> EventSender<T> {
    /// Create a sender that wakes on `wake` (the store's flush notifier).
    pub fn new(
        source: Arc<dyn BatchSource>,
        transport: T,
        wake: Arc<Notify>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            transport,
            wake,
            batch_size: batch_size.max(1),
            on_report: None,
        }
    }

    /// Call `f` with the report of every pass that sent something.
    ///
    /// `f` runs on the sender's task, not on the coordination thread.
    pub fn on_report<F>(mut self, f: F) -> Self
    where
        F: Fn(DeliveryReport) + Send + Sync + 'static,
    {
        self.on_report = Some(Arc::new(f));
        self
    }

    /// Send everything currently persisted, stopping at the first failure.
    pub async fn deliver_pending(&self) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        loop {
            let leased = match self.source.lease_batch(self.batch_size) {
                Ok(leased) => leased,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read events from local store");
                    report.error = Some(e.to_string());
                    break;
                }
            };
            if leased.is_empty() {
                break;
            }

            let ids: Vec<i64> = leased.iter().map(|e| e.id).collect();
            let batch = EventBatch::new(leased.into_iter().map(|e| e.record).collect());
            report.batches += 1;

            match self.transport.send(&batch).await {
                Ok(response) => {
                    report.accepted += response.accepted;
                    report.rejected += response.rejected;
                    tracing::debug!(
                        events = ids.len(),
                        accepted = response.accepted,
                        rejected = response.rejected,
                        "Delivered event batch"
                    );
                    // Rejected events would be rejected again; discard them too.
                    if let Err(e) = self.source.acknowledge(&ids) {
                        // Stop here: leasing again would resend this batch.
                        tracing::error!(error = %e, "Failed to acknowledge delivered events");
                        report.error = Some(e.to_string());
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        events = ids.len(),
                        error = %e,
                        "Failed to deliver event batch, keeping it for retry"
                    );
                    if let Err(release_err) = self.source.release(&ids) {
                        tracing::warn!(error = %release_err, "Failed to record delivery attempt");
                    }
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        report
    }

    /// Run the sender on `runtime` until the returned handle shuts it down.
    pub fn spawn(self, runtime: &Handle) -> DeliveryHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let wake = Arc::clone(&self.wake);
        let task = runtime.spawn(self.run(shutdown_rx));
        DeliveryHandle {
            wake,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(batch_size = self.batch_size, "Event sender started");

        loop {
            tokio::select! {
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.deliver_pending().await;
            if report.batches > 0 {
                if let Some(on_report) = &self.on_report {
                    on_report(report);
                }
            }
        }

        tracing::debug!("Event sender stopped");
    }
}

/// Handle to a running [`EventSender`] task.
pub struct DeliveryHandle {
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DeliveryHandle {
    /// Ask the sender to run a pass now
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the sender after its current pass.
    ///
    /// Events not yet delivered stay in the store for the next launch.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::delivery::EventsResponse;
    use crate::error::{Error, Result};
    use crate::store::{EventStore, LocalEventStore};
    use crate::types::{EventRecord, Properties};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transport that succeeds or fails per scripted outcome and records
    /// every accepted event name.
    #[derive(Clone, Default)]
    struct ScriptedTransport {
        outcomes: Arc<Mutex<VecDeque<bool>>>,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn with_outcomes(outcomes: &[bool]) -> Self {
            let t = Self::default();
            t.outcomes.lock().unwrap().extend(outcomes.iter().copied());
            t
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, batch: &EventBatch) -> impl Future<Output = Result<EventsResponse>> + Send {
            let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
            let names: Vec<String> = batch.events.iter().map(|e| e.event.clone()).collect();
            let delivered = Arc::clone(&self.delivered);
            async move {
                if ok {
                    let accepted = names.len();
                    delivered.lock().unwrap().extend(names);
                    Ok(EventsResponse {
                        accepted,
                        rejected: 0,
                    })
                } else {
                    Err(Error::Delivery("offline".to_string()))
                }
            }
        }
    }

    fn create_store() -> Arc<LocalEventStore> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(LocalEventStore::new(db, 1000))
    }

    fn add(store: &LocalEventStore, names: &[&str]) {
        for name in names {
            store
                .add_event(EventRecord::new(*name, "s", "u", Properties::new(), None))
                .unwrap();
        }
        store.flush().unwrap();
    }

    fn sender(store: &Arc<LocalEventStore>, transport: ScriptedTransport, batch: usize) -> EventSender<ScriptedTransport> {
        EventSender::new(
            Arc::clone(store) as Arc<dyn BatchSource>,
            transport,
            store.wake_handle(),
            batch,
        )
    }

    #[tokio::test]
    async fn test_delivers_all_in_batches() {
        let store = create_store();
        add(&store, &["a", "b", "c", "d", "e"]);
        let transport = ScriptedTransport::default();

        let report = sender(&store, transport.clone(), 2).deliver_pending().await;

        assert!(report.is_success());
        assert_eq!(report.batches, 3);
        assert_eq!(report.accepted, 5);
        assert_eq!(transport.delivered(), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(store.database().count_events().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_retains_batch_and_stops_pass() {
        let store = create_store();
        add(&store, &["a", "b", "c"]);
        let transport = ScriptedTransport::with_outcomes(&[true, false]);
        let sender = sender(&store, transport.clone(), 1);

        let report = sender.deliver_pending().await;
        assert_eq!(report.batches, 2);
        assert_eq!(report.accepted, 1);
        assert!(report.error.is_some());
        assert_eq!(store.database().count_events().unwrap(), 2);

        // Next pass resends the retained batch once, never the delivered one
        let report = sender.deliver_pending().await;
        assert!(report.is_success());
        assert_eq!(transport.delivered(), vec!["a", "b", "c"]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending_events, 0);
    }

    #[tokio::test]
    async fn test_empty_store_sends_nothing() {
        let store = create_store();
        let transport = ScriptedTransport::default();
        let report = sender(&store, transport.clone(), 10).deliver_pending().await;
        assert_eq!(report, DeliveryReport::default());
        assert!(transport.delivered().is_empty());
    }

    #[test]
    fn test_stats_accumulate_reports() {
        let mut stats = DeliveryStats::default();
        stats.apply(&DeliveryReport {
            batches: 2,
            accepted: 10,
            rejected: 1,
            error: None,
        });
        stats.apply(&DeliveryReport {
            batches: 1,
            accepted: 0,
            rejected: 0,
            error: Some("offline".to_string()),
        });
        assert_eq!(stats.events_sent, 10);
        assert_eq!(stats.events_rejected, 1);
        assert_eq!(stats.api_calls, 3);
        assert_eq!(stats.api_failures, 1);
    }

    #[test]
    fn test_spawned_sender_wakes_on_flush() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = create_store();
        let transport = ScriptedTransport::default();
        let (tx, rx) = std::sync::mpsc::channel();

        let handle = sender(&store, transport.clone(), 10)
            .on_report(move |report| {
                let _ = tx.send(report);
            })
            .spawn(runtime.handle());

        add(&store, &["session_start"]);

        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(transport.delivered(), vec!["session_start"]);

        handle.shutdown();
        runtime.shutdown_timeout(Duration::from_secs(1));
    }
}
