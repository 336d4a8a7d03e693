//! Production collaborators
//!
//! [`HttpCollaborators`] owns a tokio runtime and wires the SQLite store,
//! the HTTP collection client and its background sender, and the HTTP
//! attribution client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::attribution::HttpAttributionClient;
use crate::config::Config;
use crate::db::Database;
use crate::delivery::{CollectorClient, EventSender};
use crate::error::{Error, Result};
use crate::identifier::{AlwaysAuthorized, IdentifierSource, TrackingAuthorizer};
use crate::manager::{Collaborators, DeliveryReporter, Services};
use crate::store::{BatchSource, LocalEventStore};

const WORKER_THREADS: usize = 2;

/// Collaborators backed by SQLite and the HTTP collection endpoint.
pub struct HttpCollaborators {
    config: Config,
    database_path: PathBuf,
    identifier: IdentifierSource,
    authorizer: Arc<dyn TrackingAuthorizer>,
    runtime: Option<Runtime>,
}

impl HttpCollaborators {
    /// Start the background runtime. The store is opened at initialize.
    pub fn new(config: Config) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("gameevents-worker")
            .enable_all()
            .build()?;

        Ok(Self {
            config,
            database_path: Config::database_path(),
            identifier: IdentifierSource::default(),
            authorizer: Arc::new(AlwaysAuthorized),
            runtime: Some(runtime),
        })
    }

    /// Use a store at `path` instead of the XDG data dir.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Use a platform identifier provider.
    pub fn with_identifier(mut self, identifier: IdentifierSource) -> Self {
        self.identifier = identifier;
        self
    }

    /// Use a platform tracking authorization prompt.
    pub fn with_tracking_authorizer<A>(mut self, authorizer: A) -> Self
    where
        A: TrackingAuthorizer + 'static,
    {
        self.authorizer = Arc::new(authorizer);
        self
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| Error::Config("background runtime already stopped".to_string()))
    }
}

impl Collaborators for HttpCollaborators {
    fn build(&mut self, api_key: &str, reporter: DeliveryReporter) -> Result<Services> {
        let runtime = self.runtime()?.handle().clone();
        let collector = &self.config.collector;

        let transport = CollectorClient::new(collector.clone(), api_key)?;
        let attribution = HttpAttributionClient::new(collector, api_key, runtime.clone())?;

        let db = Database::open(&self.database_path)?;
        db.migrate()?;
        let store = Arc::new(LocalEventStore::new(db, collector.max_buffered_events));

        let delivery = EventSender::new(
            Arc::clone(&store) as Arc<dyn BatchSource>,
            transport,
            store.wake_handle(),
            collector.batch_size,
        )
        .on_report(move |report| reporter(report))
        .spawn(&runtime);

        tracing::info!(
            database = %self.database_path.display(),
            server = %collector.base_url(),
            "Event pipeline ready"
        );

        Ok(Services {
            store,
            attribution: Arc::new(attribution),
            identifier: self.identifier.clone(),
            executor: Arc::new(runtime),
            delivery: Some(delivery),
        })
    }

    fn tracking_authorizer(&self) -> Arc<dyn TrackingAuthorizer> {
        Arc::clone(&self.authorizer)
    }
}

impl Drop for HttpCollaborators {
    fn drop(&mut self) {
        // Blocking identifier lookups may never return; do not wait on them.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStore;

    fn noop_reporter() -> DeliveryReporter {
        Arc::new(|_| {})
    }

    #[test]
    fn test_build_opens_store_at_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.db");
        let mut collaborators = HttpCollaborators::new(Config::default())
            .unwrap()
            .with_database_path(&path);

        let services = collaborators.build("gk_test", noop_reporter()).unwrap();
        services.store.save_user_id("u-1").unwrap();
        assert!(path.exists());
        assert!(services.delivery.is_some());
    }

    #[test]
    fn test_build_rejects_empty_api_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut collaborators = HttpCollaborators::new(Config::default())
            .unwrap()
            .with_database_path(dir.path().join("events.db"));

        assert!(collaborators.build("", noop_reporter()).is_err());
    }
}
