//! Advertising identifier and tracking authorization collaborators
//!
//! Two provider shapes are supported:
//!
//! - [`BlockingIdentifierProvider`]: a synchronous platform call. The
//!   manager captures a [`PlatformHandle`] on the coordination thread, then
//!   runs `resolve` on a background executor.
//! - [`CallbackIdentifierProvider`]: the platform delivers the result
//!   through a callback on a thread of its choosing.
//!
//! Either way the result reaches the manager through the dispatcher.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::TrackingStatus;

/// Platform context that may only be obtained on the coordination thread
/// (for example an activity reference) and is then moved into the
/// background lookup.
#[derive(Default)]
pub struct PlatformHandle(Option<Box<dyn Any + Send>>);

impl PlatformHandle {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Take the captured value back out, if it has type `T`.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.0?.downcast::<T>().ok().map(|b| *b)
    }
}

impl fmt::Debug for PlatformHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlatformHandle")
            .field(&if self.0.is_some() { "captured" } else { "none" })
            .finish()
    }
}

/// What a platform lookup returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingInfo {
    /// `None` when the platform has no identifier or limits ad tracking
    pub advertising_id: Option<String>,
    pub tracking_enabled: bool,
}

/// Outcome of identifier resolution as applied by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierResolution {
    pub advertising_id: Option<String>,
    pub tracking_enabled: bool,
    pub error: Option<String>,
}

impl IdentifierResolution {
    pub fn resolved(info: AdvertisingInfo) -> Self {
        Self {
            advertising_id: info.advertising_id.filter(|id| !id.is_empty()),
            tracking_enabled: info.tracking_enabled,
            error: None,
        }
    }

    /// A failed lookup. Tracking stays enabled: nothing said otherwise.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            advertising_id: None,
            tracking_enabled: true,
            error: Some(error.into()),
        }
    }

    pub fn from_result(result: Result<AdvertisingInfo>) -> Self {
        match result {
            Ok(info) => Self::resolved(info),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// Synchronous identifier lookup. `resolve` may block and is never called
/// on the coordination thread.
pub trait BlockingIdentifierProvider: Send + Sync {
    /// Capture coordination-thread-only context before the lookup is
    /// dispatched. Defaults to no context.
    fn capture_handle(&self) -> PlatformHandle {
        PlatformHandle::none()
    }

    fn resolve(&self, handle: PlatformHandle) -> Result<AdvertisingInfo>;
}

pub type IdentifierCallback = Box<dyn FnOnce(IdentifierResolution) + Send + 'static>;

/// Asynchronous identifier lookup reporting through a callback.
pub trait CallbackIdentifierProvider: Send + Sync {
    fn request(&self, callback: IdentifierCallback);
}

/// The identifier provider the manager was given.
#[derive(Clone)]
pub enum IdentifierSource {
    Blocking(Arc<dyn BlockingIdentifierProvider>),
    Callback(Arc<dyn CallbackIdentifierProvider>),
}

impl IdentifierSource {
    pub fn blocking<P: BlockingIdentifierProvider + 'static>(provider: P) -> Self {
        IdentifierSource::Blocking(Arc::new(provider))
    }

    pub fn callback<P: CallbackIdentifierProvider + 'static>(provider: P) -> Self {
        IdentifierSource::Callback(Arc::new(provider))
    }
}

impl Default for IdentifierSource {
    fn default() -> Self {
        IdentifierSource::blocking(UnavailableIdentifierProvider)
    }
}

impl fmt::Debug for IdentifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierSource::Blocking(_) => f.write_str("IdentifierSource::Blocking"),
            IdentifierSource::Callback(_) => f.write_str("IdentifierSource::Callback"),
        }
    }
}

/// Provider for platforms without an advertising identifier.
///
/// Always fails, so attribution runs with an empty identifier and records
/// an organic install.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableIdentifierProvider;

impl BlockingIdentifierProvider for UnavailableIdentifierProvider {
    fn resolve(&self, _handle: PlatformHandle) -> Result<AdvertisingInfo> {
        Err(Error::Identifier(format!(
            "advertising identifier not available on {}",
            std::env::consts::OS
        )))
    }
}

// ============================================
// Tracking authorization
// ============================================

pub type TrackingCallback = Box<dyn FnOnce(TrackingStatus) + Send + 'static>;

/// Platform app-tracking authorization prompt.
pub trait TrackingAuthorizer: Send + Sync {
    fn request(&self, callback: TrackingCallback);
}

/// Authorizer for platforms without a tracking prompt: always authorized.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAuthorized;

impl TrackingAuthorizer for AlwaysAuthorized {
    fn request(&self, callback: TrackingCallback) {
        callback(TrackingStatus::Authorized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_handle_round_trip() {
        let handle = PlatformHandle::new(42u32);
        assert!(!handle.is_none());
        assert_eq!(handle.into_inner::<u32>(), Some(42));

        let handle = PlatformHandle::new("activity");
        assert_eq!(handle.into_inner::<u32>(), None);

        assert!(PlatformHandle::none().is_none());
    }

    #[test]
    fn test_failed_resolution_keeps_tracking_enabled() {
        let resolution = IdentifierResolution::from_result(
            UnavailableIdentifierProvider.resolve(PlatformHandle::none()),
        );
        assert!(resolution.advertising_id.is_none());
        assert!(resolution.tracking_enabled);
        assert!(resolution.error.unwrap().contains("not available"));
    }

    #[test]
    fn test_empty_identifier_treated_as_missing() {
        let resolution = IdentifierResolution::resolved(AdvertisingInfo {
            advertising_id: Some(String::new()),
            tracking_enabled: false,
        });
        assert!(resolution.advertising_id.is_none());
        assert!(!resolution.tracking_enabled);
        assert!(resolution.error.is_none());
    }

    #[test]
    fn test_always_authorized() {
        let (tx, rx) = std::sync::mpsc::channel();
        AlwaysAuthorized.request(Box::new(move |status: TrackingStatus| {
            let _ = tx.send(status);
        }));
        assert_eq!(rx.recv().unwrap(), TrackingStatus::Authorized);
        assert_eq!(TrackingStatus::Authorized.code(), 3);
    }
}
