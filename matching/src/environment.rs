//! Injected collaborators for the request lifecycle.
//!
//! Everything that touches the outside world - device location, the REST
//! backend, time, ids - sits behind a trait here, so the reducer stays a
//! pure function and tests script every boundary.

use crate::discovery::ProviderDirectory;
use crate::types::{Coordinate, RequestPhase, ServiceCategory, ServiceProvider};
use async_trait::async_trait;
use chama_core::environment::{Clock, IdGenerator};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A failed backend call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Non-2xx response
    #[error("request failed with status {0}")]
    Status(u16),

    /// Could not reach the backend at all
    #[error("transport error: {0}")]
    Transport(String),
}

/// A failed device-location query.
#[derive(Debug, Clone, Error)]
pub enum LocationError {
    /// The user denied the location permission
    #[error("location permission denied")]
    PermissionDenied,

    /// The position query itself failed
    #[error("position unavailable: {0}")]
    Unavailable(String),
}

/// Device location access.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Ask the platform for the location permission.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::PermissionDenied`] when the user declines.
    async fn request_permission(&self) -> Result<(), LocationError>;

    /// Query the current device position.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::Unavailable`] when no fix can be obtained.
    async fn current_position(&self) -> Result<Coordinate, LocationError>;
}

/// Payload for the backend's create-request call.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ServiceRequestDraft {
    /// Requested category
    pub category: ServiceCategory,
    /// Short request title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Where the service is needed
    pub location: Coordinate,
    /// Street address for the visit
    pub address: String,
}

/// The backend's acknowledgement of a created request.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct CreatedRequest {
    /// Authoritative request id
    pub id: String,
    /// Estimated minutes until providers start responding
    #[serde(default)]
    pub estimated_response_min: Option<u32>,
}

/// The REST backend, as the lifecycle consumes it.
///
/// All calls are opaque async operations: JSON in, JSON out, error on
/// non-2xx. The lifecycle never retries them - a single failure surfaces
/// immediately.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// `POST /services/request`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the request is rejected or unreachable.
    async fn create_request(&self, draft: ServiceRequestDraft) -> Result<CreatedRequest, ApiError>;

    /// `GET /services/nearby`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the query fails.
    async fn nearby_providers(
        &self,
        origin: Coordinate,
        category: ServiceCategory,
    ) -> Result<Vec<ServiceProvider>, ApiError>;

    /// `POST /services/{id}/accept`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the backend refuses the acceptance.
    async fn accept_request(&self, service_id: &str, provider_id: &str) -> Result<(), ApiError>;

    /// `POST /services/{id}/reject`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the call fails.
    async fn reject_request(&self, service_id: &str, provider_id: &str) -> Result<(), ApiError>;

    /// `PUT /services/{id}/status`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the status update is rejected.
    async fn update_status(&self, service_id: &str, status: RequestPhase) -> Result<(), ApiError>;

    /// Push the client's location to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the call fails.
    async fn update_location(&self, location: Coordinate) -> Result<(), ApiError>;
}

/// The fixed delays and intervals driving the lifecycle's timers.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleTiming {
    /// Simulated latency between starting a search and listing providers
    pub discovery_delay: Duration,
    /// Simulated latency between confirmation and the provider being en route
    pub dispatch_delay: Duration,
    /// How long terminal phases linger before auto-resetting to idle
    pub auto_reset_delay: Duration,
    /// Provider re-poll cadence while searching
    pub refresh_interval: Duration,
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        Self {
            discovery_delay: Duration::from_secs(3),
            dispatch_delay: Duration::from_secs(2),
            auto_reset_delay: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(10),
        }
    }
}

/// Dependencies injected into the lifecycle reducer.
#[derive(Clone)]
pub struct MatchingEnvironment {
    /// The signed-in client's id
    pub client_id: String,
    /// Device location access
    pub location: Arc<dyn LocationProvider>,
    /// REST backend
    pub api: Arc<dyn MarketplaceApi>,
    /// Cache-backed provider discovery
    pub directory: ProviderDirectory,
    /// Time source for timestamps
    pub clock: Arc<dyn Clock>,
    /// Provisional-id source
    pub ids: Arc<dyn IdGenerator>,
    /// Timer configuration
    pub timing: LifecycleTiming,
}

impl MatchingEnvironment {
    /// Assemble an environment with default timing.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        location: Arc<dyn LocationProvider>,
        api: Arc<dyn MarketplaceApi>,
        directory: ProviderDirectory,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            location,
            api,
            directory,
            clock,
            ids,
            timing: LifecycleTiming::default(),
        }
    }

    /// Override the timer configuration.
    #[must_use]
    pub const fn with_timing(mut self, timing: LifecycleTiming) -> Self {
        self.timing = timing;
        self
    }
}

impl std::fmt::Debug for MatchingEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEnvironment")
            .field("client_id", &self.client_id)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}
