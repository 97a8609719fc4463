//! Scriptable doubles for the request lifecycle's collaborators.
//!
//! Each mock starts in a "happy" configuration and exposes toggles for the
//! failure paths, plus call recorders for assertions.

use crate::mocks::{SequentialIdGenerator, test_clock};
use async_trait::async_trait;
use chama_cache::storage::{DurableStorage, StorageError};
use chama_cache::{CacheConfig, EphemeralCache};
use chama_matching::{
    ApiError, Coordinate, CreatedRequest, LocationError, LocationProvider, MarketplaceApi,
    MatchingEnvironment, ProviderDirectory, RequestPhase, ServiceCategory, ServiceProvider,
    ServiceRequestDraft,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Praça da Sé, São Paulo - the default test origin.
pub const TEST_ORIGIN: Coordinate = Coordinate::new(-23.5505, -46.6333);

/// A device location double.
///
/// Defaults to a fix at [`TEST_ORIGIN`]; can be told to deny the permission
/// or fail the position query.
#[derive(Debug)]
pub struct MockLocationProvider {
    position: Mutex<Option<Coordinate>>,
    deny_permission: AtomicBool,
}

impl Default for MockLocationProvider {
    fn default() -> Self {
        Self {
            position: Mutex::new(Some(TEST_ORIGIN)),
            deny_permission: AtomicBool::new(false),
        }
    }
}

impl MockLocationProvider {
    /// A provider that produces fixes at `position`
    #[must_use]
    pub fn at(position: Coordinate) -> Self {
        Self {
            position: Mutex::new(Some(position)),
            deny_permission: AtomicBool::new(false),
        }
    }

    /// Make `request_permission` fail from now on
    pub fn deny_permission(&self) {
        self.deny_permission.store(true, Ordering::SeqCst);
    }

    /// Make `current_position` fail from now on
    pub fn lose_fix(&self) {
        *lock(&self.position) = None;
    }
}

#[async_trait]
impl LocationProvider for MockLocationProvider {
    async fn request_permission(&self) -> Result<(), LocationError> {
        if self.deny_permission.load(Ordering::SeqCst) {
            Err(LocationError::PermissionDenied)
        } else {
            Ok(())
        }
    }

    async fn current_position(&self) -> Result<Coordinate, LocationError> {
        lock(&self.position)
            .ok_or_else(|| LocationError::Unavailable("no fix".to_string()))
    }
}

/// A marketplace backend double.
///
/// Serves a configured provider list, assigns request ids `req-1`, `req-2`,
/// ... and records status updates for assertions. Each endpoint can be
/// failed independently.
#[derive(Debug, Default)]
pub struct MockMarketplaceApi {
    providers: Mutex<Vec<ServiceProvider>>,
    fail_create: AtomicBool,
    fail_nearby: AtomicBool,
    fail_accept: AtomicBool,
    fail_status: AtomicBool,
    next_request: AtomicUsize,
    nearby_calls: AtomicUsize,
    created: Mutex<Vec<ServiceRequestDraft>>,
    status_updates: Mutex<Vec<(String, RequestPhase)>>,
}

impl MockMarketplaceApi {
    /// A backend serving `providers` from its nearby endpoint
    #[must_use]
    pub fn with_providers(providers: Vec<ServiceProvider>) -> Self {
        Self {
            providers: Mutex::new(providers),
            ..Self::default()
        }
    }

    /// Fail `create_request` from now on
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Fail `nearby_providers` from now on
    pub fn fail_nearby(&self) {
        self.fail_nearby.store(true, Ordering::SeqCst);
    }

    /// Fail `accept_request` from now on
    pub fn fail_accept(&self) {
        self.fail_accept.store(true, Ordering::SeqCst);
    }

    /// Fail `update_status` from now on
    pub fn fail_status(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    /// How many nearby queries reached the backend (cache misses)
    #[must_use]
    pub fn nearby_calls(&self) -> usize {
        self.nearby_calls.load(Ordering::SeqCst)
    }

    /// The drafts passed to `create_request`
    #[must_use]
    pub fn created_drafts(&self) -> Vec<ServiceRequestDraft> {
        lock(&self.created).clone()
    }

    /// The `(service_id, status)` pairs passed to `update_status`
    #[must_use]
    pub fn status_updates(&self) -> Vec<(String, RequestPhase)> {
        lock(&self.status_updates).clone()
    }
}

#[async_trait]
impl MarketplaceApi for MockMarketplaceApi {
    async fn create_request(&self, draft: ServiceRequestDraft) -> Result<CreatedRequest, ApiError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Status(503));
        }
        lock(&self.created).push(draft);
        let n = self.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedRequest {
            id: format!("req-{n}"),
            estimated_response_min: Some(5),
        })
    }

    async fn nearby_providers(
        &self,
        _origin: Coordinate,
        category: ServiceCategory,
    ) -> Result<Vec<ServiceProvider>, ApiError> {
        self.nearby_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_nearby.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("nearby unreachable".to_string()));
        }
        Ok(lock(&self.providers)
            .iter()
            .filter(|p| p.category == category)
            .cloned()
            .collect())
    }

    async fn accept_request(&self, _service_id: &str, _provider_id: &str) -> Result<(), ApiError> {
        if self.fail_accept.load(Ordering::SeqCst) {
            Err(ApiError::Status(409))
        } else {
            Ok(())
        }
    }

    async fn reject_request(&self, _service_id: &str, _provider_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn update_status(&self, service_id: &str, status: RequestPhase) -> Result<(), ApiError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(ApiError::Status(500));
        }
        lock(&self.status_updates).push((service_id.to_string(), status));
        Ok(())
    }

    async fn update_location(&self, _location: Coordinate) -> Result<(), ApiError> {
        Ok(())
    }
}

/// An in-memory durable key-value store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: tokio::sync::Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// A fresh, empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail from now on
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Snapshot of the stored entries
    pub async fn contents(&self) -> HashMap<String, String> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Three deterministic providers around `origin` for `category`.
///
/// Ids `"1"`, `"2"`, `"3"` with prices 50, 75 and 90, all online - close
/// enough for radius filtering, far enough apart for a stable distance
/// ranking (1 nearest, 3 farthest).
#[must_use]
pub fn sample_providers(origin: Coordinate, category: ServiceCategory) -> Vec<ServiceProvider> {
    let provider = |id: &str, name: &str, d_lat: f64, rating: f64, reviews: u32, price: f64| {
        ServiceProvider {
            id: id.to_string(),
            name: name.to_string(),
            avatar: None,
            rating,
            review_count: reviews,
            distance_km: 0.0,
            estimated_time_min: 15,
            price,
            category,
            location: Coordinate::new(origin.latitude + d_lat, origin.longitude),
            is_online: true,
            phone: Some("+55 11 99999-0000".to_string()),
        }
    };

    vec![
        provider("1", "Maria Silva", 0.005, 4.8, 127, 50.0),
        provider("2", "João Santos", 0.010, 4.5, 84, 75.0),
        provider("3", "Ana Costa", 0.020, 4.9, 203, 90.0),
    ]
}

/// Random providers around `origin`, for volume and property tests.
#[must_use]
pub fn synthesize_providers(
    origin: Coordinate,
    category: ServiceCategory,
    count: usize,
) -> Vec<ServiceProvider> {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    (0..count)
        .map(|i| ServiceProvider {
            id: format!("gen-{i}"),
            name: format!("Prestador {i}"),
            avatar: None,
            rating: rng.gen_range(3.0..5.0),
            review_count: rng.gen_range(0..500),
            distance_km: 0.0,
            estimated_time_min: rng.gen_range(5..60),
            price: rng.gen_range(30.0..150.0),
            category,
            location: Coordinate::new(
                origin.latitude + rng.gen_range(-0.05..0.05),
                origin.longitude + rng.gen_range(-0.05..0.05),
            ),
            is_online: rng.gen_bool(0.8),
            phone: None,
        })
        .collect()
}

/// A fully wired environment over the mocks, with default timing.
///
/// Returns the environment together with the API handle so tests can script
/// failures and inspect calls.
#[must_use]
pub fn test_environment() -> (MatchingEnvironment, Arc<MockMarketplaceApi>) {
    let api = Arc::new(MockMarketplaceApi::with_providers(sample_providers(
        TEST_ORIGIN,
        ServiceCategory::Limpeza,
    )));
    let clock = Arc::new(test_clock());
    let cache = EphemeralCache::new(
        CacheConfig::default().with_namespace("nearby-test"),
        clock.clone(),
    );
    let directory = ProviderDirectory::new(api.clone(), cache);

    let env = MatchingEnvironment::new(
        "client-1",
        Arc::new(MockLocationProvider::default()),
        api.clone(),
        directory,
        clock,
        Arc::new(SequentialIdGenerator::new()),
    );

    (env, api)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_api_serves_only_the_requested_category() {
        let mut providers = sample_providers(TEST_ORIGIN, ServiceCategory::Limpeza);
        providers.extend(sample_providers(TEST_ORIGIN, ServiceCategory::Pintura));
        let api = MockMarketplaceApi::with_providers(providers);

        let result = api
            .nearby_providers(TEST_ORIGIN, ServiceCategory::Pintura)
            .await
            .unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|p| p.category == ServiceCategory::Pintura));
        assert_eq!(api.nearby_calls(), 1);
    }

    #[tokio::test]
    async fn mock_api_assigns_sequential_request_ids() {
        let api = MockMarketplaceApi::default();
        let draft = ServiceRequestDraft {
            category: ServiceCategory::Limpeza,
            title: "t".to_string(),
            description: "d".to_string(),
            location: TEST_ORIGIN,
            address: "a".to_string(),
        };

        let first = api.create_request(draft.clone()).await.unwrap();
        let second = api.create_request(draft).await.unwrap();
        assert_eq!(first.id, "req-1");
        assert_eq!(second.id, "req-2");
        assert_eq!(api.created_drafts().len(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_fail_the_right_endpoint() {
        let api = MockMarketplaceApi::default();
        api.fail_accept();

        assert!(api.accept_request("req-1", "1").await.is_err());
        assert!(api.reject_request("req-1", "1").await.is_ok());
        assert!(api.update_status("req-1", RequestPhase::Cancelled).await.is_ok());
    }

    #[test]
    fn synthesized_providers_scatter_around_the_origin() {
        let providers = synthesize_providers(TEST_ORIGIN, ServiceCategory::Eletrica, 25);
        assert_eq!(providers.len(), 25);
        for provider in &providers {
            assert_eq!(provider.category, ServiceCategory::Eletrica);
            assert!((provider.location.latitude - TEST_ORIGIN.latitude).abs() < 0.1);
            assert!(provider.rating >= 3.0 && provider.rating <= 5.0);
        }
    }
}
