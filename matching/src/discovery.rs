//! Cache-backed provider discovery.
//!
//! Nearby lookups are rate-limited upstream, so results are memoized in an
//! [`EphemeralCache`] keyed by category and a coarse location grid. Every
//! refresh replaces the lifecycle's provider list wholesale; ranking happens
//! here, on the client, against the exact origin.

use crate::environment::{ApiError, MarketplaceApi};
use crate::types::{Coordinate, ServiceCategory, ServiceProvider};
use chama_cache::{CacheOptions, EphemeralCache};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Tuning for [`ProviderDirectory`].
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    /// Providers farther than this from the origin are dropped
    pub max_radius_km: f64,
    /// How long a nearby result may be served from cache
    pub cache_ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_radius_km: 10.0,
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Finds and ranks nearby providers for a category.
#[derive(Clone)]
pub struct ProviderDirectory {
    api: Arc<dyn MarketplaceApi>,
    cache: EphemeralCache<Vec<ServiceProvider>>,
    config: DiscoveryConfig,
}

impl ProviderDirectory {
    /// Create a directory with default tuning.
    #[must_use]
    pub fn new(api: Arc<dyn MarketplaceApi>, cache: EphemeralCache<Vec<ServiceProvider>>) -> Self {
        Self {
            api,
            cache,
            config: DiscoveryConfig::default(),
        }
    }

    /// Override the tuning.
    #[must_use]
    pub const fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Nearby providers for `category`, ranked for display.
    ///
    /// Offline providers and providers beyond the radius are dropped;
    /// `distance_km` is recomputed from the exact `origin`; the result is
    /// sorted by distance, ties broken by rating (best first).
    ///
    /// # Errors
    ///
    /// Propagates the backend failure when the list is not cached and the
    /// fetch fails. No retry.
    pub async fn nearby(
        &self,
        origin: Coordinate,
        category: ServiceCategory,
    ) -> Result<Vec<ServiceProvider>, ApiError> {
        let key = Self::cache_key(origin, category);
        let api = Arc::clone(&self.api);

        let fetched = self
            .cache
            .get_or_fetch(&key, CacheOptions::with_ttl(self.config.cache_ttl), || {
                let api = Arc::clone(&api);
                async move { api.nearby_providers(origin, category).await }
            })
            .await?;

        Ok(self.rank(origin, fetched))
    }

    /// Drop entries cached for `category` around `origin`.
    pub async fn invalidate(&self, origin: Coordinate, category: ServiceCategory) {
        self.cache.invalidate(&Self::cache_key(origin, category)).await;
    }

    fn rank(&self, origin: Coordinate, providers: Vec<ServiceProvider>) -> Vec<ServiceProvider> {
        let mut ranked: Vec<ServiceProvider> = providers
            .into_iter()
            .filter(|p| p.is_online)
            .map(|mut p| {
                p.distance_km = origin.distance_km(p.location);
                p
            })
            .filter(|p| p.distance_km <= self.config.max_radius_km)
            .collect();

        ranked.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(Ordering::Equal)
                .then(b.rating.partial_cmp(&a.rating).unwrap_or(Ordering::Equal))
        });

        ranked
    }

    /// Cache key on a ~1km grid: nearby refreshes from the same block share
    /// an entry instead of hammering the endpoint.
    fn cache_key(origin: Coordinate, category: ServiceCategory) -> String {
        format!(
            "nearby:{category}:{:.2}:{:.2}",
            origin.latitude, origin.longitude
        )
    }
}

impl std::fmt::Debug for ProviderDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDirectory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
