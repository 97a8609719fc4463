//! Domain types shared across the request lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers, for haversine distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// The closed set of service categories offered on the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    /// Cleaning
    Limpeza,
    /// Gardening
    Jardinagem,
    /// Painting
    Pintura,
    /// Electrical work
    Eletrica,
    /// Plumbing
    Encanamento,
    /// Carpentry
    Marcenaria,
}

impl ServiceCategory {
    /// Every category, in display order.
    pub const ALL: [Self; 6] = [
        Self::Limpeza,
        Self::Jardinagem,
        Self::Pintura,
        Self::Eletrica,
        Self::Encanamento,
        Self::Marcenaria,
    ];

    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Limpeza => "limpeza",
            Self::Jardinagem => "jardinagem",
            Self::Pintura => "pintura",
            Self::Eletrica => "eletrica",
            Self::Encanamento => "encanamento",
            Self::Marcenaria => "marcenaria",
        }
    }
}

impl std::fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A geographic coordinate (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Degrees north
    pub latitude: f64,
    /// Degrees east
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in kilometers (haversine).
    #[must_use]
    pub fn distance_km(&self, other: Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }
}

/// A provider candidate for the active request.
///
/// Instances are immutable snapshots: a refresh produces entirely new ones,
/// never an incremental merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProvider {
    /// Backend id
    pub id: String,
    /// Display name
    pub name: String,
    /// Avatar URI, if the provider has one
    #[serde(default)]
    pub avatar: Option<String>,
    /// Average rating, 0-5
    pub rating: f64,
    /// Number of reviews behind the rating
    pub review_count: u32,
    /// Distance from the requesting user, derived client-side
    #[serde(default)]
    pub distance_km: f64,
    /// Estimated arrival time in minutes
    pub estimated_time_min: u32,
    /// Quoted price for the category
    pub price: f64,
    /// Category the provider serves
    pub category: ServiceCategory,
    /// Provider's current position
    pub location: Coordinate,
    /// Whether the provider is currently accepting requests
    pub is_online: bool,
    /// Contact phone, when shared
    #[serde(default)]
    pub phone: Option<String>,
}

/// Where the active request is in its lifecycle.
///
/// Exactly one request is active per session; the phase drives which
/// operations are valid and which timers are armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    /// No active request
    #[default]
    Idle,
    /// Request created, polling for nearby providers
    Searching,
    /// Discovery settled, provider list shown
    ProvidersFound,
    /// User picked a provider
    ProviderSelected,
    /// Selection confirmed, waiting for dispatch
    Confirmed,
    /// Provider en route / working
    InProgress,
    /// Service finished
    Completed,
    /// Request cancelled by the user
    Cancelled,
}

impl RequestPhase {
    /// Wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::ProvidersFound => "providers_found",
            Self::ProviderSelected => "provider_selected",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal phases auto-reset back to [`RequestPhase::Idle`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether `cancel` is a valid operation here.
    #[must_use]
    pub const fn can_cancel(self) -> bool {
        matches!(
            self,
            Self::Searching
                | Self::ProvidersFound
                | Self::ProviderSelected
                | Self::Confirmed
                | Self::InProgress
        )
    }

    /// Phases in which the provider list may be non-empty.
    #[must_use]
    pub const fn lists_providers(self) -> bool {
        matches!(self, Self::Searching | Self::ProvidersFound)
    }

    /// Phases in which a provider selection is held.
    #[must_use]
    pub const fn has_selection(self) -> bool {
        matches!(
            self,
            Self::ProviderSelected | Self::Confirmed | Self::InProgress
        )
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record tying one client's request to one selected provider.
///
/// Timestamps are appended as the lifecycle advances; a successful
/// transition never rolls one back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMatch {
    /// Request id. Provisional (client-generated) until the backend's
    /// create call acknowledges with the authoritative id.
    pub id: String,
    /// The requesting client
    pub client_id: String,
    /// Selected provider; empty string until a provider is selected
    pub provider_id: String,
    /// Requested category
    pub category: ServiceCategory,
    /// Short request title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Mirrors the lifecycle phase at the time of the last mutation
    pub status: RequestPhase,
    /// Where the client asked for the service
    pub client_location: Coordinate,
    /// Street address for the visit
    pub address: String,
    /// Price of the selected provider
    pub estimated_price: Option<f64>,
    /// Settled price; set on completion
    pub final_price: Option<f64>,
    /// Backend's estimate of time-to-first-response, minutes
    pub estimated_response_min: Option<u32>,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// When the client confirmed the selection
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the provider was dispatched
    pub started_at: Option<DateTime<Utc>>,
    /// When the service finished
    pub completed_at: Option<DateTime<Utc>>,
}
