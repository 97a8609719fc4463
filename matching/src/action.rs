//! Inputs to the lifecycle reducer.

use crate::types::{Coordinate, ServiceCategory, ServiceProvider};

/// Everything that can happen to the request lifecycle.
///
/// Three families share the enum: commands the UI invokes, feedback produced
/// by asynchronous work (network, location), and timer ticks. Feedback and
/// ticks are validated against the current phase on arrival - a late result
/// that would contradict a newer phase is discarded, never applied.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchingAction {
    // ------------------------------------------------------------------
    // Commands (UI facing)
    // ------------------------------------------------------------------
    /// Ask the device for permission and a position fix
    AcquireLocation,

    /// The device reported a new position (e.g. from the map screen)
    UpdateLocation {
        /// The new device coordinate
        location: Coordinate,
    },

    /// Create a service request and start searching for providers
    RequestService {
        /// Requested category
        category: ServiceCategory,
        /// Short request title
        title: String,
        /// Free-text description
        description: String,
        /// Street address for the visit
        address: String,
    },

    /// Re-fetch the provider list now (also fired by the refresh timer)
    RefreshProviders,

    /// Pick a provider from the listed candidates
    SelectProvider {
        /// Id of the provider to select
        provider_id: String,
    },

    /// Confirm the selected provider
    ConfirmService,

    /// Cancel the active request
    CancelService,

    /// Mark the in-progress service as done
    CompleteService,

    /// Clear everything back to idle immediately
    Reset,

    // ------------------------------------------------------------------
    // Feedback from asynchronous work
    // ------------------------------------------------------------------
    /// The device produced a position fix
    LocationResolved {
        /// The acquired coordinate
        location: Coordinate,
    },

    /// Permission was denied or the position query failed
    LocationFailed {
        /// Platform error detail, for the log
        reason: String,
    },

    /// The backend acknowledged the create call
    RequestAccepted {
        /// Authoritative request id
        request_id: String,
        /// Estimated minutes until providers respond
        estimated_response_min: Option<u32>,
    },

    /// The create call failed
    RequestFailed {
        /// Backend error detail
        reason: String,
    },

    /// A provider refresh came back
    ProvidersLoaded {
        /// The new candidate list, replacing the old one wholesale
        providers: Vec<ServiceProvider>,
    },

    /// A provider refresh failed
    ProvidersFailed {
        /// Backend error detail
        reason: String,
    },

    /// The backend accepted the confirmation
    ConfirmAcknowledged,

    /// The backend rejected the confirmation
    ConfirmRejected {
        /// Backend error detail
        reason: String,
    },

    /// A cancel/complete status sync failed (the local phase stands)
    StatusSyncFailed {
        /// Backend error detail
        reason: String,
    },

    /// Realtime: a listed provider toggled online/offline
    ProviderStatusChanged {
        /// The provider whose status changed
        provider_id: String,
        /// Whether the provider is now accepting requests
        online: bool,
    },

    /// Realtime: a provider answered the active request
    ServiceResponseReceived {
        /// The answered request
        service_id: String,
        /// The responding provider
        provider_id: String,
        /// `true` for accept, `false` for reject
        accepted: bool,
    },

    // ------------------------------------------------------------------
    // Timer ticks
    // ------------------------------------------------------------------
    /// The provider re-poll interval elapsed
    RefreshTick,

    /// The discovery delay elapsed - settle into the provider list
    DiscoveryElapsed,

    /// The dispatch delay elapsed - the provider is en route
    DispatchElapsed,

    /// A terminal phase lingered long enough - reset to idle
    AutoResetElapsed,
}
