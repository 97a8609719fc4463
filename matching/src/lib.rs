//! # Chama Matching
//!
//! The client-side request lifecycle for the marketplace: one active
//! service request per device session, tracked from creation through
//! completion or cancellation.
//!
//! The lifecycle coordinates:
//!
//! - device location acquisition,
//! - provider discovery polling (through the cache-backed
//!   [`ProviderDirectory`]),
//! - provider selection and confirmation,
//! - the simulated discovery/dispatch latencies and the terminal
//!   auto-reset, all as named, cancellable timers.
//!
//! The UI reads [`MatchingState`] reactively (phase, providers, selection,
//! match record, error, loading flag) and sends [`MatchingAction`] commands
//! through a `Store`.
//!
//! ## Example
//!
//! ```ignore
//! use chama_matching::{MatchingAction, MatchingReducer, MatchingState};
//! use chama_runtime::Store;
//!
//! let store = Store::new(MatchingState::default(), MatchingReducer::new(), env);
//!
//! store.send(MatchingAction::AcquireLocation).await?;
//! store.send(MatchingAction::RequestService {
//!     category: ServiceCategory::Limpeza,
//!     title: "Limpeza pós-obra".into(),
//!     description: "Apartamento de 70m²".into(),
//!     address: "Rua Augusta, 123".into(),
//! }).await?;
//! ```

mod action;
mod error;
mod realtime;
mod state;

/// Cache-backed provider discovery and ranking
pub mod discovery;
/// Injected collaborators (location, backend, clock, ids, timing)
pub mod environment;
/// The lifecycle reducer and its timer slots
pub mod reducer;
/// Domain types (providers, matches, phases, coordinates)
pub mod types;

pub use action::MatchingAction;
pub use discovery::{DiscoveryConfig, ProviderDirectory};
pub use environment::{
    ApiError, CreatedRequest, LifecycleTiming, LocationError, LocationProvider, MarketplaceApi,
    MatchingEnvironment, ServiceRequestDraft,
};
pub use error::MatchingError;
pub use realtime::realtime_action;
pub use reducer::{
    AUTO_RESET_TIMER, DISCOVERY_TIMER, DISPATCH_TIMER, MatchingReducer, REFRESH_TIMER,
};
pub use state::MatchingState;
pub use types::{Coordinate, RequestPhase, ServiceCategory, ServiceMatch, ServiceProvider};
