//! The request lifecycle reducer.
//!
//! ```text
//! idle --request--> searching --discovery--> providers_found --select-->
//! provider_selected --confirm--> confirmed --dispatch--> in_progress
//! --complete--> completed --auto-reset--> idle
//!
//! searching..in_progress --cancel--> cancelled --auto-reset--> idle
//! ```
//!
//! The phase is mutated eagerly, before any network suspension, so the UI
//! reflects intent immediately; only payloads (request id, provider list)
//! arrive through feedback actions. Every pending timer lives in a named
//! cancellable slot, and every transition that supersedes one cancels it -
//! a stale timer can never resurrect an old phase.

use crate::action::MatchingAction;
use crate::environment::{MatchingEnvironment, ServiceRequestDraft};
use crate::error::MatchingError;
use crate::state::MatchingState;
use crate::types::{Coordinate, RequestPhase, ServiceCategory, ServiceMatch};
use chama_core::effect::{Effect, EffectId};
use chama_core::reducer::Reducer;
use chama_core::{SmallVec, smallvec};
use std::sync::Arc;

/// Settles `searching` into `providers_found`.
pub const DISCOVERY_TIMER: EffectId = EffectId::new("matching/discovery");
/// Moves `confirmed` to `in_progress`.
pub const DISPATCH_TIMER: EffectId = EffectId::new("matching/dispatch");
/// Returns terminal phases to `idle`.
pub const AUTO_RESET_TIMER: EffectId = EffectId::new("matching/auto-reset");
/// Re-polls providers while `searching`.
pub const REFRESH_TIMER: EffectId = EffectId::new("matching/provider-refresh");

/// Reducer implementing the request lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchingReducer;

impl MatchingReducer {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn create_request_effect(
        env: &MatchingEnvironment,
        draft: ServiceRequestDraft,
    ) -> Effect<MatchingAction> {
        let api = Arc::clone(&env.api);
        Effect::Future(Box::pin(async move {
            match api.create_request(draft).await {
                Ok(created) => Some(MatchingAction::RequestAccepted {
                    request_id: created.id,
                    estimated_response_min: created.estimated_response_min,
                }),
                Err(err) => Some(MatchingAction::RequestFailed {
                    reason: err.to_string(),
                }),
            }
        }))
    }

    fn refresh_effect(
        env: &MatchingEnvironment,
        origin: Coordinate,
        category: ServiceCategory,
    ) -> Effect<MatchingAction> {
        let directory = env.directory.clone();
        Effect::Future(Box::pin(async move {
            match directory.nearby(origin, category).await {
                Ok(providers) => Some(MatchingAction::ProvidersLoaded { providers }),
                Err(err) => Some(MatchingAction::ProvidersFailed {
                    reason: err.to_string(),
                }),
            }
        }))
    }

    fn acquire_location_effect(env: &MatchingEnvironment) -> Effect<MatchingAction> {
        let location = Arc::clone(&env.location);
        Effect::Future(Box::pin(async move {
            let result = async {
                location.request_permission().await?;
                location.current_position().await
            }
            .await;

            match result {
                Ok(position) => Some(MatchingAction::LocationResolved { location: position }),
                Err(err) => Some(MatchingAction::LocationFailed {
                    reason: err.to_string(),
                }),
            }
        }))
    }

    fn push_location_effect(
        env: &MatchingEnvironment,
        location: Coordinate,
    ) -> Effect<MatchingAction> {
        let api = Arc::clone(&env.api);
        Effect::Future(Box::pin(async move {
            if let Err(err) = api.update_location(location).await {
                // Advisory propagation; the next push supersedes it anyway.
                tracing::warn!(error = %err, "Failed to push location to backend");
            }
            None
        }))
    }

    fn accept_effect(
        env: &MatchingEnvironment,
        service_id: String,
        provider_id: String,
    ) -> Effect<MatchingAction> {
        let api = Arc::clone(&env.api);
        Effect::Future(Box::pin(async move {
            match api.accept_request(&service_id, &provider_id).await {
                Ok(()) => Some(MatchingAction::ConfirmAcknowledged),
                Err(err) => Some(MatchingAction::ConfirmRejected {
                    reason: err.to_string(),
                }),
            }
        }))
    }

    fn sync_status_effect(
        env: &MatchingEnvironment,
        service_id: String,
        status: RequestPhase,
    ) -> Effect<MatchingAction> {
        let api = Arc::clone(&env.api);
        Effect::Future(Box::pin(async move {
            match api.update_status(&service_id, status).await {
                Ok(()) => None,
                Err(err) => Some(MatchingAction::StatusSyncFailed {
                    reason: err.to_string(),
                }),
            }
        }))
    }

    /// Revert an optimistic confirmation that the backend (or the provider)
    /// refused.
    fn unwind_confirmation(state: &mut MatchingState, error: MatchingError) {
        state.phase = RequestPhase::ProviderSelected;
        if let Some(current) = state.current_match.as_mut() {
            current.confirmed_at = None;
            current.started_at = None;
        }
        state.sync_match_status();
        state.is_loading = false;
        state.error = Some(error);
    }
}

#[allow(clippy::too_many_lines)] // One arm per lifecycle input
impl Reducer for MatchingReducer {
    type State = MatchingState;
    type Action = MatchingAction;
    type Environment = MatchingEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ----------------------------------------------------------
            // Location
            // ----------------------------------------------------------
            MatchingAction::AcquireLocation => {
                smallvec![Self::acquire_location_effect(env)]
            },

            MatchingAction::LocationResolved { location } => {
                state.user_location = Some(location);
                if matches!(state.error, Some(MatchingError::LocationUnavailable)) {
                    state.error = None;
                }
                smallvec![Effect::None]
            },

            MatchingAction::LocationFailed { reason } => {
                tracing::warn!(reason, "Device location unavailable");
                state.error = Some(MatchingError::LocationUnavailable);
                smallvec![Effect::None]
            },

            MatchingAction::UpdateLocation { location } => {
                state.user_location = Some(location);
                smallvec![Self::push_location_effect(env, location)]
            },

            // ----------------------------------------------------------
            // Request creation and discovery
            // ----------------------------------------------------------
            MatchingAction::RequestService {
                category,
                title,
                description,
                address,
            } => {
                if state.phase != RequestPhase::Idle {
                    tracing::warn!(phase = %state.phase, "Rejected request: one already active");
                    state.error = Some(MatchingError::RequestInProgress);
                    return smallvec![Effect::None];
                }

                let Some(origin) = state.user_location else {
                    state.error = Some(MatchingError::LocationUnavailable);
                    return smallvec![Effect::None];
                };

                state.phase = RequestPhase::Searching;
                state.error = None;
                state.is_loading = true;
                state.current_match = Some(ServiceMatch {
                    id: env.ids.next_id(),
                    client_id: env.client_id.clone(),
                    provider_id: String::new(),
                    category,
                    title: title.clone(),
                    description: description.clone(),
                    status: RequestPhase::Searching,
                    client_location: origin,
                    address: address.clone(),
                    estimated_price: None,
                    final_price: None,
                    estimated_response_min: None,
                    created_at: env.clock.now(),
                    confirmed_at: None,
                    started_at: None,
                    completed_at: None,
                });

                tracing::info!(%category, "Service request started");

                let draft = ServiceRequestDraft {
                    category,
                    title,
                    description,
                    location: origin,
                    address,
                };

                smallvec![
                    Self::create_request_effect(env, draft),
                    Self::refresh_effect(env, origin, category),
                    Effect::armed_timer(
                        REFRESH_TIMER,
                        env.timing.refresh_interval,
                        MatchingAction::RefreshTick,
                    ),
                    Effect::armed_timer(
                        DISCOVERY_TIMER,
                        env.timing.discovery_delay,
                        MatchingAction::DiscoveryElapsed,
                    ),
                ]
            },

            MatchingAction::RequestAccepted {
                request_id,
                estimated_response_min,
            } => {
                if !state.phase.lists_providers() {
                    tracing::debug!(%request_id, "Discarding late create acknowledgement");
                    return smallvec![Effect::None];
                }
                if let Some(current) = state.current_match.as_mut() {
                    current.id = request_id;
                    current.estimated_response_min = estimated_response_min;
                }
                state.is_loading = false;
                smallvec![Effect::None]
            },

            MatchingAction::RequestFailed { reason } => {
                if !state.phase.lists_providers() {
                    tracing::debug!(reason, "Discarding late create failure");
                    return smallvec![Effect::None];
                }
                tracing::warn!(reason, "Service request failed, returning to idle");
                state.phase = RequestPhase::Idle;
                state.current_match = None;
                state.available_providers.clear();
                state.is_loading = false;
                state.error = Some(MatchingError::Network(reason));
                smallvec![
                    Effect::Cancel(REFRESH_TIMER),
                    Effect::Cancel(DISCOVERY_TIMER),
                ]
            },

            MatchingAction::RefreshTick => {
                if state.phase != RequestPhase::Searching {
                    return smallvec![Effect::None];
                }
                let Some((origin, category)) = state
                    .user_location
                    .zip(state.current_match.as_ref().map(|m| m.category))
                else {
                    return smallvec![Effect::None];
                };

                smallvec![
                    Self::refresh_effect(env, origin, category),
                    Effect::armed_timer(
                        REFRESH_TIMER,
                        env.timing.refresh_interval,
                        MatchingAction::RefreshTick,
                    ),
                ]
            },

            MatchingAction::RefreshProviders => {
                if !state.phase.lists_providers() {
                    tracing::warn!(phase = %state.phase, "Refresh ignored outside discovery");
                    return smallvec![Effect::None];
                }
                let Some((origin, category)) = state
                    .user_location
                    .zip(state.current_match.as_ref().map(|m| m.category))
                else {
                    state.error = Some(MatchingError::LocationUnavailable);
                    return smallvec![Effect::None];
                };

                smallvec![Self::refresh_effect(env, origin, category)]
            },

            MatchingAction::ProvidersLoaded { providers } => {
                if !state.phase.lists_providers() {
                    tracing::debug!("Discarding provider list for a finished search");
                    return smallvec![Effect::None];
                }
                tracing::debug!(count = providers.len(), "Provider list replaced");
                state.available_providers = providers;
                state.error = None;
                smallvec![Effect::None]
            },

            MatchingAction::ProvidersFailed { reason } => {
                if !state.phase.lists_providers() {
                    return smallvec![Effect::None];
                }
                // The search keeps going; the stale list stays on screen.
                tracing::warn!(reason, "Provider refresh failed");
                state.error = Some(MatchingError::Network(reason));
                smallvec![Effect::None]
            },

            MatchingAction::DiscoveryElapsed => {
                if state.phase != RequestPhase::Searching {
                    return smallvec![Effect::None];
                }
                state.phase = RequestPhase::ProvidersFound;
                state.sync_match_status();
                // The re-poll interval lives only while searching.
                smallvec![Effect::Cancel(REFRESH_TIMER)]
            },

            // ----------------------------------------------------------
            // Selection and confirmation
            // ----------------------------------------------------------
            MatchingAction::SelectProvider { provider_id } => {
                if state.phase != RequestPhase::ProvidersFound {
                    tracing::warn!(phase = %state.phase, "Selection ignored in this phase");
                    return smallvec![Effect::None];
                }
                let Some(provider) = state
                    .available_providers
                    .iter()
                    .find(|p| p.id == provider_id)
                    .cloned()
                else {
                    tracing::warn!(provider_id, "Selection ignored: provider not listed");
                    return smallvec![Effect::None];
                };

                if let Some(current) = state.current_match.as_mut() {
                    current.provider_id = provider.id.clone();
                    current.estimated_price = Some(provider.price);
                }
                state.selected_provider = Some(provider);
                state.available_providers.clear();
                state.phase = RequestPhase::ProviderSelected;
                state.sync_match_status();
                state.error = None;

                smallvec![
                    Effect::Cancel(REFRESH_TIMER),
                    Effect::Cancel(DISCOVERY_TIMER),
                ]
            },

            MatchingAction::ConfirmService => {
                let (Some(provider), Some(service_id)) = (
                    state.selected_provider.as_ref().map(|p| p.id.clone()),
                    state.current_match.as_ref().map(|m| m.id.clone()),
                ) else {
                    tracing::warn!("Confirmation ignored: nothing selected");
                    return smallvec![Effect::None];
                };
                if state.phase != RequestPhase::ProviderSelected {
                    tracing::warn!(phase = %state.phase, "Confirmation ignored in this phase");
                    return smallvec![Effect::None];
                }

                state.phase = RequestPhase::Confirmed;
                if let Some(current) = state.current_match.as_mut() {
                    current.confirmed_at = Some(env.clock.now());
                }
                state.sync_match_status();
                state.is_loading = true;
                state.error = None;

                smallvec![
                    Self::accept_effect(env, service_id, provider),
                    Effect::armed_timer(
                        DISPATCH_TIMER,
                        env.timing.dispatch_delay,
                        MatchingAction::DispatchElapsed,
                    ),
                ]
            },

            MatchingAction::ConfirmAcknowledged => {
                if matches!(
                    state.phase,
                    RequestPhase::Confirmed | RequestPhase::InProgress
                ) {
                    state.is_loading = false;
                }
                smallvec![Effect::None]
            },

            MatchingAction::ConfirmRejected { reason } => {
                if !matches!(
                    state.phase,
                    RequestPhase::Confirmed | RequestPhase::InProgress
                ) {
                    return smallvec![Effect::None];
                }
                tracing::warn!(reason, "Confirmation rejected by backend");
                Self::unwind_confirmation(state, MatchingError::Network(reason));
                smallvec![Effect::Cancel(DISPATCH_TIMER)]
            },

            MatchingAction::DispatchElapsed => {
                if state.phase != RequestPhase::Confirmed {
                    return smallvec![Effect::None];
                }
                state.phase = RequestPhase::InProgress;
                if let Some(current) = state.current_match.as_mut() {
                    current.started_at = Some(env.clock.now());
                }
                state.sync_match_status();
                smallvec![Effect::None]
            },

            // ----------------------------------------------------------
            // Termination
            // ----------------------------------------------------------
            MatchingAction::CancelService => {
                if !state.phase.can_cancel() {
                    tracing::warn!(phase = %state.phase, "Cancel ignored in this phase");
                    return smallvec![Effect::None];
                }

                tracing::info!(phase = %state.phase, "Request cancelled");
                state.phase = RequestPhase::Cancelled;
                state.selected_provider = None;
                state.available_providers.clear();
                state.is_loading = false;
                state.error = None;
                state.sync_match_status();

                let mut effects: SmallVec<[Effect<MatchingAction>; 4]> = smallvec![
                    Effect::CancelAll,
                    Effect::armed_timer(
                        AUTO_RESET_TIMER,
                        env.timing.auto_reset_delay,
                        MatchingAction::AutoResetElapsed,
                    ),
                ];
                if let Some(current) = state.current_match.as_ref() {
                    effects.push(Self::sync_status_effect(
                        env,
                        current.id.clone(),
                        RequestPhase::Cancelled,
                    ));
                }
                effects
            },

            MatchingAction::CompleteService => {
                if state.phase != RequestPhase::InProgress {
                    tracing::warn!(phase = %state.phase, "Completion ignored in this phase");
                    return smallvec![Effect::None];
                }

                state.phase = RequestPhase::Completed;
                state.selected_provider = None;
                state.is_loading = false;
                state.error = None;
                let mut service_id = None;
                if let Some(current) = state.current_match.as_mut() {
                    current.completed_at = Some(env.clock.now());
                    current.final_price = current.estimated_price;
                    service_id = Some(current.id.clone());
                }
                state.sync_match_status();
                tracing::info!("Service completed");

                let mut effects: SmallVec<[Effect<MatchingAction>; 4]> = smallvec![
                    Effect::armed_timer(
                        AUTO_RESET_TIMER,
                        env.timing.auto_reset_delay,
                        MatchingAction::AutoResetElapsed,
                    ),
                ];
                if let Some(service_id) = service_id {
                    effects.push(Self::sync_status_effect(
                        env,
                        service_id,
                        RequestPhase::Completed,
                    ));
                }
                effects
            },

            MatchingAction::StatusSyncFailed { reason } => {
                // The user's decision stands; the backend is merely behind.
                tracing::warn!(reason, "Status sync failed");
                state.error = Some(MatchingError::Network(reason));
                smallvec![Effect::None]
            },

            MatchingAction::AutoResetElapsed => {
                if !state.phase.is_terminal() {
                    return smallvec![Effect::None];
                }
                state.reset();
                smallvec![Effect::None]
            },

            MatchingAction::Reset => {
                state.reset();
                smallvec![Effect::CancelAll]
            },

            // ----------------------------------------------------------
            // Realtime
            // ----------------------------------------------------------
            MatchingAction::ProviderStatusChanged {
                provider_id,
                online,
            } => {
                for provider in &mut state.available_providers {
                    if provider.id == provider_id {
                        provider.is_online = online;
                    }
                }
                if let Some(selected) = state.selected_provider.as_mut() {
                    if selected.id == provider_id {
                        selected.is_online = online;
                    }
                }
                smallvec![Effect::None]
            },

            MatchingAction::ServiceResponseReceived {
                service_id,
                provider_id,
                accepted,
            } => {
                let concerns_active = state
                    .current_match
                    .as_ref()
                    .is_some_and(|m| m.id == service_id && m.provider_id == provider_id);
                if !concerns_active {
                    tracing::debug!(service_id, "Ignoring response for another request");
                    return smallvec![Effect::None];
                }

                if accepted {
                    if state.phase == RequestPhase::Confirmed {
                        state.is_loading = false;
                    }
                    return smallvec![Effect::None];
                }

                if matches!(
                    state.phase,
                    RequestPhase::Confirmed | RequestPhase::InProgress
                ) {
                    tracing::warn!(provider_id, "Provider declined the confirmed request");
                    Self::unwind_confirmation(state, MatchingError::ProviderDeclined);
                    return smallvec![Effect::Cancel(DISPATCH_TIMER)];
                }
                smallvec![Effect::None]
            },
        }
    }
}
