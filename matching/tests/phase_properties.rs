//! Property tests: no action sequence can break the lifecycle's invariants.

#![allow(clippy::unwrap_used, clippy::panic)] // Test code

use chama_core::reducer::Reducer;
use chama_matching::{
    MatchingAction, MatchingReducer, MatchingState, RequestPhase, ServiceCategory,
};
use chama_testing::lifecycle_mocks::{TEST_ORIGIN, sample_providers, test_environment};
use proptest::prelude::*;

fn action_pool() -> Vec<MatchingAction> {
    vec![
        MatchingAction::LocationResolved {
            location: TEST_ORIGIN,
        },
        MatchingAction::LocationFailed {
            reason: "no fix".to_string(),
        },
        MatchingAction::RequestService {
            category: ServiceCategory::Limpeza,
            title: "Limpeza".to_string(),
            description: "desc".to_string(),
            address: "Rua A, 1".to_string(),
        },
        MatchingAction::RequestAccepted {
            request_id: "req-1".to_string(),
            estimated_response_min: Some(5),
        },
        MatchingAction::RequestFailed {
            reason: "503".to_string(),
        },
        MatchingAction::ProvidersLoaded {
            providers: sample_providers(TEST_ORIGIN, ServiceCategory::Limpeza),
        },
        MatchingAction::ProvidersFailed {
            reason: "timeout".to_string(),
        },
        MatchingAction::RefreshProviders,
        MatchingAction::RefreshTick,
        MatchingAction::DiscoveryElapsed,
        MatchingAction::SelectProvider {
            provider_id: "1".to_string(),
        },
        MatchingAction::SelectProvider {
            provider_id: "2".to_string(),
        },
        MatchingAction::SelectProvider {
            provider_id: "999".to_string(),
        },
        MatchingAction::ConfirmService,
        MatchingAction::ConfirmAcknowledged,
        MatchingAction::ConfirmRejected {
            reason: "409".to_string(),
        },
        MatchingAction::DispatchElapsed,
        MatchingAction::CancelService,
        MatchingAction::CompleteService,
        MatchingAction::StatusSyncFailed {
            reason: "500".to_string(),
        },
        MatchingAction::ProviderStatusChanged {
            provider_id: "2".to_string(),
            online: false,
        },
        MatchingAction::ServiceResponseReceived {
            service_id: "req-1".to_string(),
            provider_id: "2".to_string(),
            accepted: false,
        },
        MatchingAction::AutoResetElapsed,
        MatchingAction::Reset,
    ]
}

fn arb_action() -> impl Strategy<Value = MatchingAction> {
    proptest::sample::select(action_pool())
}

proptest! {
    #[test]
    fn lifecycle_invariants_hold_under_any_sequence(
        actions in proptest::collection::vec(arb_action(), 1..80)
    ) {
        let (env, _api) = test_environment();
        let reducer = MatchingReducer::new();
        let mut state = MatchingState::default();

        for action in actions {
            let _ = reducer.reduce(&mut state, action, &env);

            // Selection is held exactly in the selection phases
            prop_assert_eq!(
                state.selected_provider.is_some(),
                state.phase.has_selection(),
                "selection/phase mismatch in {}", state.phase
            );

            // The provider list may be non-empty only during discovery
            if !state.available_providers.is_empty() {
                prop_assert!(
                    state.phase.lists_providers(),
                    "provider list leaked into {}", state.phase
                );
            }

            // The match record mirrors the phase, and only exists off-idle
            match state.current_match.as_ref() {
                Some(current) => {
                    prop_assert_eq!(current.status, state.phase);
                    prop_assert!(state.phase != RequestPhase::Idle);
                },
                None => prop_assert!(
                    matches!(state.phase, RequestPhase::Idle),
                    "non-idle phase {} without a match", state.phase
                ),
            }

            // Timestamps only accumulate in lifecycle order
            if let Some(current) = state.current_match.as_ref() {
                if let (Some(confirmed), Some(started)) =
                    (current.confirmed_at, current.started_at)
                {
                    prop_assert!(confirmed <= started);
                }
                if let (Some(started), Some(completed)) =
                    (current.started_at, current.completed_at)
                {
                    prop_assert!(started <= completed);
                }
                prop_assert!(current.created_at <= current.completed_at.unwrap_or(current.created_at));
            }
        }
    }

    #[test]
    fn cancel_always_lands_in_cancelled_from_active_phases(
        prefix in proptest::collection::vec(arb_action(), 0..40)
    ) {
        let (env, _api) = test_environment();
        let reducer = MatchingReducer::new();
        let mut state = MatchingState::default();

        for action in prefix {
            let _ = reducer.reduce(&mut state, action, &env);
        }

        let could_cancel = state.phase.can_cancel();
        let phase_before = state.phase;
        let _ = reducer.reduce(&mut state, MatchingAction::CancelService, &env);

        if could_cancel {
            prop_assert_eq!(state.phase, RequestPhase::Cancelled);
            prop_assert!(state.selected_provider.is_none());
            prop_assert!(state.available_providers.is_empty());
        } else {
            prop_assert_eq!(state.phase, phase_before, "cancel must be a no-op");
        }
    }
}
