//! Bridging realtime events into lifecycle actions.

use crate::action::MatchingAction;
use chama_realtime::RealtimeEvent;

/// Map a realtime event onto the lifecycle action it implies, if any.
///
/// Location updates of *other* users are a map concern, not a lifecycle
/// one, so they map to `None`.
///
/// ```
/// use chama_matching::{realtime_action, MatchingAction};
/// use chama_realtime::RealtimeEvent;
///
/// let event = RealtimeEvent::ProviderStatus {
///     provider_id: "p1".to_string(),
///     online: false,
/// };
/// assert!(matches!(
///     realtime_action(&event),
///     Some(MatchingAction::ProviderStatusChanged { .. })
/// ));
/// ```
#[must_use]
pub fn realtime_action(event: &RealtimeEvent) -> Option<MatchingAction> {
    match event {
        RealtimeEvent::ProviderStatus {
            provider_id,
            online,
        } => Some(MatchingAction::ProviderStatusChanged {
            provider_id: provider_id.clone(),
            online: *online,
        }),
        RealtimeEvent::ServiceResponse {
            service_id,
            provider_id,
            accepted,
        } => Some(MatchingAction::ServiceResponseReceived {
            service_id: service_id.clone(),
            provider_id: provider_id.clone(),
            accepted: *accepted,
        }),
        RealtimeEvent::LocationUpdate { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_responses_carry_the_verdict() {
        let event = RealtimeEvent::ServiceResponse {
            service_id: "s1".to_string(),
            provider_id: "p1".to_string(),
            accepted: false,
        };
        assert_eq!(
            realtime_action(&event),
            Some(MatchingAction::ServiceResponseReceived {
                service_id: "s1".to_string(),
                provider_id: "p1".to_string(),
                accepted: false,
            })
        );
    }

    #[test]
    fn foreign_location_updates_are_not_lifecycle_input() {
        let event = RealtimeEvent::LocationUpdate {
            user_id: "u9".to_string(),
            latitude: -23.55,
            longitude: -46.63,
        };
        assert_eq!(realtime_action(&event), None);
    }
}
