//! Lifecycle state read by the UI layer.

use crate::error::MatchingError;
use crate::types::{Coordinate, RequestPhase, ServiceMatch, ServiceProvider};

/// The single mutable record for the device session's active request.
///
/// Invariants, maintained by the reducer after every transition:
///
/// - `current_match.status` equals `phase` whenever a match exists
/// - `selected_provider` is `Some` only while `phase.has_selection()`
/// - `available_providers` is non-empty only while `phase.lists_providers()`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchingState {
    /// Current lifecycle phase
    pub phase: RequestPhase,
    /// Last known device coordinate; `None` until acquired
    pub user_location: Option<Coordinate>,
    /// Provider candidates, replaced wholesale on each refresh
    pub available_providers: Vec<ServiceProvider>,
    /// The provider picked from `available_providers`
    pub selected_provider: Option<ServiceProvider>,
    /// The active request's record; `None` while idle
    pub current_match: Option<ServiceMatch>,
    /// Last recoverable failure, cleared by successful operations and reset
    pub error: Option<MatchingError>,
    /// Whether a lifecycle network call is in flight
    pub is_loading: bool,
}

impl MatchingState {
    /// Clear everything back to initial values.
    ///
    /// The device coordinate survives: it describes the device, not the
    /// request, and forgetting it would force a pointless re-acquisition
    /// before the next request.
    pub fn reset(&mut self) {
        self.phase = RequestPhase::Idle;
        self.available_providers.clear();
        self.selected_provider = None;
        self.current_match = None;
        self.error = None;
        self.is_loading = false;
    }

    /// Mirror the current phase onto the match record.
    pub fn sync_match_status(&mut self) {
        if let Some(current) = self.current_match.as_mut() {
            current.status = self.phase;
        }
    }

    /// The user-facing error string, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_is_idempotent_and_keeps_location() {
        let mut state = MatchingState {
            phase: RequestPhase::Cancelled,
            user_location: Some(Coordinate::new(-23.55, -46.63)),
            error: Some(MatchingError::RequestInProgress),
            is_loading: true,
            ..MatchingState::default()
        };

        state.reset();
        let after_first = state.clone();
        state.reset();

        assert_eq!(state, after_first);
        assert_eq!(state.phase, RequestPhase::Idle);
        assert!(state.user_location.is_some());
        assert!(state.error.is_none());
        assert!(!state.is_loading);
    }

    #[test]
    fn error_message_renders_display() {
        let state = MatchingState {
            error: Some(MatchingError::LocationUnavailable),
            ..MatchingState::default()
        };
        let message = state.error_message();
        assert!(message.is_some_and(|m| m.contains("Localização")));
    }
}
