//! Failure taxonomy for the request lifecycle.
//!
//! Only recoverable, user-relevant failures land in `MatchingState::error`.
//! Contract violations - an operation invoked from a phase that does not
//! permit it, or selecting a provider id that is not listed - are defensive
//! no-ops in the reducer (logged, state untouched): the UI only offers
//! operations valid for the phase it observes.

use thiserror::Error;

/// A recoverable failure recorded on the lifecycle state.
///
/// `Display` produces the user-facing message; the variant stays matchable
/// for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchingError {
    /// Location permission denied or the position query failed
    #[error("Localização indisponível. Verifique as permissões do aplicativo.")]
    LocationUnavailable,

    /// A backend call was rejected or unreachable
    #[error("Falha de comunicação com o servidor: {0}")]
    Network(String),

    /// A second request was made while one is already active
    #[error("Já existe uma solicitação em andamento")]
    RequestInProgress,

    /// The selected provider declined the request
    #[error("O prestador recusou a solicitação")]
    ProviderDeclined,
}
