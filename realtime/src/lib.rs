//! # Chama Realtime
//!
//! Typed realtime events and the reconnecting subscription loop.
//!
//! The transport itself (WebSocket or a hosted realtime database) lives
//! outside this crate behind [`RealtimeTransport`]; this crate owns the
//! event vocabulary and the reconnect discipline: exponential backoff with
//! a fixed attempt cap, attempts resetting after every successful connect.
//!
//! ## Example
//!
//! ```ignore
//! use chama_realtime::{subscribe, RealtimeEvent};
//! use chama_runtime::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::builder().max_retries(5).build();
//! subscribe(&transport, policy, |event| async {
//!     if let Some(action) = chama_matching::realtime_action(&event) {
//!         let _ = store.send(action).await;
//!     }
//! })
//! .await?;
//! ```

use chama_runtime::retry::RetryPolicy;
use futures::StreamExt;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by the realtime layer.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Establishing the connection failed
    #[error("connection failed: {0}")]
    Connect(String),

    /// The established stream produced an error
    #[error("stream error: {0}")]
    Stream(String),

    /// An event payload could not be decoded
    #[error("malformed event payload: {0}")]
    Decode(String),

    /// Reconnecting was abandoned after the attempt cap
    #[error("gave up after {0} consecutive failed reconnect attempts")]
    AttemptsExhausted(usize),
}

/// Asynchronous events delivered by the backend.
///
/// Payload shapes mirror the server's WebSocket messages, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A provider toggled online/offline
    ProviderStatus {
        /// The provider whose status changed
        provider_id: String,
        /// Whether the provider is now accepting requests
        online: bool,
    },

    /// A provider accepted or rejected a service request
    ServiceResponse {
        /// The service request being answered
        service_id: String,
        /// The responding provider
        provider_id: String,
        /// `true` for accept, `false` for reject
        accepted: bool,
    },

    /// A user's live location changed
    LocationUpdate {
        /// The moving user
        user_id: String,
        /// Degrees north
        latitude: f64,
        /// Degrees east
        longitude: f64,
    },
}

impl RealtimeEvent {
    /// Decode an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Decode`] when the payload is not a known
    /// event shape.
    pub fn from_json(payload: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(payload).map_err(|err| RealtimeError::Decode(err.to_string()))
    }
}

/// A connected stream of realtime events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RealtimeEvent, RealtimeError>> + Send>>;

/// An abstract realtime connection factory.
///
/// Implementations wrap the actual socket; `connect` is called again after
/// every disconnect, under the subscription loop's backoff policy.
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Establish a connection and return its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Connect`] when the connection cannot be
    /// established.
    async fn connect(&self) -> Result<EventStream, RealtimeError>;
}

/// Consume events from `transport`, forwarding each to `sink`.
///
/// Reconnects whenever the stream ends or errors, sleeping per `policy`
/// between consecutive failures. A successful connect resets the attempt
/// counter; `policy.max_retries` consecutive failures abandon the
/// subscription.
///
/// # Errors
///
/// Returns [`RealtimeError::AttemptsExhausted`] once the attempt cap is hit.
pub async fn subscribe<T, F, Fut>(
    transport: &T,
    policy: RetryPolicy,
    mut sink: F,
) -> Result<(), RealtimeError>
where
    T: RealtimeTransport + ?Sized,
    F: FnMut(RealtimeEvent) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut attempt = 0usize;

    loop {
        match transport.connect().await {
            Ok(mut stream) => {
                tracing::info!("Realtime connection established");
                attempt = 0;

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            tracing::trace!(?event, "Realtime event received");
                            sink(event).await;
                        },
                        Err(err) => {
                            tracing::warn!(error = %err, "Realtime stream errored, reconnecting");
                            break;
                        },
                    }
                }
                tracing::info!("Realtime stream ended");
            },
            Err(err) => {
                tracing::warn!(error = %err, attempt, "Realtime connect failed");
            },
        }

        if !policy.should_retry(attempt) {
            tracing::error!(attempt, "Abandoning realtime subscription");
            return Err(RealtimeError::AttemptsExhausted(attempt));
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!(delay_ms = delay.as_millis(), attempt, "Reconnecting after backoff");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .jitter(false)
            .build()
    }

    /// Transport that plays one scripted stream, then fails every connect.
    struct ScriptedTransport {
        events: Mutex<Option<Vec<RealtimeEvent>>>,
        connects: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(events: Vec<RealtimeEvent>) -> Self {
            Self {
                events: Mutex::new(Some(events)),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RealtimeTransport for ScriptedTransport {
        async fn connect(&self) -> Result<EventStream, RealtimeError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.events.lock().await.take() {
                Some(events) => Ok(Box::pin(futures::stream::iter(
                    events.into_iter().map(Ok),
                ))),
                None => Err(RealtimeError::Connect("offline".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn forwards_events_then_gives_up_when_backend_stays_down() {
        let transport = ScriptedTransport::new(vec![
            RealtimeEvent::ProviderStatus {
                provider_id: "p1".to_string(),
                online: true,
            },
            RealtimeEvent::ServiceResponse {
                service_id: "s1".to_string(),
                provider_id: "p1".to_string(),
                accepted: true,
            },
        ]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let result = subscribe(&transport, fast_policy(2), move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().await.push(event);
            }
        })
        .await;

        assert!(matches!(result, Err(RealtimeError::AttemptsExhausted(2))));
        let seen = seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], RealtimeEvent::ProviderStatus { .. }));
        // one scripted stream + initial reconnect + retries up to the cap
        assert!(transport.connects.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn attempt_cap_bounds_consecutive_failures() {
        let transport = ScriptedTransport {
            events: Mutex::new(None),
            connects: AtomicUsize::new(0),
        };

        let result = subscribe(&transport, fast_policy(3), |_event| async {}).await;

        assert!(matches!(result, Err(RealtimeError::AttemptsExhausted(3))));
        // initial attempt + 3 retries
        assert_eq!(transport.connects.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn events_decode_from_tagged_json() {
        let event = RealtimeEvent::from_json(
            r#"{"type":"provider_status","provider_id":"p7","online":false}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            RealtimeEvent::ProviderStatus {
                provider_id: "p7".to_string(),
                online: false,
            }
        );

        let event = RealtimeEvent::from_json(
            r#"{"type":"service_response","service_id":"s1","provider_id":"p1","accepted":true}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            RealtimeEvent::ServiceResponse { accepted: true, .. }
        ));
    }

    #[test]
    fn unknown_event_shape_is_a_decode_error() {
        let err = RealtimeEvent::from_json(r#"{"type":"chat_message"}"#).unwrap_err();
        assert!(matches!(err, RealtimeError::Decode(_)));
    }
}
