//! # Chama Core
//!
//! Core traits and types for the chama client architecture.
//!
//! This crate provides the fundamental abstractions for the client-side
//! state machines of the marketplace app: the request lifecycle, provider
//! discovery, and the caches that back them.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for a feature
//! - **Action**: All possible inputs to a reducer (UI commands, feedback from
//!   asynchronous work, timer ticks)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Unidirectional Data Flow
//! - Explicit Effects (no hidden I/O)
//! - Explicit, cancellable timers (no raw `setTimeout`-style fire-and-forget)
//! - Dependency Injection via Environment
//!
//! ## Example
//!
//! ```ignore
//! use chama_core::prelude::*;
//!
//! #[derive(Clone, Debug, Default)]
//! struct PingState { pending: bool }
//!
//! #[derive(Clone, Debug)]
//! enum PingAction { Ping, Pong }
//!
//! struct PingReducer;
//!
//! impl Reducer for PingReducer {
//!     type State = PingState;
//!     type Action = PingAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut PingState,
//!         action: PingAction,
//!         _env: &(),
//!     ) -> SmallVec<[Effect<PingAction>; 4]> {
//!         match action {
//!             PingAction::Ping => {
//!                 state.pending = true;
//!                 smallvec![Effect::Delay {
//!                     duration: std::time::Duration::from_millis(100),
//!                     action: Box::new(PingAction::Pong),
//!                 }]
//!             },
//!             PingAction::Pong => {
//!                 state.pending = false;
//!                 smallvec![Effect::None]
//!             },
//!         }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for MatchingReducer {
    ///     type State = MatchingState;
    ///     type Action = MatchingAction;
    ///     type Environment = MatchingEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut MatchingState,
    ///         action: MatchingAction,
    ///         env: &MatchingEnvironment,
    ///     ) -> SmallVec<[Effect<MatchingAction>; 4]> {
    ///         // Business logic goes here
    ///         smallvec![Effect::None]
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Arguments
        ///
        /// - `state`: Mutable reference to current state
        /// - `action`: The action to process
        /// - `env`: Reference to injected dependencies
        ///
        /// # Returns
        ///
        /// Effects to be executed by the runtime. Most actions produce one or
        /// two, hence the inline capacity.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are composable and cancellable.
pub mod effect {
    use std::borrow::Cow;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Identifier for a cancellable effect.
    ///
    /// Arming a new effect under an id that is already registered replaces
    /// (aborts) the previous one, so an id doubles as an "armed timer" slot:
    /// at most one piece of work per id is ever pending.
    ///
    /// Ids are cheap to copy and compare; features declare them as constants:
    ///
    /// ```
    /// use chama_core::effect::EffectId;
    ///
    /// const DISCOVERY_TIMER: EffectId = EffectId::new("matching/discovery");
    /// assert_eq!(DISCOVERY_TIMER, EffectId::new("matching/discovery"));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct EffectId(&'static str);

    impl EffectId {
        /// Create an effect id from a static name
        #[must_use]
        pub const fn new(name: &'static str) -> Self {
            Self(name)
        }

        /// The underlying name
        #[must_use]
        pub const fn as_str(self) -> &'static str {
            self.0
        }
    }

    impl std::fmt::Display for EffectId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl From<EffectId> for Cow<'static, str> {
        fn from(id: EffectId) -> Self {
            Cow::Borrowed(id.0)
        }
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what
    /// should happen, returned from reducers and executed by the Store runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    #[allow(missing_docs)]
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (timers: discovery, dispatch, auto-reset)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// An effect registered under an id so it can be aborted later.
        ///
        /// Re-arming an id aborts whatever was previously registered under it.
        /// A stale timer therefore can never fire after it has been superseded.
        Cancellable {
            /// Registration slot for the pending work
            id: EffectId,
            /// The effect to run under that slot
            effect: Box<Effect<Action>>,
        },

        /// Abort the pending cancellable effect registered under `id`, if any
        Cancel(EffectId),

        /// Abort every pending cancellable effect
        CancelAll,
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Cancellable { id, effect } => f
                    .debug_struct("Effect::Cancellable")
                    .field("id", id)
                    .field("effect", effect)
                    .finish(),
                Effect::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
                Effect::CancelAll => write!(f, "Effect::CancelAll"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// A delayed action registered under a cancellable slot.
        ///
        /// This is the building block for every lifecycle timer: the delay
        /// fires `action` unless something cancels or re-arms `id` first.
        #[must_use]
        pub fn armed_timer(id: EffectId, duration: Duration, action: Action) -> Effect<Action> {
            Effect::Cancellable {
                id,
                effect: Box::new(Effect::Delay {
                    duration,
                    action: Box::new(action),
                }),
            }
        }

        /// Whether this effect is a plain no-op
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter, so reducers stay deterministic and tests
/// control time and identity explicitly.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use chama_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Id generation for client-side records.
    ///
    /// Authoritative ids come from the backend; the generator covers
    /// provisional ids used while a create call is still in flight.
    pub trait IdGenerator: Send + Sync {
        /// Produce a fresh unique id
        fn next_id(&self) -> String;
    }

    /// Production id generator backed by UUID v4
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidGenerator;

    impl IdGenerator for UuidGenerator {
        fn next_id(&self) -> String {
            uuid::Uuid::new_v4().to_string()
        }
    }
}

/// Convenience re-exports for downstream crates
pub mod prelude {
    pub use crate::effect::{Effect, EffectId};
    pub use crate::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
    pub use crate::reducer::Reducer;
    pub use smallvec::{SmallVec, smallvec};
}

#[cfg(test)]
#[allow(clippy::panic)] // Test code can panic
mod tests {
    use super::effect::{Effect, EffectId};
    use super::environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
    use std::time::Duration;

    #[test]
    fn effect_id_equality_is_by_name() {
        const A: EffectId = EffectId::new("feature/timer");
        let b = EffectId::new("feature/timer");
        assert_eq!(A, b);
        assert_ne!(A, EffectId::new("feature/other"));
        assert_eq!(A.as_str(), "feature/timer");
    }

    #[test]
    fn armed_timer_wraps_a_delay() {
        let effect: Effect<u32> =
            Effect::armed_timer(EffectId::new("t"), Duration::from_secs(1), 7);

        match effect {
            Effect::Cancellable { id, effect } => {
                assert_eq!(id, EffectId::new("t"));
                assert!(matches!(*effect, Effect::Delay { .. }));
            },
            other => panic!("expected Cancellable, got {other:?}"),
        }
    }

    #[test]
    fn debug_formats_every_variant() {
        let variants: Vec<Effect<u32>> = vec![
            Effect::None,
            Effect::Parallel(vec![Effect::None]),
            Effect::Sequential(vec![Effect::None]),
            Effect::Delay {
                duration: Duration::from_millis(5),
                action: Box::new(1),
            },
            Effect::Future(Box::pin(async { None })),
            Effect::Cancel(EffectId::new("x")),
            Effect::CancelAll,
        ];

        for v in &variants {
            assert!(!format!("{v:?}").is_empty());
        }
    }

    #[test]
    fn uuid_generator_produces_unique_ids() {
        let ids = UuidGenerator;
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        assert!(clock.now().timestamp() > 0);
    }
}
