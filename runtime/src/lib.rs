//! # Chama Runtime
//!
//! Runtime implementation for the chama client architecture.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: The runtime that manages state and executes effects
//! - **Effect Executor**: Executes effect descriptions and feeds actions back to reducers
//! - **Cancellation Registry**: Armed timers keyed by [`EffectId`], aborted on
//!   `Cancel`/`CancelAll` or when a slot is re-armed
//!
//! ## Example
//!
//! ```ignore
//! use chama_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use chama_core::effect::{Effect, EffectId};
use chama_core::reducer::Reducer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::AbortHandle;

/// Retry logic with exponential backoff
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        ///
        /// The action broadcast channel was closed, typically because the
        /// store is shutting down.
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects an action
/// produced. Aborted timers count as completed.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// // All effects from Action::Start are now complete
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: tx,
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    ///
    /// Useful for initialization in loops where you need a `last_handle`.
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Wait for all effects spawned by the originating action to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            let _ = self.completion.changed().await;
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout expires before all effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: Effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    /// Increment the effect counter (effect started)
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the effect counter (effect completed)
    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Counter reached zero, notify waiters
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements the effect counter on drop
///
/// Ensures the counter is always decremented, even if the effect panics or
/// its task is aborted mid-await.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A registered cancellable task.
///
/// The epoch distinguishes the task currently occupying a slot from an older
/// task for the same id that is deregistering itself after completion.
struct ArmedSlot {
    epoch: u64,
    handle: AbortHandle,
}

type SlotRegistry = Arc<Mutex<HashMap<EffectId, ArmedSlot>>>;

fn lock_slots(registry: &SlotRegistry) -> std::sync::MutexGuard<'_, HashMap<EffectId, ArmedSlot>> {
    // Mutex poison is unrecoverable noise here; the map stays usable.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store module - The runtime for reducers
pub mod store {
    use super::{
        ArmedSlot, AtomicBool, AtomicCounterGuard, AtomicU64, AtomicUsize, DecrementGuard,
        Duration, Effect, EffectHandle, EffectId, EffectTracking, HashMap, Ordering, Reducer,
        RwLock, SlotRegistry, StoreError, lock_slots,
    };
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    /// 5. Armed timers (cancellable effects keyed by [`EffectId`])
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = Store::new(
    ///     MatchingState::default(),
    ///     MatchingReducer::new(),
    ///     production_environment(),
    /// );
    ///
    /// store.send(MatchingAction::AcquireLocation).await?;
    /// ```
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Action broadcast channel for observing actions produced by effects.
        ///
        /// Every feedback action (timer ticks, network results) is broadcast
        /// to observers before being fed back into the reducer. This is the
        /// subscribe/notify surface the UI layer consumes.
        action_broadcast: broadcast::Sender<A>,
        /// Armed cancellable effects, at most one per id.
        slots: SlotRegistry,
        /// Monotonic arm counter; lets a finished task tell whether its slot
        /// was re-armed while it ran.
        arm_epoch: Arc<AtomicU64>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// Action broadcast capacity defaults to 16; increase with
        /// [`Store::with_broadcast_capacity`] when observers may lag.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
        }

        /// Create a new Store with custom action broadcast capacity
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
                slots: Arc::new(Mutex::new(HashMap::new())),
                arm_epoch: Arc::new(AtomicU64::new(0)),
            }
        }

        /// Process an action through the reducer and execute its effects
        ///
        /// 1. Calls the reducer with (state, action, environment) under the
        ///    write lock
        /// 2. Executes returned effects asynchronously on spawned tasks
        /// 3. Effects may produce more actions (feedback loop)
        ///
        /// `send()` returns after *starting* effect execution; await the
        /// returned [`EffectHandle`] to wait for completion.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            tracing::debug!("Processing action");
            metrics::counter!("store.actions.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }

            Ok(handle)
        }

        /// Send an action and wait for a matching result action
        ///
        /// This method is designed for request-response flows: subscribe to
        /// the action broadcast, send the initial action, then wait for the
        /// first feedback action matching the predicate.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: timeout expired before a matching action
        /// - [`StoreError::ChannelClosed`]: broadcast closed (store shutting down)
        /// - [`StoreError::ShutdownInProgress`]: store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            // Subscribe BEFORE sending to avoid race condition
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {}, // Not the action we want, keep waiting
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Slow consumer; if the terminal action was among
                            // the dropped ones the timeout catches it.
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to all feedback actions from this store
        ///
        /// Only actions produced by effects are broadcast, not the initial
        /// actions passed to `send`. The receiver must be consumed in a loop
        /// or it will lag and skip old actions.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let phase = store.state(|s| s.phase).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Number of armed cancellable slots (test/diagnostic aid)
        #[must_use]
        pub fn armed_timers(&self) -> usize {
            lock_slots(&self.slots).len()
        }

        /// Gracefully shut down the store
        ///
        /// Rejects new actions, aborts all armed timers, then waits up to
        /// `timeout` for in-flight effects to finish. Idempotent.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] with the number of effects
        /// still running when the timeout elapsed.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            self.shutdown.store(true, Ordering::Release);
            tracing::info!("Store shutdown initiated");

            // Armed timers are pending by definition; waiting a discovery or
            // auto-reset delay out would stall shutdown for no benefit.
            self.abort_all_slots();

            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let pending = self.pending_effects.load(Ordering::SeqCst);
                if pending == 0 {
                    tracing::info!("Store shutdown complete");
                    return Ok(());
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(pending, "Store shutdown timed out");
                    return Err(StoreError::ShutdownTimeout(pending));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn abort_slot(&self, id: EffectId) {
            if let Some(slot) = lock_slots(&self.slots).remove(&id) {
                slot.handle.abort();
                metrics::counter!("store.timers.cancelled").increment(1);
                tracing::debug!(timer = %id, "Cancelled armed effect");
            }
        }

        fn abort_all_slots(&self) {
            let drained: Vec<(EffectId, ArmedSlot)> =
                lock_slots(&self.slots).drain().collect();
            for (id, slot) in drained {
                slot.handle.abort();
                tracing::debug!(timer = %id, "Cancelled armed effect");
            }
        }

        /// Execute an effect with tracking
        ///
        /// # Effect Types
        ///
        /// - `None`: no-op
        /// - `Future`: executes async computation, feeds resulting action back
        /// - `Delay`: waits for duration, then feeds the action back
        /// - `Parallel`: executes effects concurrently
        /// - `Sequential`: executes effects in order
        /// - `Cancellable`: registers the work under its id; re-arming a live
        ///   id aborts the previous occupant first
        /// - `Cancel`/`CancelAll`: abort armed work
        ///
        /// Effect failures are fire-and-forget: logged, never halting the
        /// store. The [`DecrementGuard`] keeps counters correct even when a
        /// task panics or is aborted.
        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking;
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard;

                        if let Some(action) = fut.await {
                            store.feed_back(action).await;
                        }
                    });
                },
                Effect::Delay { duration, action } => {
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking;
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard;

                        tokio::time::sleep(duration).await;
                        store.feed_back(*action).await;
                    });
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
                Effect::Sequential(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "sequential")
                        .increment(1);
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking;
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard;

                        for effect in effects {
                            store.run_inline(effect).await;
                        }
                    });
                },
                Effect::Cancellable { id, effect } => {
                    metrics::counter!("store.effects.executed", "type" => "cancellable")
                        .increment(1);
                    self.arm(id, *effect, tracking);
                },
                Effect::Cancel(id) => {
                    metrics::counter!("store.effects.executed", "type" => "cancel").increment(1);
                    self.abort_slot(id);
                },
                Effect::CancelAll => {
                    metrics::counter!("store.effects.executed", "type" => "cancel_all")
                        .increment(1);
                    self.abort_all_slots();
                },
            }
        }

        /// Register `effect` under `id`, aborting any previous occupant.
        fn arm(&self, id: EffectId, effect: Effect<A>, tracking: EffectTracking) {
            tracking.increment();
            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

            let epoch = self.arm_epoch.fetch_add(1, Ordering::SeqCst);
            let store = self.clone();
            let registry = Arc::clone(&self.slots);

            let task = tokio::spawn(async move {
                let _guard = DecrementGuard(tracking);
                let _pending_guard = pending_guard;

                store.run_inline(effect).await;

                // Deregister, unless the slot was re-armed while we ran.
                let mut slots = lock_slots(&registry);
                if slots.get(&id).is_some_and(|s| s.epoch == epoch) {
                    slots.remove(&id);
                }
            });

            let replaced = lock_slots(&self.slots).insert(
                id,
                ArmedSlot {
                    epoch,
                    handle: task.abort_handle(),
                },
            );
            if let Some(prev) = replaced {
                prev.handle.abort();
                tracing::debug!(timer = %id, "Re-armed effect, previous occupant aborted");
            }
        }

        /// Execute an effect inline on the current task.
        ///
        /// Used inside cancellable and sequential tasks so that aborting the
        /// task aborts the whole effect tree beneath it.
        fn run_inline(
            &self,
            effect: Effect<A>,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Delay { duration, action } => {
                        tokio::time::sleep(duration).await;
                        self.feed_back(*action).await;
                    },
                    Effect::Future(fut) => {
                        if let Some(action) = fut.await {
                            self.feed_back(action).await;
                        }
                    },
                    Effect::Sequential(effects) => {
                        for effect in effects {
                            self.run_inline(effect).await;
                        }
                    },
                    Effect::Parallel(effects) => {
                        futures::future::join_all(
                            effects.into_iter().map(|effect| self.run_inline(effect)),
                        )
                        .await;
                    },
                    Effect::Cancellable { id, effect } => {
                        // Nested arming registers independently; aborting the
                        // parent does not abort it.
                        let (_, tracking) = EffectHandle::new();
                        self.arm(id, *effect, tracking);
                    },
                    Effect::Cancel(id) => self.abort_slot(id),
                    Effect::CancelAll => self.abort_all_slots(),
                }
            })
        }

        /// Broadcast a feedback action to observers, then run it through the
        /// reducer.
        async fn feed_back(&self, action: A) {
            let _ = self.action_broadcast.send(action.clone());
            if let Err(err) = self.send(action).await {
                tracing::debug!(error = %err, "Feedback action dropped");
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
                slots: Arc::clone(&self.slots),
                arm_epoch: Arc::clone(&self.arm_epoch),
            }
        }
    }
}

// Re-export for convenience
pub use store::Store;
