//! Reactive Context
//!
//! A `Context` represents one execution of a reactive computation (one run of
//! a derived value or an observer). While a computation runs, its context is
//! the environment's "current context", and every reactive value read during
//! the run attributes the dependency to it.
//!
//! # Lifecycle
//!
//! A context is created by [`Environment::new_context`], runs at most one
//! body via [`Context::run`] / [`Context::run_async`], and is invalidated at
//! most once. Invalidation is terminal: the invalidate callbacks fire exactly
//! once, in registration order, and the list is cleared. A callback
//! registered after invalidation runs immediately, so late subscribers still
//! observe the terminal state.
//!
//! Dependency edges are one-shot by construction: every run gets a fresh
//! context, and invalidating the old context detaches it from every
//! `DependentSet` it was registered with.
//!
//! [`Environment::new_context`]: super::Environment::new_context

use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::Result;

use super::environment::{Environment, WeakEnvironment};

/// One-shot callback fired when a context is invalidated.
pub(crate) type InvalidateCallback = Box<dyn FnOnce() + Send>;

/// One-shot asynchronous callback fired when the environment flushes a
/// context.
pub(crate) type FlushCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A reactive context: the unit of dependency attribution.
///
/// `Context` is a cheap handle; clones share the same underlying state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Weak handle to a context, used by `DependentSet` so that dependency
/// bookkeeping never keeps a context alive (no strong cycles).
#[derive(Clone)]
pub(crate) struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }
}

struct ContextInner {
    id: u64,
    env: WeakEnvironment,
    state: Mutex<ContextState>,
}

struct ContextState {
    invalidated: bool,
    invalidate_callbacks: SmallVec<[InvalidateCallback; 2]>,
    flush_callbacks: SmallVec<[FlushCallback; 1]>,
}

impl Context {
    pub(crate) fn new(id: u64, env: WeakEnvironment) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                env,
                state: Mutex::new(ContextState {
                    invalidated: false,
                    invalidate_callbacks: SmallVec::new(),
                    flush_callbacks: SmallVec::new(),
                }),
            }),
        }
    }

    /// Unique id of this context, issued by the environment at creation.
    /// Ids increase monotonically, so ascending id order is creation order.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// True once this context has been invalidated. Monotonic.
    pub fn is_invalidated(&self) -> bool {
        self.inner.state.lock().invalidated
    }

    /// Run a synchronous body with this context as the current context.
    ///
    /// The context is popped on every exit path, including panics.
    pub fn run<T>(&self, body: impl FnOnce() -> T) -> Result<T> {
        let env = self.environment()?;
        let _guard = env.enter(self.clone());
        Ok(body())
    }

    /// Run an asynchronous body with this context as the current context.
    ///
    /// The context remains current across `.await` points of the body and is
    /// popped on every exit path, including cancellation of the enclosing
    /// task.
    pub async fn run_async<T>(&self, body: impl Future<Output = T>) -> Result<T> {
        let env = self.environment()?;
        let _guard = env.enter(self.clone());
        Ok(body.await)
    }

    /// Invalidate this context.
    ///
    /// Idempotent: the first call fires every registered invalidate callback
    /// in registration order and clears the list; subsequent calls are
    /// no-ops. Callbacks are drained out of the lock before being invoked, so
    /// they may safely re-enter the engine.
    pub fn invalidate(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.invalidated {
                return;
            }
            state.invalidated = true;
            std::mem::take(&mut state.invalidate_callbacks)
        };

        tracing::trace!(id = self.inner.id, "invalidating context");

        for cb in callbacks {
            cb();
        }
    }

    /// Register a callback to run when this context is invalidated.
    ///
    /// If the context is already invalidated, the callback runs immediately.
    pub fn on_invalidate(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.invalidated {
            drop(state);
            callback();
        } else {
            state.invalidate_callbacks.push(Box::new(callback));
        }
    }

    /// Register an asynchronous callback to run when the environment
    /// processes this context during a flush.
    pub fn on_flush<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .state
            .lock()
            .flush_callbacks
            .push(Box::new(move || Box::pin(callback())));
    }

    /// Ask the environment to flush this context on the next `flush()` call.
    ///
    /// No-op if the environment has been dropped.
    pub fn schedule_flush(&self, priority: i32) {
        if let Some(env) = self.inner.env.upgrade() {
            env.add_pending_flush(self, priority);
        }
    }

    /// Run and clear all registered flush callbacks, in registration order.
    pub(crate) async fn execute_flush_callbacks(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            std::mem::take(&mut state.flush_callbacks)
        };

        for cb in callbacks {
            cb().await;
        }
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn environment(&self) -> Result<Environment> {
        self.inner.env.upgrade().ok_or(crate::Error::EnvironmentGone)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}
