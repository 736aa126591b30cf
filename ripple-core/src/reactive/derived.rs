//! Derived Values
//!
//! A `Derived` is a cached, lazily re-computed value.
//!
//! # How Derived Values Work
//!
//! 1. Each computation runs inside a fresh context, so every cell (or other
//!    derived value) read during the run registers that context.
//!
//! 2. When any upstream value changes, the context is invalidated: the
//!    derived value marks itself stale and propagates the invalidation to its
//!    own dependents.
//!
//! 3. Nothing recomputes until the next read. Stale derived values that are
//!    never read again cost nothing.
//!
//! # Error Stickiness
//!
//! A failed computation is cached exactly like a value: every subsequent
//! reader receives a clone of the same error until the derived value is
//! invalidated again. Errors never silently fall back to a previous good
//! value.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{BoxError, Error, Result};

use super::context::Context;
use super::dependents::DependentSet;
use super::environment::Environment;

type ComputeFn<T> = Box<dyn Fn() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync>;

/// A lazily cached reactive computation.
///
/// `Derived` is a cheap handle; clones share the same underlying state.
pub struct Derived<T> {
    inner: Arc<DerivedInner<T>>,
}

struct DerivedInner<T> {
    env: Environment,
    compute: ComputeFn<T>,
    dependents: DependentSet,
    state: Mutex<DerivedState<T>>,
    exec_count: AtomicU64,
}

struct DerivedState<T> {
    /// True until the first computation, and again after any upstream
    /// invalidation. Never computed eagerly.
    invalidated: bool,
    /// Re-entrancy guard: while a computation is in flight, a concurrent
    /// read must recompute rather than hand out a half-built cache.
    running: bool,
    ctx: Option<Context>,
    most_recent_ctx_id: Option<u64>,
    cached: Option<Result<Arc<T>>>,
}

impl<T: Send + Sync + 'static> Derived<T> {
    /// Create a derived value from a synchronous computation.
    ///
    /// The computation does not run until the first
    /// [`get_value`](Derived::get_value).
    pub fn new<F>(env: &Environment, compute: F) -> Self
    where
        F: Fn() -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::from_boxed(
            env,
            Box::new(move || {
                let result = compute();
                Box::pin(std::future::ready(result)) as BoxFuture<'static, _>
            }),
        )
    }

    /// Create a derived value from an asynchronous computation.
    pub fn new_async<F, Fut>(env: &Environment, compute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    {
        Self::from_boxed(env, Box::new(move || Box::pin(compute())))
    }

    fn from_boxed(env: &Environment, compute: ComputeFn<T>) -> Self {
        Self {
            inner: Arc::new(DerivedInner {
                env: env.clone(),
                compute,
                dependents: DependentSet::new(),
                state: Mutex::new(DerivedState {
                    invalidated: true,
                    running: false,
                    ctx: None,
                    most_recent_ctx_id: None,
                    cached: None,
                }),
                exec_count: AtomicU64::new(0),
            }),
        }
    }

    /// Read the value, recomputing first if it is stale.
    ///
    /// Registers the caller's context as a dependent of this derived value,
    /// so derived values can depend on other derived values.
    ///
    /// # Errors
    ///
    /// [`Error::NoCurrentContext`] outside any running context;
    /// [`Error::Compute`] (cached) if the computation failed.
    pub async fn get_value(&self) -> Result<Arc<T>> {
        self.inner.dependents.register(&self.inner.env)?;

        loop {
            let needs_update = {
                let state = self.inner.state.lock();
                state.invalidated || state.running
            };
            if needs_update {
                self.update_value().await?;
            }

            // A validated derived value has a cached result. If an upstream
            // write landed between the update and this read, the cache was
            // cleared and the loop recomputes.
            if let Some(cached) = self.inner.state.lock().cached.clone() {
                return cached;
            }
        }
    }

    /// Recompute inside a fresh context and cache the outcome.
    async fn update_value(&self) -> Result<()> {
        let ctx = self.inner.env.new_context();

        let was_running = {
            let mut state = self.inner.state.lock();
            state.ctx = Some(ctx.clone());
            state.most_recent_ctx_id = Some(ctx.id());
            state.invalidated = false;
            let was = state.running;
            state.running = true;
            was
        };

        // When any upstream read during this run is written, mark this
        // derived stale, release the cached result so the allocation can be
        // reclaimed, and pass the invalidation on to whoever read us.
        let weak = Arc::downgrade(&self.inner);
        ctx.on_invalidate(move || {
            if let Some(inner) = weak.upgrade() {
                {
                    let mut state = inner.state.lock();
                    state.invalidated = true;
                    state.ctx = None;
                    state.cached = None;
                }
                inner.dependents.invalidate();
            }
        });

        // Restore the re-entrancy flag on every exit path, including
        // cancellation of the enclosing task.
        let _restore = RestoreRunning {
            state: &self.inner.state,
            was_running,
        };

        let inner = self.inner.clone();
        let outcome = ctx.run_async(async move { (inner.compute)().await }).await?;

        self.inner.exec_count.fetch_add(1, Ordering::Relaxed);

        let cached = match outcome {
            Ok(value) => Ok(Arc::new(value)),
            Err(err) => Err(Error::compute(err)),
        };
        self.inner.state.lock().cached = Some(cached);

        Ok(())
    }

    /// Number of times the computation has run.
    pub fn exec_count(&self) -> u64 {
        self.inner.exec_count.load(Ordering::Relaxed)
    }

    /// Number of contexts currently depending on this derived value.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.len()
    }

    /// True if the next read will recompute.
    pub fn is_invalidated(&self) -> bool {
        self.inner.state.lock().invalidated
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Derived")
            .field("invalidated", &state.invalidated)
            .field("running", &state.running)
            .field("most_recent_ctx_id", &state.most_recent_ctx_id)
            .field("exec_count", &self.inner.exec_count.load(Ordering::Relaxed))
            .finish()
    }
}

struct RestoreRunning<'a, T> {
    state: &'a Mutex<DerivedState<T>>,
    was_running: bool,
}

impl<T> Drop for RestoreRunning<'_, T> {
    fn drop(&mut self) {
        self.state.lock().running = self.was_running;
    }
}
