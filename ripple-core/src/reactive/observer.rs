//! Observers
//!
//! An `Observer` is an eager side effect: a body that re-runs whenever any
//! reactive value it read during its last run changes.
//!
//! # How Observers Work
//!
//! 1. Every run gets a fresh context. While the body runs, each cell or
//!    derived value it reads registers that context as a dependent.
//!
//! 2. When any of those values changes, the context is invalidated, which
//!    schedules the observer on the environment's pending-flush queue at the
//!    observer's priority.
//!
//! 3. The next [`Environment::flush`] re-runs the body, establishing a fresh
//!    set of dependency edges.
//!
//! # Deferred First Run
//!
//! Creating an observer never runs the body inline. Construction creates a
//! context and immediately invalidates it, which schedules the first run for
//! the next flush. This keeps construction cheap and gives the caller a
//! chance to finish wiring the graph before anything executes.
//!
//! # Errors
//!
//! An error returned by the body is logged and swallowed; it never aborts the
//! flush or tears down the observer. The observer keeps whatever dependencies
//! it registered before failing, so a later change can still re-run it.
//!
//! [`Environment::flush`]: super::Environment::flush

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::BoxError;

use super::context::Context;
use super::environment::Environment;

type ObserverFn = Box<dyn Fn() -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;

/// Invalidation hook, shared so the list can be snapshotted outside the lock.
type InvalidateHook = Arc<dyn Fn() + Send + Sync>;

/// An eager reactive side effect.
///
/// `Observer` is a cheap handle; clones share the same underlying state.
/// The scheduler only holds weak references, so dropping the last handle
/// stops the observer. Call [`destroy`](Observer::destroy) to stop one that
/// is still referenced.
pub struct Observer {
    inner: Arc<ObserverInner>,
}

struct ObserverInner {
    env: Environment,
    func: ObserverFn,
    priority: i32,
    state: Mutex<ObserverState>,
    invalidate_hooks: Mutex<Vec<InvalidateHook>>,
    exec_count: AtomicU64,
}

struct ObserverState {
    destroyed: bool,
    ctx: Option<Context>,
}

impl Observer {
    /// Create an observer from a synchronous body, at the default priority.
    ///
    /// The first run happens on the next [`Environment::flush`], not inline.
    ///
    /// [`Environment::flush`]: super::Environment::flush
    pub fn new<F>(env: &Environment, func: F) -> Self
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::with_priority(env, 0, func)
    }

    /// Create an observer from a synchronous body at the given priority.
    ///
    /// Within one flush generation, higher priorities run first; equal
    /// priorities run in scheduling order.
    pub fn with_priority<F>(env: &Environment, priority: i32, func: F) -> Self
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::from_boxed(
            env,
            priority,
            Box::new(move || {
                let result = func();
                Box::pin(std::future::ready(result)) as BoxFuture<'static, _>
            }),
        )
    }

    /// Create an observer from an asynchronous body, at the default priority.
    pub fn new_async<F, Fut>(env: &Environment, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        Self::with_priority_async(env, 0, func)
    }

    /// Create an observer from an asynchronous body at the given priority.
    pub fn with_priority_async<F, Fut>(env: &Environment, priority: i32, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        Self::from_boxed(env, priority, Box::new(move || Box::pin(func())))
    }

    fn from_boxed(env: &Environment, priority: i32, func: ObserverFn) -> Self {
        let observer = Self {
            inner: Arc::new(ObserverInner {
                env: env.clone(),
                func,
                priority,
                state: Mutex::new(ObserverState {
                    destroyed: false,
                    ctx: None,
                }),
                invalidate_hooks: Mutex::new(Vec::new()),
                exec_count: AtomicU64::new(0),
            }),
        };

        // Defer the first run: invalidating the fresh context schedules it on
        // the pending-flush queue, and the next flush performs run().
        observer.create_context().invalidate();
        observer
    }

    /// Run the body once inside a fresh context.
    ///
    /// Normally driven by [`Environment::flush`]; callers only need this to
    /// force a run outside the scheduler, e.g. in tests.
    ///
    /// [`Environment::flush`]: super::Environment::flush
    pub async fn run(&self) {
        let ctx = self.create_context();
        self.inner.exec_count.fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.clone();
        match ctx.run_async(async move { (inner.func)().await }).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "observer body failed");
            }
            Err(err) => {
                tracing::warn!(error = %err, "observer could not run");
            }
        }
    }

    /// Register a hook to run every time this observer is invalidated.
    ///
    /// Unlike [`Context::on_invalidate`], which is one-shot per context, the
    /// hook persists across re-runs. Destroying the observer fires it one
    /// last time.
    ///
    /// [`Context::on_invalidate`]: super::Context::on_invalidate
    pub fn on_invalidate(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.invalidate_hooks.lock().push(Arc::new(hook));
    }

    /// Stop this observer permanently.
    ///
    /// Invalidates the current context (detaching every dependency edge) and
    /// marks the observer destroyed so an already-scheduled flush entry
    /// becomes a no-op. Idempotent.
    pub fn destroy(&self) {
        let ctx = {
            let mut state = self.inner.state.lock();
            state.destroyed = true;
            state.ctx.take()
        };

        if let Some(ctx) = ctx {
            ctx.invalidate();
        }
    }

    /// True once [`destroy`](Observer::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Number of times the body has run.
    pub fn exec_count(&self) -> u64 {
        self.inner.exec_count.load(Ordering::Relaxed)
    }

    /// Create the context for the next run and wire up its invalidation and
    /// flush behavior.
    fn create_context(&self) -> Context {
        let ctx = self.inner.env.new_context();
        self.inner.state.lock().ctx = Some(ctx.clone());

        let weak = Arc::downgrade(&self.inner);
        let weak_ctx = ctx.downgrade();
        let ctx_id = ctx.id();
        ctx.on_invalidate(move || {
            let Some(inner) = weak.upgrade() else { return };

            {
                let mut state = inner.state.lock();
                // Leave a newer context in place: destroy() may already have
                // replaced or taken it.
                if state.ctx.as_ref().is_some_and(|c| c.id() == ctx_id) {
                    state.ctx = None;
                }
            }

            let hooks: Vec<InvalidateHook> =
                inner.invalidate_hooks.lock().iter().cloned().collect();
            for hook in hooks {
                hook();
            }

            // Schedule the re-run. A destroyed observer is filtered out at
            // flush time rather than here, matching destroy-after-schedule
            // semantics.
            if let Some(ctx) = weak_ctx.upgrade() {
                ctx.schedule_flush(inner.priority);
            }
        });

        let weak = Arc::downgrade(&self.inner);
        ctx.on_flush(move || async move {
            let Some(inner) = weak.upgrade() else { return };
            if inner.state.lock().destroyed {
                return;
            }
            let observer = Observer { inner };
            observer.run().await;
        });

        ctx
    }
}

impl Clone for Observer {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("priority", &self.inner.priority)
            .field("destroyed", &self.is_destroyed())
            .field("exec_count", &self.exec_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI32;

    use super::*;
    use crate::reactive::ReactiveCell;

    #[tokio::test]
    async fn first_run_waits_for_flush() {
        let env = Environment::new();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let _observer = Observer::new(&env, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
        env.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // No further invalidation, no further runs.
        env.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reruns_when_a_dependency_changes() {
        let env = Environment::new();
        let cell = ReactiveCell::new(&env, 1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let cell_clone = cell.clone();
        let seen_clone = seen.clone();
        let observer = Observer::new(&env, move || {
            seen_clone.lock().push(*cell_clone.get()?);
            Ok(())
        });

        env.flush().await;
        cell.set_value(2);
        env.flush().await;

        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(observer.exec_count(), 2);
    }

    #[tokio::test]
    async fn destroyed_before_first_flush_never_runs() {
        let env = Environment::new();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let observer = Observer::new(&env, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        observer.destroy();
        env.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(observer.is_destroyed());
    }

    #[tokio::test]
    async fn destroy_after_schedule_suppresses_the_run() {
        let env = Environment::new();
        let cell = ReactiveCell::new(&env, 1);
        let count = Arc::new(AtomicI32::new(0));

        let cell_clone = cell.clone();
        let count_clone = count.clone();
        let observer = Observer::new(&env, move || {
            cell_clone.get()?;
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        env.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The write schedules a re-run; destroying before the flush must
        // suppress it.
        cell.set_value(2);
        observer.destroy();
        env.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn body_errors_are_swallowed() {
        let env = Environment::new();
        let cell = ReactiveCell::new(&env, 1);
        let count = Arc::new(AtomicI32::new(0));

        let cell_clone = cell.clone();
        let observer: Observer = Observer::new(&env, move || {
            cell_clone.get()?;
            Err("observer failed".into())
        });

        let count_clone = count.clone();
        let _healthy = Observer::new(&env, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        env.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The failing observer kept its dependency and re-runs on change.
        cell.set_value(2);
        env.flush().await;
        assert_eq!(observer.exec_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_hook_fires_on_every_invalidation() {
        let env = Environment::new();
        let cell = ReactiveCell::new(&env, 1);
        let hooked = Arc::new(AtomicI32::new(0));

        let cell_clone = cell.clone();
        let observer = Observer::new(&env, move || {
            cell_clone.get()?;
            Ok(())
        });

        let hooked_clone = hooked.clone();
        observer.on_invalidate(move || {
            hooked_clone.fetch_add(1, Ordering::SeqCst);
        });

        env.flush().await;
        assert_eq!(hooked.load(Ordering::SeqCst), 0);

        cell.set_value(2);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);

        env.flush().await;
        observer.destroy();
        assert_eq!(hooked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_body_tracks_dependencies_across_await() {
        let env = Environment::new();
        let cell = ReactiveCell::new(&env, 1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let cell_clone = cell.clone();
        let seen_clone = seen.clone();
        let _observer = Observer::new_async(&env, move || {
            let cell = cell_clone.clone();
            let seen = seen_clone.clone();
            async move {
                tokio::task::yield_now().await;
                seen.lock().push(*cell.get()?);
                Ok(())
            }
        });

        env.flush().await;
        cell.set_value(5);
        env.flush().await;

        assert_eq!(*seen.lock(), vec![1, 5]);
    }
}
