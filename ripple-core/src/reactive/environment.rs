//! Reactive Environment
//!
//! The environment is the scheduler that connects contexts, cells, derived
//! values, and observers. It owns three pieces of state:
//!
//! 1. The "current context" stack, which attributes reactive reads to the
//!    computation performing them.
//!
//! 2. The context id counter.
//!
//! 3. The pending-flush queue: contexts whose observers were invalidated and
//!    are waiting to re-run.
//!
//! # Scoping
//!
//! There is no global environment. Each independent reactive graph (for
//! example, one per user session) constructs its own `Environment` and passes
//! the handle into every cell, derived value, and observer it creates, so
//! many graphs can coexist in one process without cross-talk.
//!
//! The engine's bookkeeping is not meant to be driven from two tasks at once:
//! one environment belongs to one logical execution scope. Because the
//! current-context stack lives in the environment rather than in thread-local
//! storage, a context stays current across `.await` points within that scope.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::queue::PriorityQueueFifo;

use super::context::Context;

/// Post-flush hook, shared so the list can be snapshotted outside the lock.
type FlushedCallback = Arc<dyn Fn() + Send + Sync>;

/// The reactive environment: scheduler and coordinator for one reactive
/// graph.
///
/// `Environment` is a cheap handle; clones share the same underlying state.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

/// Weak handle stored inside contexts, so a context never keeps its
/// environment alive.
#[derive(Clone)]
pub(crate) struct WeakEnvironment {
    inner: Weak<EnvironmentInner>,
}

impl WeakEnvironment {
    pub(crate) fn upgrade(&self) -> Option<Environment> {
        self.inner.upgrade().map(|inner| Environment { inner })
    }
}

struct EnvironmentInner {
    next_id: AtomicU64,
    stack: Mutex<Vec<Context>>,
    pending: Mutex<PriorityQueueFifo<Context>>,
    flushed_callbacks: Mutex<Vec<FlushedCallback>>,
}

impl Environment {
    /// Create a new, empty environment.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EnvironmentInner {
                next_id: AtomicU64::new(0),
                stack: Mutex::new(Vec::new()),
                pending: Mutex::new(PriorityQueueFifo::new()),
                flushed_callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a fresh context with the next available id.
    pub fn new_context(&self) -> Context {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        Context::new(id, self.downgrade())
    }

    /// Return the currently running context.
    ///
    /// # Errors
    ///
    /// [`Error::NoCurrentContext`] if called outside any `run`. Reading a
    /// cell or derived value outside a reactive computation is a caller-level
    /// programming error and must propagate.
    pub fn current_context(&self) -> Result<Context> {
        self.inner
            .stack
            .lock()
            .last()
            .cloned()
            .ok_or(Error::NoCurrentContext)
    }

    /// Run all pending flush callbacks until the queue settles.
    ///
    /// The drain is generational: the entire pending queue is snapshotted
    /// into a batch (priority order, FIFO among equal priorities), every
    /// context in the batch is processed, and only then is the queue checked
    /// again. An observer that writes a cell during generation N can
    /// invalidate and re-schedule other observers; those run in generation
    /// N+1, after all of generation N has completed. `flush()` does not
    /// return until a full pass leaves the queue empty.
    pub async fn flush(&self) {
        loop {
            let batch = self.drain_pending();
            if batch.is_empty() {
                break;
            }

            tracing::trace!(generation_size = batch.len(), "flushing reactive contexts");

            for ctx in batch {
                ctx.execute_flush_callbacks().await;
            }
        }

        let callbacks: Vec<FlushedCallback> =
            self.inner.flushed_callbacks.lock().iter().cloned().collect();
        for cb in callbacks {
            cb();
        }
    }

    /// Register a hook to run after every completed `flush()`.
    ///
    /// The surrounding collaborator (e.g. a session layer) uses this to emit
    /// accumulated output once the graph has settled.
    pub fn on_flushed(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.flushed_callbacks.lock().push(Arc::new(callback));
    }

    /// Run `body` without registering any dependencies on the caller.
    ///
    /// The body executes inside a throwaway context which is invalidated as
    /// soon as the body returns (on every exit path, including panics), so
    /// any registrations it made are immediately detached and the caller is
    /// never notified of changes to the values read inside.
    pub fn isolate<T>(&self, body: impl FnOnce() -> T) -> T {
        let ctx = self.new_context();
        let _invalidate = InvalidateOnDrop(ctx.clone());
        let _guard = self.enter(ctx);
        body()
    }

    /// Asynchronous form of [`isolate`](Environment::isolate): the throwaway
    /// context stays current across `.await` points of the body.
    pub async fn isolate_async<T>(&self, body: impl Future<Output = T>) -> T {
        let ctx = self.new_context();
        let _invalidate = InvalidateOnDrop(ctx.clone());
        let _guard = self.enter(ctx);
        body.await
    }

    /// Schedule the current context to be invalidated after `delay`, followed
    /// by a flush.
    ///
    /// Because a re-run resets the invalidation, an observer that calls this
    /// on every run re-executes periodically until it is destroyed or stops
    /// calling. The timer is cancelled if the context is invalidated by other
    /// means first.
    ///
    /// Must be called from within a running context, on a tokio runtime.
    pub fn invalidate_later(&self, delay: Duration) -> Result<()> {
        let ctx = self.current_context()?;

        let env = self.clone();
        let timer_ctx = ctx.clone();
        let cancellable = Arc::new(AtomicBool::new(true));
        let armed = cancellable.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Past this point the invalidation is our own; the cancel
            // callback below must not abort us.
            armed.store(false, Ordering::SeqCst);
            timer_ctx.invalidate();
            env.flush().await;
        });

        ctx.on_invalidate(move || {
            if cancellable.load(Ordering::SeqCst) {
                task.abort();
            }
        });

        Ok(())
    }

    /// Push a context onto the pending-flush queue.
    pub(crate) fn add_pending_flush(&self, ctx: &Context, priority: i32) {
        self.inner.pending.lock().put(priority, ctx.clone());
    }

    /// Make `ctx` the current context until the returned guard drops.
    pub(crate) fn enter(&self, ctx: Context) -> ContextGuard {
        let id = ctx.id();
        self.inner.stack.lock().push(ctx);
        ContextGuard {
            env: self.clone(),
            id,
        }
    }

    fn drain_pending(&self) -> Vec<Context> {
        let mut queue = self.inner.pending.lock();
        let mut batch = Vec::with_capacity(queue.len());
        while let Some(ctx) = queue.pop() {
            batch.push(ctx);
        }
        batch
    }

    fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("depth", &self.inner.stack.lock().len())
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}

/// Pops the current-context stack when dropped, so the stack is restored on
/// every exit path of a run, including panics and task cancellation.
pub(crate) struct ContextGuard {
    env: Environment,
    id: u64,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let popped = self.env.inner.stack.lock().pop();
        if let Some(ctx) = popped {
            debug_assert_eq!(
                ctx.id(),
                self.id,
                "context stack mismatch: expected {}, got {}",
                self.id,
                ctx.id()
            );
        }
    }
}

/// Invalidates the wrapped context when dropped. Used by `isolate` so the
/// throwaway context is detached even if the body panics.
struct InvalidateOnDrop(Context);

impl Drop for InvalidateOnDrop {
    fn drop(&mut self) {
        self.0.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_current_context_outside_run() {
        let env = Environment::new();
        assert!(matches!(
            env.current_context(),
            Err(Error::NoCurrentContext)
        ));
    }

    #[test]
    fn nested_runs_restore_outer_context() {
        let env = Environment::new();
        let outer = env.new_context();
        let inner = env.new_context();

        outer
            .run(|| {
                assert_eq!(env.current_context().map(|c| c.id()).ok(), Some(outer.id()));

                inner
                    .run(|| {
                        assert_eq!(
                            env.current_context().map(|c| c.id()).ok(),
                            Some(inner.id())
                        );
                    })
                    .expect("environment is alive");

                assert_eq!(env.current_context().map(|c| c.id()).ok(), Some(outer.id()));
            })
            .expect("environment is alive");

        assert!(env.current_context().is_err());
    }

    #[test]
    fn isolate_invalidates_its_context() {
        let env = Environment::new();

        let ctx = env.isolate(|| env.current_context().expect("isolate provides a context"));

        assert!(ctx.is_invalidated());
        assert!(env.current_context().is_err());
    }

    #[test]
    fn environments_are_independent() {
        let a = Environment::new();
        let b = Environment::new();

        let ctx = a.new_context();
        ctx.run(|| {
            assert!(a.current_context().is_ok());
            assert!(b.current_context().is_err());
        })
        .expect("environment is alive");
    }

    #[tokio::test]
    async fn flush_on_empty_queue_is_a_noop() {
        let env = Environment::new();
        env.flush().await;
    }

    #[tokio::test]
    async fn on_flushed_hook_runs_after_flush() {
        use std::sync::atomic::AtomicI32;

        let env = Environment::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        env.on_flushed(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        env.flush().await;
        env.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn scheduled_contexts_flush_in_priority_order() {
        let env = Environment::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (priority, label) in [(1, "low"), (5, "high"), (1, "low2")] {
            let ctx = env.new_context();
            let order = order.clone();
            ctx.on_flush(move || async move {
                order.lock().push(label);
            });
            ctx.schedule_flush(priority);
        }

        env.flush().await;
        assert_eq!(*order.lock(), vec!["high", "low", "low2"]);
    }
}
