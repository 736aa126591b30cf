//! Dependent Tracking
//!
//! A `DependentSet` records which contexts depend on some reactive value.
//! Cells and derived values each own one; reading the value registers the
//! currently running context, and writing the value invalidates every
//! registered context.
//!
//! The set holds weak back-references only: it remembers which contexts asked
//! to be notified, but never owns their lifetime. Every registration installs
//! a self-removal callback on the context, so when a context is invalidated
//! for any reason it drops out of every set it was registered with. This is
//! what makes dependency edges one-shot: a computation must re-read a value
//! on its next run to keep being notified.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

use super::context::WeakContext;
use super::environment::Environment;

/// The set of contexts depending on one reactive value.
///
/// Keyed by context id in a `BTreeMap` so invalidation visits dependents in
/// ascending id order (creation order), which keeps notification order
/// deterministic.
pub struct DependentSet {
    dependents: Arc<Mutex<BTreeMap<u64, WeakContext>>>,
}

impl DependentSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            dependents: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Register the environment's current context as a dependent.
    ///
    /// Idempotent: a context that is already registered is left untouched.
    /// The registration is removed automatically when the context is
    /// invalidated.
    ///
    /// # Errors
    ///
    /// [`Error::NoCurrentContext`](crate::Error::NoCurrentContext) if no
    /// context is running.
    pub fn register(&self, env: &Environment) -> Result<()> {
        let ctx = env.current_context()?;
        let id = ctx.id();

        {
            let mut dependents = self.dependents.lock();
            if dependents.contains_key(&id) {
                return Ok(());
            }
            dependents.insert(id, ctx.downgrade());
        }

        // Self-removal keeps the set from accumulating dead contexts. Only a
        // weak reference to the map is captured, so a registration never
        // keeps the owning value alive either.
        let dependents = Arc::downgrade(&self.dependents);
        ctx.on_invalidate(move || {
            if let Some(dependents) = dependents.upgrade() {
                dependents.lock().remove(&id);
            }
        });

        Ok(())
    }

    /// Invalidate every registered context, in ascending id order.
    ///
    /// The entries are snapshotted into a local vector before any callback
    /// runs: invalidating one context can re-enter this same set (removing
    /// itself, or re-registering via a re-run), and that must not deadlock,
    /// skip a dependent, or notify one twice within this pass.
    pub fn invalidate(&self) {
        let snapshot: Vec<WeakContext> = self.dependents.lock().values().cloned().collect();

        for weak in snapshot {
            if let Some(ctx) = weak.upgrade() {
                ctx.invalidate();
            }
        }
    }

    /// Number of currently registered dependents.
    pub fn len(&self) -> usize {
        self.dependents.lock().len()
    }

    /// True if no context is registered.
    pub fn is_empty(&self) -> bool {
        self.dependents.lock().is_empty()
    }
}

impl Default for DependentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependentSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn register_requires_running_context() {
        let env = Environment::new();
        let deps = DependentSet::new();

        assert!(matches!(deps.register(&env), Err(Error::NoCurrentContext)));
    }

    #[test]
    fn register_is_idempotent() {
        let env = Environment::new();
        let deps = DependentSet::new();

        let ctx = env.new_context();
        ctx.run(|| {
            deps.register(&env).expect("context is running");
            deps.register(&env).expect("context is running");
        })
        .expect("environment is alive");

        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn invalidation_removes_registration() {
        let env = Environment::new();
        let deps = DependentSet::new();

        let ctx = env.new_context();
        ctx.run(|| deps.register(&env))
            .expect("environment is alive")
            .expect("context is running");
        assert_eq!(deps.len(), 1);

        ctx.invalidate();
        assert!(deps.is_empty());
    }

    #[test]
    fn invalidate_notifies_all_dependents_in_id_order() {
        let env = Environment::new();
        let deps = DependentSet::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Register in reverse creation order; notification must still be in
        // ascending id order.
        let a = env.new_context();
        let b = env.new_context();
        for ctx in [&b, &a] {
            ctx.run(|| deps.register(&env))
                .expect("environment is alive")
                .expect("context is running");
            let order = order.clone();
            let id = ctx.id();
            ctx.on_invalidate(move || order.lock().push(id));
        }

        deps.invalidate();
        assert_eq!(*order.lock(), vec![a.id(), b.id()]);
        assert!(deps.is_empty());
    }

    #[test]
    fn registering_an_invalidated_context_is_a_noop() {
        let env = Environment::new();
        let deps = DependentSet::new();

        let ctx = env.new_context();
        ctx.invalidate();

        // The self-removal callback fires immediately, leaving the set empty.
        ctx.run(|| deps.register(&env))
            .expect("environment is alive")
            .expect("context is running");
        assert!(deps.is_empty());
    }
}
