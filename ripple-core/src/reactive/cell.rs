//! Reactive Cells
//!
//! A `ReactiveCell` is the fundamental source value: a mutable slot that
//! tracks which computations read it.
//!
//! # How Cells Work
//!
//! 1. `get()` registers the currently running context with the cell's
//!    `DependentSet` and returns the value.
//!
//! 2. `set()` replaces the value and invalidates every registered context,
//!    which marks derived values stale and schedules observers for the next
//!    flush.
//!
//! # Identity Comparison
//!
//! `set()` compares the old and new value by identity (`Arc::ptr_eq`), not by
//! structural equality: writing the same allocation back is a no-op that
//! invalidates nothing. This keeps the cell free of any `Eq`/`PartialEq`
//! bound on the payload. Callers must not assume every `set` call causes
//! downstream recomputation.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::Result;

use super::dependents::DependentSet;
use super::environment::Environment;

/// A mutable reactive value.
///
/// `ReactiveCell` is a cheap handle; clones share the same underlying slot.
pub struct ReactiveCell<T> {
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    env: Environment,
    value: Mutex<Arc<T>>,
    dependents: DependentSet,
}

impl<T: Send + Sync + 'static> ReactiveCell<T> {
    /// Create a cell owned by `env` with the given initial value.
    pub fn new(env: &Environment, value: T) -> Self {
        Self::with_shared(env, Arc::new(value))
    }

    /// Create a cell from an already-shared value.
    pub fn with_shared(env: &Environment, value: Arc<T>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                env: env.clone(),
                value: Mutex::new(value),
                dependents: DependentSet::new(),
            }),
        }
    }

    /// Read the value, registering the current context as a dependent.
    ///
    /// # Errors
    ///
    /// [`Error::NoCurrentContext`](crate::Error::NoCurrentContext) when
    /// called outside any running context. Use
    /// [`Environment::isolate`] for one-off snapshot reads.
    pub fn get(&self) -> Result<Arc<T>> {
        self.inner.dependents.register(&self.inner.env)?;
        Ok(self.inner.value.lock().clone())
    }

    /// Replace the value and invalidate dependents.
    ///
    /// If `value` is the same allocation as the stored value (identity
    /// comparison), nothing happens and `false` is returned. Otherwise the
    /// value is replaced, every dependent context is invalidated, and `true`
    /// is returned.
    pub fn set(&self, value: Arc<T>) -> bool {
        {
            let mut current = self.inner.value.lock();
            if Arc::ptr_eq(&*current, &value) {
                return false;
            }
            *current = value;
        }

        self.inner.dependents.invalidate();
        true
    }

    /// Replace the value with a freshly allocated one.
    ///
    /// Always invalidates dependents (a new allocation is never identical to
    /// the stored one).
    pub fn set_value(&self, value: T) -> bool {
        self.set(Arc::new(value))
    }

    /// Number of contexts currently depending on this cell.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.len()
    }
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("value", &*self.inner.value.lock())
            .field("dependent_count", &self.inner.dependents.len())
            .finish()
    }
}

/// A keyed collection of reactive cells, modeled on the input-value map of a
/// reactive UI session.
///
/// Reading a key that has not been set yet auto-populates it with an unset
/// cell and returns `None`; the read still registers a dependency, so the
/// reader re-runs once the value arrives. This is what lets a computation
/// depend on an input the client has not sent yet.
pub struct ReactiveValues<T> {
    inner: Arc<ValuesInner<T>>,
}

struct ValuesInner<T> {
    env: Environment,
    map: Mutex<IndexMap<String, ReactiveCell<Option<Arc<T>>>>>,
}

impl<T: Send + Sync + 'static> ReactiveValues<T> {
    /// Create an empty collection owned by `env`.
    pub fn new(env: &Environment) -> Self {
        Self {
            inner: Arc::new(ValuesInner {
                env: env.clone(),
                map: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Read the value under `key`, registering a dependency on it.
    ///
    /// Returns `None` if the key has never been set. A missing key is
    /// auto-populated with an unset cell so the dependency is still recorded.
    pub fn get(&self, key: &str) -> Result<Option<Arc<T>>> {
        let cell = self.cell(key);
        let value = cell.get()?;
        Ok((*value).clone())
    }

    /// Set the value under `key`, creating the cell if needed.
    ///
    /// Returns `true` if dependents were invalidated (always, for an existing
    /// key; a newly created key has no dependents yet).
    pub fn set(&self, key: &str, value: T) -> bool {
        let cell = self.cell(key);
        cell.set_value(Some(Arc::new(value)))
    }

    /// Remove the cell under `key`, invalidating its dependents.
    ///
    /// Returns `false` if the key did not exist.
    pub fn remove(&self, key: &str) -> bool {
        let cell = { self.inner.map.lock().shift_remove(key) };
        match cell {
            Some(cell) => {
                // Dependents of the removed key observe it as unset before
                // the cell itself is dropped.
                cell.set_value(None);
                true
            }
            None => false,
        }
    }

    /// Number of keys currently present (set or auto-populated).
    pub fn len(&self) -> usize {
        self.inner.map.lock().len()
    }

    /// True if no key is present.
    pub fn is_empty(&self) -> bool {
        self.inner.map.lock().is_empty()
    }

    fn cell(&self, key: &str) -> ReactiveCell<Option<Arc<T>>> {
        let mut map = self.inner.map.lock();
        match map.get(key) {
            Some(cell) => cell.clone(),
            None => {
                let cell = ReactiveCell::new(&self.inner.env, None);
                map.insert(key.to_string(), cell.clone());
                cell
            }
        }
    }
}

impl<T> Clone for ReactiveValues<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ReactiveValues<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveValues")
            .field("keys", &self.inner.map.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
