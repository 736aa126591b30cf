//! # Ripple Core
//!
//! Core dependency-tracking and invalidation engine for the Ripple reactive
//! framework.
//!
//! Ripple lets you declare values and computations, then keeps them
//! consistent automatically: write a [`ReactiveCell`], and every [`Derived`]
//! value computed from it goes stale while every [`Observer`] that read it is
//! scheduled to re-run on the next [`Environment::flush`].
//!
//! ## Design
//!
//! - **Push invalidation, pull recomputation.** Writes push staleness through
//!   the graph immediately; actual recomputation is pulled lazily by reads
//!   (derived values) or driven by an explicit flush (observers).
//! - **One-shot dependency edges.** Dependencies are discovered dynamically
//!   by running the computation, and each run re-discovers them from scratch.
//!   No static dependency declarations, and no stale edges from branches that
//!   did not execute.
//! - **Scoped, not global.** All scheduler state lives in an [`Environment`]
//!   value. Independent graphs (one per session, one per test) never share
//!   anything.
//! - **Async-native.** Computation bodies may be `async`; a context stays
//!   current across `.await` points, and the flush loop is itself async.
//!
//! ## Module Organization
//!
//! - [`reactive`]: the engine itself (environment, contexts, cells, derived
//!   values, observers)
//! - [`queue`]: priority queue with FIFO ordering among equal priorities,
//!   used by the flush scheduler
//! - [`error`]: error types shared across the crate

pub mod error;
pub mod queue;
pub mod reactive;

pub use error::{BoxError, Error, Result};
pub use reactive::{
    Context, DependentSet, Derived, Environment, Observer, ReactiveCell, ReactiveValues,
};
