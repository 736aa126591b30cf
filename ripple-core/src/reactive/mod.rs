//! Reactive Engine
//!
//! Dependency tracking and invalidation for push-pull reactive graphs.
//!
//! # Architecture
//!
//! The engine is built from five pieces:
//!
//! - [`Environment`]: per-graph scheduler. Owns the current-context stack and
//!   the pending-flush queue. One environment per logical scope (e.g. per
//!   user session); there is no global state.
//! - [`Context`]: one execution of a reactive computation. Reads performed
//!   while a context is current register it as a dependent; invalidating the
//!   context severs those edges and notifies its owner.
//! - [`ReactiveCell`] / [`ReactiveValues`]: source values. Writes invalidate
//!   dependents; identical writes (same allocation) are no-ops.
//! - [`Derived`]: lazy cached computation. Invalidation marks it stale and
//!   propagates; recomputation waits for the next read.
//! - [`Observer`]: eager side effect. Invalidation schedules a re-run on the
//!   next [`Environment::flush`], ordered by priority.
//!
//! Dependency edges are one-shot: each run of a derived value or observer
//! gets a fresh context and must re-read its inputs to stay subscribed. A
//! conditional branch not taken this run is not a dependency this run.
//!
//! # Example
//!
//! ```
//! use ripple_core::{Derived, Environment, Observer, ReactiveCell};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let env = Environment::new();
//! let celsius = ReactiveCell::new(&env, 20.0_f64);
//!
//! let c = celsius.clone();
//! let fahrenheit = Derived::new(&env, move || Ok(*c.get()? * 9.0 / 5.0 + 32.0));
//!
//! let f = fahrenheit.clone();
//! let _printer = Observer::new_async(&env, move || {
//!     let f = f.clone();
//!     async move {
//!         println!("{}°F", f.get_value().await?);
//!         Ok(())
//!     }
//! });
//!
//! env.flush().await; // prints 68°F
//! celsius.set_value(25.0);
//! env.flush().await; // prints 77°F
//! # }
//! ```

mod cell;
mod context;
mod dependents;
mod derived;
mod environment;
mod observer;

pub use cell::{ReactiveCell, ReactiveValues};
pub use context::Context;
pub use dependents::DependentSet;
pub use derived::Derived;
pub use environment::Environment;
pub use observer::Observer;
