//! # yieldgate
//!
//! Cooperative user-space task scheduler with pluggable admission policies.
//!
//! Application code spawns managed tasks through a [`Scheduler`] and inserts
//! explicit cooperation points ([`yield_now`], [`wait`]) inside compute- or
//! I/O-bound loops. The scheduler decides which tasks may run at any moment,
//! bounded by a configured concurrency cap, and in what order suspended tasks
//! resume. That makes it a playground for comparing admission policies
//! (first-come-first-served vs. a fairness heuristic biased toward I/O-bound
//! tasks) under mixed workloads.
//!
//! ## Modules
//!
//! - [`core`] - scheduler loop, task protocol, wait queue, policies
//! - [`context`] - request-scoped value bag carrying the task handle
//! - [`config`] - scheduler tuning knobs
//! - [`util`] - clock and telemetry helpers
//!
//! ## Example
//!
//! ```
//! use yieldgate::{fairness, wait, yield_now, Context, Scheduler};
//!
//! let sched = Scheduler::new(2, fairness);
//! let ctx = Context::new();
//!
//! let compute = sched.spawn(&ctx, |ctx| {
//!     for _ in 0..100 {
//!         yield_now(&ctx).unwrap();
//!         // a slice of the computation goes here
//!     }
//! });
//!
//! let io = sched.spawn(&ctx, |ctx| {
//!     let value = wait(&ctx, || {
//!         // blocking I/O goes here
//!         42
//!     })
//!     .unwrap();
//!     assert_eq!(value, 42);
//! });
//!
//! compute.join().unwrap();
//! io.join().unwrap();
//! sched.close().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod core;
pub mod util;

// Re-export main types for convenience
pub use crate::config::SchedulerConfig;
pub use crate::context::Context;
pub use crate::core::{
    fairness, fifo, wait, yield_now, Scheduler, SchedulerError, SchedulerStats, TaskSnapshot,
};
