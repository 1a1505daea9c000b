//! Concurrency primitives shared by the fingerprint engine and the upload
//! controller.
//!
//! - [`run_bounded`] runs a list of async tasks with at most `k` in flight,
//!   keeping results in input order and stopping at the first failure.
//! - [`PauseGate`] is a reusable pause point: producers arm it, workers wait
//!   on it, and `release` wakes every waiter and then runs deferred callbacks.

mod gate;
mod scheduler;

pub use gate::{DeferredCallback, PauseGate, WaitPoint};
pub use scheduler::{DEFAULT_CONCURRENCY, ScheduleError, run_bounded, run_bounded_with_cancel};
