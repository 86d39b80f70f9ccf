//! Execution side of the runner.
//!
//! - **Admission**: [`ConcurrencyLimiter`] bounds how many job bodies run at
//!   once and gives up waiting when the runner is cancelled
//! - **Execution**: [`executor`] runs one job per task, retries it within its
//!   budget and turns panics into error outcomes
//!
//! # Task Flow
//!
//! 1. Task waits for a limiter slot (or observes cancellation)
//! 2. Job is marked running and attempted until success or budget exhausted
//! 3. Slot is released and the job is marked done
//! 4. Exactly one [`Outcome`] is published to the result stream

pub mod executor;
pub mod limiter;

pub use executor::Outcome;
pub use limiter::ConcurrencyLimiter;
