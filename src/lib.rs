pub mod config;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::RunnerConfig;
pub use error::{JobError, RunnerError};
pub use runner::{Cancellable, CancellableRunner, Plain, RunMode, Runner};
pub use scheduler::{JobId, JobSnapshot, JobStatus};
pub use worker::Outcome;

pub use tokio_util::sync::CancellationToken;
