use serde::Serialize;
use thiserror::Error;

/// Error carried by a job's [`Outcome`](crate::Outcome).
///
/// Every failure of a single job ends up here. Nothing a job does can fail
/// the runner itself.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobError {
    /// Returned by the job body.
    #[error("job failed: {0}")]
    Failed(String),

    /// The job body panicked. A panic ends the job without further attempts.
    #[error("panic: {0}")]
    Panicked(String),

    /// The runner was cancelled before the job could start or between attempts.
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("runner already started, no further jobs can be registered")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_formats_message() {
        let err = JobError::failed(format_args!("attempt {} of {}", 2, 3));
        assert_eq!(err, JobError::Failed("attempt 2 of 3".to_string()));
        assert_eq!(err.to_string(), "job failed: attempt 2 of 3");
    }

    #[test]
    fn is_cancelled_matches_only_cancelled() {
        assert!(JobError::Cancelled.is_cancelled());
        assert!(!JobError::failed("boom").is_cancelled());
        assert!(!JobError::Panicked("boom".to_string()).is_cancelled());
        assert_eq!(JobError::Cancelled.to_string(), "job cancelled");
    }
}
