use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::scheduler::{Job, JobId};
use crate::worker::limiter::ConcurrencyLimiter;

/// Terminal result of one job, published exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub job_id: JobId,
    /// Attempts actually started. Zero if the job never got a limiter slot.
    pub attempts: u32,
    pub result: Result<T, JobError>,
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.result.as_ref().err()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn into_result(self) -> Result<T, JobError> {
        self.result
    }
}

/// Task body for one job.
///
/// Waits for a limiter slot, runs the retry loop behind a panic boundary and
/// publishes exactly one [`Outcome`], whatever happens inside the job.
pub(crate) async fn run_job<I, T>(
    job: Arc<Job<I, T>>,
    limiter: ConcurrencyLimiter,
    cancel: CancellationToken,
    results: mpsc::Sender<Outcome<T>>,
) where
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    let job_id = job.id();

    let result = match limiter.acquire(&cancel).await {
        Some(permit) => {
            job.mark_running();
            tracing::debug!(job_id = %job_id, in_use = limiter.in_use(), "Job started");

            let result = AssertUnwindSafe(execute_with_retries(&job, &cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let message = panic_message(&payload);
                    tracing::warn!(job_id = %job_id, panic = %message, "Job panicked");
                    Err(JobError::Panicked(message))
                });

            drop(permit);
            result
        }
        None => {
            tracing::debug!(job_id = %job_id, "Job cancelled before admission");
            Err(JobError::Cancelled)
        }
    };

    job.mark_done(result.as_ref().err());
    let outcome = Outcome {
        job_id,
        attempts: job.attempts(),
        result,
    };

    tracing::debug!(
        job_id = %job_id,
        attempts = outcome.attempts,
        ok = outcome.is_ok(),
        "Job finished"
    );

    if results.send(outcome).await.is_err() {
        tracing::debug!(job_id = %job_id, "Result stream closed, outcome dropped");
    }
}

/// Sequential attempts until success, an exhausted budget, or cancellation
/// observed between attempts. Every error the body returns counts as a
/// failed attempt, whatever its variant.
async fn execute_with_retries<I, T>(
    job: &Job<I, T>,
    cancel: &CancellationToken,
) -> Result<T, JobError>
where
    I: Clone,
{
    loop {
        if cancel.is_cancelled() {
            tracing::debug!(job_id = %job.id(), "Cancelled, no further attempts");
            return Err(JobError::Cancelled);
        }

        let attempt = job.begin_attempt();
        let result = job.invoke(cancel.clone()).await;
        job.record_attempt(&result);

        match result {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= job.max_attempts() => {
                tracing::debug!(job_id = %job.id(), attempt, error = %e, "Job gave up");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id(),
                    attempt,
                    max_attempts = job.max_attempts(),
                    error = %e,
                    "Attempt failed, retrying"
                );
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobFn, JobStatus};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn explode() -> Result<u32, JobError> {
        panic!("disk on fire")
    }

    fn job_failing_times(failures: u32, max_attempts: u32) -> (Arc<Job<(), u32>>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let execute: JobFn<(), u32> = Arc::new(move |_: (), _: CancellationToken| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= failures {
                    Err(JobError::failed(format!("attempt {n}")))
                } else {
                    Ok(n)
                }
            }
            .boxed()
        });
        let job = Arc::new(Job::new(JobId::new(0), execute, (), max_attempts));
        (job, calls)
    }

    async fn run_single(job: Arc<Job<(), u32>>, cancel: CancellationToken) -> Outcome<u32> {
        let (tx, mut rx) = mpsc::channel(1);
        run_job(job, ConcurrencyLimiter::new(1), cancel, tx).await;
        rx.recv().await.expect("one outcome")
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (job, calls) = job_failing_times(2, 3);
        let outcome = run_single(Arc::clone(&job), CancellationToken::new()).await;

        assert_eq!(outcome.result, Ok(3));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(job.status(), JobStatus::Done);
        assert!(job.snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn publishes_last_error_when_budget_exhausted() {
        let (job, calls) = job_failing_times(u32::MAX, 2);
        let outcome = run_single(Arc::clone(&job), CancellationToken::new()).await;

        assert_eq!(outcome.error(), Some(&JobError::failed("attempt 2")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(job.snapshot().last_error, Some(JobError::failed("attempt 2")));
    }

    #[tokio::test]
    async fn panic_is_contained_and_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let execute: JobFn<(), u32> = Arc::new(move |_: (), _: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            explode().boxed()
        });
        let job = Arc::new(Job::new(JobId::new(0), execute, (), 5));

        let outcome = run_single(Arc::clone(&job), CancellationToken::new()).await;

        assert_eq!(
            outcome.error(),
            Some(&JobError::Panicked("disk on fire".to_string()))
        );
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(job.status(), JobStatus::Done);
    }

    #[tokio::test]
    async fn cancelled_token_skips_execution() {
        let (job, calls) = job_failing_times(0, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = run_single(Arc::clone(&job), cancel).await;

        assert_eq!(outcome.error(), Some(&JobError::Cancelled));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(job.status(), JobStatus::Done);
        assert!(job.snapshot().started_at.is_none());
    }

    #[tokio::test]
    async fn error_variant_returned_by_body_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let execute: JobFn<(), u32> = Arc::new(move |_: (), _: CancellationToken| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                match n {
                    1 => Err(JobError::Cancelled),
                    2 => Err(JobError::Panicked("reported, not raised".to_string())),
                    _ => Ok(n),
                }
            }
            .boxed()
        });
        let job = Arc::new(Job::new(JobId::new(0), execute, (), 4));

        let outcome = run_single(Arc::clone(&job), CancellationToken::new()).await;

        assert_eq!(outcome.result, Ok(3));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returned_cancelled_exhausts_budget_under_live_token() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let execute: JobFn<(), u32> = Arc::new(move |_: (), _: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(JobError::Cancelled) }.boxed()
        });
        let job = Arc::new(Job::new(JobId::new(0), execute, (), 2));

        let outcome = run_single(job, CancellationToken::new()).await;

        assert_eq!(outcome.error(), Some(&JobError::Cancelled));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panic_message_from_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&payload), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&payload), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&payload), "unknown panic payload");
    }
}
