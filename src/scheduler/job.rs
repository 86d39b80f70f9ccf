use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::JobError;

/// Type-erased job body. Every registration shape is normalised to this.
pub type JobFn<I, T> =
    Arc<dyn Fn(I, CancellationToken) -> BoxFuture<'static, Result<T, JobError>> + Send + Sync>;

/// Identifier handed out by `add_job`.
///
/// `index` is the job's slot in the registry, `uuid` makes the id unique
/// across every runner in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId {
    index: usize,
    uuid: Uuid,
}

impl JobId {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            uuid: Uuid::new_v4(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

/// Lifecycle of a job. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
        }
    }
}

/// Point-in-time copy of a job's run-time state.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<JobError>,
    pub registered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    attempts: u32,
    last_error: Option<JobError>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    fn advance(&mut self, next: JobStatus) -> bool {
        if next <= self.status {
            return false;
        }
        self.status = next;
        true
    }
}

/// One registered unit of work.
///
/// The description (`execute`, `input`, `max_attempts`) is fixed at
/// registration. Status, attempt count and last error are updated by the
/// task running the job.
pub struct Job<I, T> {
    id: JobId,
    execute: JobFn<I, T>,
    input: I,
    max_attempts: u32,
    registered_at: DateTime<Utc>,
    state: Mutex<JobState>,
}

impl<I, T> Job<I, T> {
    pub fn new(id: JobId, execute: JobFn<I, T>, input: I, max_attempts: u32) -> Self {
        Self {
            id,
            execute,
            input,
            max_attempts: max_attempts.max(1),
            registered_at: Utc::now(),
            state: Mutex::new(JobState {
                status: JobStatus::Queued,
                attempts: 0,
                last_error: None,
                started_at: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn input(&self) -> &I {
        &self.input
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        JobSnapshot {
            id: self.id,
            status: state.status,
            attempts: state.attempts,
            max_attempts: self.max_attempts,
            last_error: state.last_error.clone(),
            registered_at: self.registered_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.state();
        if state.advance(JobStatus::Running) {
            state.started_at = Some(Utc::now());
        }
    }

    /// Count a new attempt and return its 1-based number.
    pub(crate) fn begin_attempt(&self) -> u32 {
        let mut state = self.state();
        state.attempts += 1;
        state.attempts
    }

    pub(crate) fn record_attempt(&self, result: &Result<T, JobError>) {
        self.state().last_error = result.as_ref().err().cloned();
    }

    /// Final transition. The terminal error, if any, replaces the last
    /// attempt's error.
    pub(crate) fn mark_done(&self, error: Option<&JobError>) {
        let mut state = self.state();
        if error.is_some() {
            state.last_error = error.cloned();
        }
        if state.advance(JobStatus::Done) {
            state.finished_at = Some(Utc::now());
        }
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<I: Clone, T> Job<I, T> {
    /// Start one attempt with a fresh copy of the input.
    pub(crate) fn invoke(&self, token: CancellationToken) -> BoxFuture<'static, Result<T, JobError>> {
        (self.execute)(self.input.clone(), token)
    }
}

impl<I, T> std::fmt::Debug for Job<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("status", &state.status)
            .field("attempts", &state.attempts)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    fn echo_job(max_attempts: u32) -> Job<u32, u32> {
        let execute: JobFn<u32, u32> = Arc::new(|n: u32, _token: CancellationToken| {
            async move { Ok::<_, JobError>(n) }.boxed()
        });
        Job::new(JobId::new(0), execute, 7, max_attempts)
    }

    #[test]
    fn new_job_is_queued() {
        let job = echo_job(3);
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.attempts(), 0);
        assert_eq!(job.max_attempts(), 3);
        assert_eq!(*job.input(), 7);

        let snap = job.snapshot();
        assert!(snap.started_at.is_none());
        assert!(snap.finished_at.is_none());
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn zero_max_attempts_is_coerced_to_one() {
        assert_eq!(echo_job(0).max_attempts(), 1);
    }

    #[test]
    fn status_only_moves_forward() {
        let job = echo_job(1);
        job.mark_running();
        assert_eq!(job.status(), JobStatus::Running);

        job.mark_done(None);
        assert_eq!(job.status(), JobStatus::Done);

        job.mark_running();
        assert_eq!(job.status(), JobStatus::Done);
        assert!(job.snapshot().finished_at.is_some());
    }

    #[test]
    fn queued_job_can_finish_without_running() {
        let job = echo_job(1);
        job.mark_done(Some(&JobError::Cancelled));

        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Done);
        assert!(snap.started_at.is_none());
        assert_eq!(snap.last_error, Some(JobError::Cancelled));
    }

    #[test]
    fn attempts_are_counted_against_budget() {
        let job = echo_job(2);
        assert_eq!(job.begin_attempt(), 1);
        job.record_attempt(&Err(JobError::failed("first")));
        assert_eq!(job.snapshot().last_error, Some(JobError::failed("first")));

        assert_eq!(job.begin_attempt(), 2);
        job.record_attempt(&Ok(1));
        assert!(job.snapshot().last_error.is_none());
        assert_eq!(job.attempts(), job.max_attempts());
    }

    #[tokio::test]
    async fn invoke_passes_input() {
        let job = echo_job(1);
        let result = job.invoke(CancellationToken::new()).await;
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn job_id_displays_uuid() {
        let id = JobId::new(4);
        assert_eq!(id.index(), 4);
        assert_eq!(id.to_string(), id.uuid().to_string());
        assert_ne!(JobId::new(4), id);
    }

    #[test]
    fn snapshot_serializes_for_reports() {
        let job = echo_job(2);
        job.mark_running();
        job.begin_attempt();
        job.mark_done(Some(&JobError::failed("boom")));

        let value = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(value["status"], "done");
        assert_eq!(value["attempts"], 1);
        assert_eq!(value["id"]["index"], 0);
        assert_eq!(value["id"]["uuid"], job.id().uuid().to_string());
        assert_eq!(value["last_error"]["Failed"], "boom");
        assert!(value["finished_at"].is_string());
    }

    #[test]
    fn job_status_display() {
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(JobStatus::Done.to_string(), "done");
    }
}
