//! Bounded-concurrency job runner.
//!
//! A [`Runner`] is single-use:
//!
//! 1. register jobs with `add_job`
//! 2. start them with [`Runner::run`]
//! 3. drain the outcomes once with [`Runner::consume_streaming`],
//!    [`Runner::consume_all`] or [`Runner::stream`]
//!
//! Every registered job produces exactly one [`Outcome`](crate::Outcome).
//! Failures, panics and cancellation are reported through that outcome and
//! never abort the runner.
//!
//! # Modes
//!
//! - [`Plain`]: job bodies take only their input. Created with
//!   [`Runner::new`].
//! - [`Cancellable`]: job bodies also receive a [`CancellationToken`] derived
//!   from a parent token, and [`Runner::cancel`] is available. Created with
//!   [`Runner::with_cancellation`].

mod consume;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RunnerConfig;
use crate::error::{JobError, Result, RunnerError};
use crate::scheduler::{JobFn, JobId, JobRegistry, JobSnapshot, JobStatus};
use crate::worker::executor::{run_job, Outcome};
use crate::worker::ConcurrencyLimiter;

mod sealed {
    pub trait Sealed {}
}

/// Marker for how job bodies are invoked.
pub trait RunMode: sealed::Sealed + Send + Sync + 'static {}

/// Job bodies take only their input. The runner cannot be cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

/// Job bodies receive the runner's cancellation token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cancellable;

impl sealed::Sealed for Plain {}
impl sealed::Sealed for Cancellable {}
impl RunMode for Plain {}
impl RunMode for Cancellable {}

pub type CancellableRunner<I, T> = Runner<I, T, Cancellable>;

/// Where the result receiver currently lives.
enum ResultSlot<T> {
    /// `run` has not been called yet.
    NotStarted,
    /// Waiting for its single consumer.
    Ready(mpsc::Receiver<Outcome<T>>),
    /// Handed out to a consumer.
    Consumed,
}

pub struct Runner<I, T, M: RunMode = Plain> {
    config: RunnerConfig,
    registry: JobRegistry<I, T>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    results: Mutex<ResultSlot<T>>,
    effective_capacity: usize,
    started: bool,
    _mode: PhantomData<M>,
}

impl<I, T> Runner<I, T, Plain>
where
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_config(RunnerConfig::new(capacity))
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self::build(config, CancellationToken::new())
    }

    /// Register a job. `max_attempts` of 0 is treated as 1.
    ///
    /// After [`run`](Self::run) this registers nothing and returns
    /// [`RunnerError::AlreadyStarted`].
    pub fn add_job<F, Fut>(&mut self, execute: F, input: I, max_attempts: u32) -> Result<JobId>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, JobError>> + Send + 'static,
    {
        let execute: JobFn<I, T> =
            Arc::new(move |input: I, _token: CancellationToken| execute(input).boxed());
        self.register(execute, input, max_attempts)
    }

    /// Register a job with the configured default retry budget.
    pub fn add_job_default<F, Fut>(&mut self, execute: F, input: I) -> Result<JobId>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, JobError>> + Send + 'static,
    {
        let max_attempts = self.config.default_max_attempts;
        self.add_job(execute, input, max_attempts)
    }
}

impl<I, T> Runner<I, T, Cancellable>
where
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Runner whose token is a child of `parent`: cancelling `parent`
    /// cancels the runner, not the other way around.
    pub fn with_cancellation(parent: &CancellationToken, capacity: usize) -> Self {
        Self::with_cancellation_config(parent, RunnerConfig::new(capacity))
    }

    pub fn with_cancellation_config(parent: &CancellationToken, config: RunnerConfig) -> Self {
        Self::build(config, parent.child_token())
    }

    /// Register a job whose body receives the runner's cancellation token.
    /// `max_attempts` of 0 is treated as 1.
    ///
    /// After [`run`](Self::run) this registers nothing and returns
    /// [`RunnerError::AlreadyStarted`].
    pub fn add_job<F, Fut>(&mut self, execute: F, input: I, max_attempts: u32) -> Result<JobId>
    where
        F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, JobError>> + Send + 'static,
    {
        let execute: JobFn<I, T> =
            Arc::new(move |input: I, token: CancellationToken| execute(input, token).boxed());
        self.register(execute, input, max_attempts)
    }

    pub fn add_job_default<F, Fut>(&mut self, execute: F, input: I) -> Result<JobId>
    where
        F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, JobError>> + Send + 'static,
    {
        let max_attempts = self.config.default_max_attempts;
        self.add_job(execute, input, max_attempts)
    }

    /// Cancel every queued job and stop further attempts of running ones.
    ///
    /// Attempts already in progress run to completion. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(runner = %self.config.name, "Runner cancelled");
        }
        self.cancel.cancel();
    }

    /// The token handed to job bodies.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl<I, T, M> Runner<I, T, M>
where
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
    M: RunMode,
{
    fn build(config: RunnerConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            registry: JobRegistry::new(),
            cancel,
            tracker: TaskTracker::new(),
            results: Mutex::new(ResultSlot::NotStarted),
            effective_capacity: 0,
            started: false,
            _mode: PhantomData,
        }
    }

    fn register(&mut self, execute: JobFn<I, T>, input: I, max_attempts: u32) -> Result<JobId> {
        if self.started {
            tracing::warn!(runner = %self.config.name, "Job registered after run, ignoring");
            return Err(RunnerError::AlreadyStarted);
        }
        let id = self.registry.register(execute, input, max_attempts);
        tracing::debug!(runner = %self.config.name, job_id = %id, "Job registered");
        Ok(id)
    }

    /// Start every registered job.
    ///
    /// Spawns one task per job plus a watcher that closes the result stream
    /// once all of them finished. Only the first call has any effect.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn run(&mut self) {
        if self.started {
            tracing::warn!(runner = %self.config.name, "Runner already started, ignoring run");
            return;
        }
        self.started = true;

        let job_count = self.registry.len();
        self.effective_capacity = self.config.effective_capacity(job_count);

        // Room for every outcome, so publishing never waits on the consumer.
        let (tx, rx) = mpsc::channel(job_count.max(1));
        *self.results.get_mut() = ResultSlot::Ready(rx);

        let limiter = ConcurrencyLimiter::new(self.effective_capacity);

        tracing::info!(
            runner = %self.config.name,
            jobs = job_count,
            capacity = self.effective_capacity,
            "Starting jobs"
        );

        for job in self.registry.iter() {
            self.tracker.spawn(run_job(
                Arc::clone(job),
                limiter.clone(),
                self.cancel.clone(),
                tx.clone(),
            ));
        }
        self.tracker.close();

        let tracker = self.tracker.clone();
        let name = self.config.name.clone();
        tokio::spawn(async move {
            tracker.wait().await;
            tracing::info!(runner = %name, "All jobs finished");
            // Last sender: dropping it closes the result stream.
            drop(tx);
        });
    }

    /// Wait until every job has published its outcome, without consuming
    /// anything. Returns immediately if `run` was never called.
    pub async fn join(&self) {
        if self.started {
            self.tracker.wait().await;
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn job_count(&self) -> usize {
        self.registry.len()
    }

    /// Limiter size chosen by `run`; 0 before that.
    pub fn effective_capacity(&self) -> usize {
        self.effective_capacity
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn job_status(&self, id: &JobId) -> Option<JobStatus> {
        self.registry.get(id).map(|job| job.status())
    }

    pub fn job_snapshot(&self, id: &JobId) -> Option<JobSnapshot> {
        self.registry.get(id).map(|job| job.snapshot())
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.registry.snapshots()
    }

    /// Number of jobs that have not finished yet.
    pub fn pending_jobs(&self) -> usize {
        self.registry.len() - self.registry.count_with_status(JobStatus::Done)
    }
}
