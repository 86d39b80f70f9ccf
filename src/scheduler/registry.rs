use std::sync::Arc;

use crate::scheduler::job::{Job, JobFn, JobId, JobSnapshot, JobStatus};

/// Append-only arena of registered jobs.
///
/// Written only before a run starts; tasks read it concurrently afterwards,
/// so no map or lock is needed for lookups.
pub struct JobRegistry<I, T> {
    jobs: Vec<Arc<Job<I, T>>>,
}

impl<I, T> Default for JobRegistry<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, T> JobRegistry<I, T> {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Append a new `Queued` job and return its id.
    pub fn register(&mut self, execute: JobFn<I, T>, input: I, max_attempts: u32) -> JobId {
        let id = JobId::new(self.jobs.len());
        self.jobs
            .push(Arc::new(Job::new(id, execute, input, max_attempts)));
        id
    }

    /// Look up a job. Ids issued by another registry never match.
    pub fn get(&self, id: &JobId) -> Option<&Arc<Job<I, T>>> {
        self.jobs
            .get(id.index())
            .filter(|job| job.id().uuid() == id.uuid())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Job<I, T>>> {
        self.jobs.iter()
    }

    /// Snapshots of every job in registration order
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.jobs.iter().map(|job| job.snapshot()).collect()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status() == status).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
