/// Configuration for a [`Runner`](crate::Runner).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Label attached to every log line the runner emits
    pub name: String,
    /// Maximum number of job bodies executing at the same time
    pub capacity: usize,
    /// Retry budget used by `add_job_default`
    pub default_max_attempts: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "jobpool".to_string(),
            capacity: 4,
            default_max_attempts: 1,
        }
    }
}

impl RunnerConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    /// Limiter size for a run over `job_count` jobs.
    ///
    /// Never larger than the number of jobs, and never zero while there is
    /// work to do, otherwise every task would wait forever on the limiter.
    pub fn effective_capacity(&self, job_count: usize) -> usize {
        if job_count == 0 {
            return 0;
        }
        self.capacity.clamp(1, job_count)
    }
}
