pub mod job;
pub mod registry;

pub use job::{Job, JobFn, JobId, JobSnapshot, JobStatus};
pub use registry::JobRegistry;
