mod job;
mod state;

pub use job::{AuditRecord, Job, JobId, JobInput, JobMessage, RetryConfig};
pub use state::{
    JobFailure, JobState, PROGRESS_EXTRACTING, PROGRESS_SLICING, PROGRESS_STAGED, StateMachine,
    Transition,
};
