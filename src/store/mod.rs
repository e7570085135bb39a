//! # Job Store
//!
//! Keyed storage for batch jobs and their tasks. The store is the single
//! source of truth: the queue only carries `(job_id, task_id)` references and
//! workers re-read the task from here on every delivery.
//!
//! Every mutation that several workers can race on is either an atomic
//! increment or a conditional transition. Implementations must keep
//! `completed_count + failed_count <= task_count`, with equality exactly when
//! the job is terminal.

use crate::{
    error::BackendError,
    schemas::{Message, Usage},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryJobStore;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("task {task_id} not found in job {job_id}")]
    TaskNotFound { job_id: String, task_id: String },
    #[error("job already exists: {0}")]
    DuplicateJob(String),
    #[error("duplicate task id within job: {0}")]
    DuplicateTask(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::PartiallyCompleted)
    }

    /// Terminal status for a job whose tasks have all finished.
    pub fn terminal_for(completed: u32, failed: u32) -> Self {
        if failed == 0 {
            JobStatus::Completed
        } else if completed > 0 {
            JobStatus::PartiallyCompleted
        } else {
            JobStatus::Failed
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::PartiallyCompleted => "partially_completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Why a task ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    ModelNotFound,
    InvalidRequest,
    Timeout,
    RateLimited,
    BackendUnavailable,
    Unknown,
    Cancelled,
    QueueUnavailable,
}

impl From<&BackendError> for TaskErrorKind {
    fn from(err: &BackendError) -> Self {
        match err {
            BackendError::Timeout(_) => TaskErrorKind::Timeout,
            BackendError::RateLimited { .. } => TaskErrorKind::RateLimited,
            BackendError::InvalidRequest(_) => TaskErrorKind::InvalidRequest,
            BackendError::BackendUnavailable(_) => TaskErrorKind::BackendUnavailable,
            BackendError::Unknown(_) => TaskErrorKind::Unknown,
        }
    }
}

/// Generation parameters fixed for every task of a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Point-in-time view of a job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub model: String,
    pub status: JobStatus,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub task_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub error: Option<String>,
    pub params: GenerationParams,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub cancel_requested: bool,
}

/// Point-in-time view of a task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub job_id: String,
    pub task_id: String,
    /// Position in the submitted task list
    pub index: u32,
    pub messages: Vec<Message>,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<TaskErrorKind>,
    pub usage: Option<Usage>,
    pub attempt_count: u32,
}

/// Lightweight queue reference to a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub job_id: String,
    pub task_id: String,
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_id, self.task_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: String,
    pub messages: Vec<Message>,
}

/// Everything needed to create a job and its tasks in one unit.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub model: String,
    pub params: GenerationParams,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub tasks: Vec<NewTask>,
}

/// Final result of one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded { output: String, usage: Usage },
    Failed { kind: TaskErrorKind, error: String },
}

impl TaskOutcome {
    pub fn failed(kind: TaskErrorKind, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = format!("task failed ({:?})", kind);
        }
        TaskOutcome::Failed { kind, error }
    }
}

/// What `finish_task` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The task was already terminal; nothing changed.
    AlreadyTerminal,
    /// The outcome was recorded. `finalized` is set for the single call that
    /// moved the job to its terminal status.
    Recorded { job_status: JobStatus, finalized: bool },
}

/// What `begin_attempt` did.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptStart {
    /// The attempt counter was bumped; the task is `running`.
    Started(Task),
    /// The task has used its whole attempt budget; nothing changed.
    Exhausted(Task),
    /// The task is already terminal; nothing changed.
    AlreadyTerminal,
}

/// # Job Store
///
/// Injected into the batch manager and the worker pool as
/// `Arc<dyn JobStore>`.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Create the job (status `queued`) and all of its tasks (`pending`)
    /// atomically.
    async fn create_job(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Job, StoreError>;

    async fn get_task(&self, job_id: &str, task_id: &str) -> Result<Task, StoreError>;

    /// All tasks of a job in submission order.
    async fn list_tasks(&self, job_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Compare-and-set `queued -> running`. Returns whether this call won.
    async fn mark_job_running(&self, job_id: &str) -> Result<bool, StoreError>;

    /// Mark the task `running` and bump its attempt counter, unless it is
    /// terminal or already at `max_attempts`.
    async fn begin_attempt(
        &self,
        job_id: &str,
        task_id: &str,
        max_attempts: u32,
    ) -> Result<AttemptStart, StoreError>;

    /// Remember a retryable failure on a non-terminal task so a later
    /// delivery can report it once the budget runs out.
    async fn record_attempt_error(
        &self,
        job_id: &str,
        task_id: &str,
        kind: TaskErrorKind,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Record a task's final outcome unless it is already terminal, bump the
    /// matching job counter, and finalize the job if this was its last task.
    async fn finish_task(
        &self,
        job_id: &str,
        task_id: &str,
        outcome: TaskOutcome,
    ) -> Result<FinishOutcome, StoreError>;

    /// Flag a job for cancellation. No-op on terminal jobs.
    async fn request_cancel(&self, job_id: &str) -> Result<Job, StoreError>;

    /// Record a job-level infrastructure failure: sets `error` and fails
    /// every task that has not finished yet.
    async fn fail_job(&self, job_id: &str, error: &str) -> Result<Job, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_rules() {
        assert_eq!(JobStatus::terminal_for(3, 0), JobStatus::Completed);
        assert_eq!(JobStatus::terminal_for(2, 1), JobStatus::PartiallyCompleted);
        assert_eq!(JobStatus::terminal_for(0, 3), JobStatus::Failed);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(JobStatus::PartiallyCompleted).unwrap(),
            "partially_completed"
        );
        assert_eq!(serde_json::to_value(TaskStatus::Succeeded).unwrap(), "succeeded");
        assert_eq!(JobStatus::PartiallyCompleted.to_string(), "partially_completed");
    }

    #[test]
    fn test_failed_outcome_never_empty() {
        match TaskOutcome::failed(TaskErrorKind::Unknown, "  ") {
            TaskOutcome::Failed { error, .. } => assert!(!error.trim().is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
