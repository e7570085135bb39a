//! In-process job store.
//!
//! Jobs live in a `DashMap` keyed by job id. Per job, the two counters are
//! packed into one `AtomicU64` (completed in the high half, failed in the low
//! half) so a single `fetch_add` yields an exact snapshot of both, and the
//! one finisher that observes `completed + failed == task_count` performs the
//! terminal transition. Each task sits behind its own mutex, which makes
//! "finish unless already terminal" a check-and-set without a job-wide lock.

use super::{
    AttemptStart, FinishOutcome, GenerationParams, Job, JobStatus, JobStore, NewJob, StoreError, Task,
    TaskErrorKind, TaskOutcome, TaskStatus,
};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering},
    Arc, OnceLock,
};
use tokio::sync::Mutex;
use tracing::debug;

const COMPLETED_ONE: u64 = 1 << 32;
const FAILED_ONE: u64 = 1;

fn unpack(counters: u64) -> (u32, u32) {
    ((counters >> 32) as u32, counters as u32)
}

fn status_to_u8(status: JobStatus) -> u8 {
    match status {
        JobStatus::Queued => 0,
        JobStatus::Running => 1,
        JobStatus::Completed => 2,
        JobStatus::Failed => 3,
        JobStatus::PartiallyCompleted => 4,
    }
}

fn status_from_u8(raw: u8) -> JobStatus {
    match raw {
        0 => JobStatus::Queued,
        1 => JobStatus::Running,
        2 => JobStatus::Completed,
        3 => JobStatus::Failed,
        _ => JobStatus::PartiallyCompleted,
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// 0 means "not set".
fn optional_timestamp(raw: &AtomicI64) -> Option<i64> {
    match raw.load(Ordering::Acquire) {
        0 => None,
        ts => Some(ts),
    }
}

struct JobEntry {
    job_id: String,
    model: String,
    submitted_at: i64,
    task_count: u32,
    params: GenerationParams,
    metadata: Option<HashMap<String, serde_json::Value>>,
    status: AtomicU8,
    counters: AtomicU64,
    started_at: AtomicI64,
    completed_at: AtomicI64,
    cancel_requested: AtomicBool,
    error: OnceLock<String>,
    tasks: Vec<Mutex<Task>>,
    task_index: HashMap<String, usize>,
}

impl JobEntry {
    fn status(&self) -> JobStatus {
        status_from_u8(self.status.load(Ordering::Acquire))
    }

    fn snapshot(&self) -> Job {
        // Status first: a terminal status is published after the final
        // counter bump, so the counters read below are complete.
        let status = self.status();
        let (completed_count, failed_count) = unpack(self.counters.load(Ordering::Acquire));
        Job {
            job_id: self.job_id.clone(),
            model: self.model.clone(),
            status,
            submitted_at: self.submitted_at,
            started_at: optional_timestamp(&self.started_at),
            completed_at: optional_timestamp(&self.completed_at),
            task_count: self.task_count,
            completed_count,
            failed_count,
            error: self.error.get().cloned(),
            params: self.params,
            metadata: self.metadata.clone(),
            cancel_requested: self.cancel_requested.load(Ordering::Acquire),
        }
    }

    fn task_slot(&self, task_id: &str) -> Result<&Mutex<Task>, StoreError> {
        self.task_index
            .get(task_id)
            .map(|&idx| &self.tasks[idx])
            .ok_or_else(|| StoreError::TaskNotFound {
                job_id: self.job_id.clone(),
                task_id: task_id.to_string(),
            })
    }

    fn mark_running(&self) -> bool {
        let won = self
            .status
            .compare_exchange(
                status_to_u8(JobStatus::Queued),
                status_to_u8(JobStatus::Running),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            let _ = self
                .started_at
                .compare_exchange(0, now(), Ordering::AcqRel, Ordering::Acquire);
        }
        won
    }

    /// Move to the terminal status. Only succeeds from a non-terminal state.
    fn finalize(&self, terminal: JobStatus) -> bool {
        let target = status_to_u8(terminal);
        let moved = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!status_from_u8(current).is_terminal()).then_some(target)
            })
            .is_ok();
        if moved {
            self.completed_at.store(now(), Ordering::Release);
        }
        moved
    }

    async fn finish(&self, task_id: &str, outcome: TaskOutcome) -> Result<FinishOutcome, StoreError> {
        let mut task = self.task_slot(task_id)?.lock().await;
        if task.status.is_terminal() {
            return Ok(FinishOutcome::AlreadyTerminal);
        }

        let delta = match outcome {
            TaskOutcome::Succeeded { output, usage } => {
                task.status = TaskStatus::Succeeded;
                task.output = Some(output);
                task.usage = Some(usage);
                task.error = None;
                task.error_kind = None;
                COMPLETED_ONE
            }
            TaskOutcome::Failed { kind, error } => {
                task.status = TaskStatus::Failed;
                task.error = Some(error);
                task.error_kind = Some(kind);
                FAILED_ONE
            }
        };

        let (completed, failed) = unpack(self.counters.fetch_add(delta, Ordering::AcqRel) + delta);
        drop(task);

        if completed + failed < self.task_count {
            return Ok(FinishOutcome::Recorded {
                job_status: self.status(),
                finalized: false,
            });
        }

        let terminal = JobStatus::terminal_for(completed, failed);
        let finalized = self.finalize(terminal);
        Ok(FinishOutcome::Recorded {
            job_status: self.status(),
            finalized,
        })
    }
}

/// # In-Memory Job Store
#[derive(Default, Clone)]
pub struct InMemoryJobStore {
    jobs: Arc<DashMap<String, Arc<JobEntry>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Clone the entry out so no map guard is held across an await.
    fn entry(&self, job_id: &str) -> Result<Arc<JobEntry>, StoreError> {
        self.jobs
            .get(job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: NewJob) -> Result<Job, StoreError> {
        let mut task_index = HashMap::with_capacity(job.tasks.len());
        let mut tasks = Vec::with_capacity(job.tasks.len());
        for (index, new_task) in job.tasks.into_iter().enumerate() {
            if task_index.insert(new_task.task_id.clone(), index).is_some() {
                return Err(StoreError::DuplicateTask(new_task.task_id));
            }
            tasks.push(Mutex::new(Task {
                job_id: job.job_id.clone(),
                task_id: new_task.task_id,
                index: index as u32,
                messages: new_task.messages,
                status: TaskStatus::Pending,
                output: None,
                error: None,
                error_kind: None,
                usage: None,
                attempt_count: 0,
            }));
        }

        let entry = Arc::new(JobEntry {
            job_id: job.job_id.clone(),
            model: job.model,
            submitted_at: now(),
            task_count: tasks.len() as u32,
            params: job.params,
            metadata: job.metadata,
            status: AtomicU8::new(status_to_u8(JobStatus::Queued)),
            counters: AtomicU64::new(0),
            started_at: AtomicI64::new(0),
            completed_at: AtomicI64::new(0),
            cancel_requested: AtomicBool::new(false),
            error: OnceLock::new(),
            tasks,
            task_index,
        });

        match self.jobs.entry(job.job_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateJob(job.job_id)),
            Entry::Vacant(slot) => {
                let snapshot = entry.snapshot();
                slot.insert(entry);
                debug!(job_id = %snapshot.job_id, task_count = snapshot.task_count, "Stored job");
                Ok(snapshot)
            }
        }
    }

    async fn get_job(&self, job_id: &str) -> Result<Job, StoreError> {
        Ok(self.entry(job_id)?.snapshot())
    }

    async fn get_task(&self, job_id: &str, task_id: &str) -> Result<Task, StoreError> {
        let entry = self.entry(job_id)?;
        let task = entry.task_slot(task_id)?.lock().await.clone();
        Ok(task)
    }

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<Task>, StoreError> {
        let entry = self.entry(job_id)?;
        let mut tasks = Vec::with_capacity(entry.tasks.len());
        for slot in &entry.tasks {
            tasks.push(slot.lock().await.clone());
        }
        Ok(tasks)
    }

    async fn mark_job_running(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.entry(job_id)?.mark_running())
    }

    async fn begin_attempt(
        &self,
        job_id: &str,
        task_id: &str,
        max_attempts: u32,
    ) -> Result<AttemptStart, StoreError> {
        let entry = self.entry(job_id)?;
        let mut task = entry.task_slot(task_id)?.lock().await;
        if task.status.is_terminal() {
            return Ok(AttemptStart::AlreadyTerminal);
        }
        if task.attempt_count >= max_attempts {
            return Ok(AttemptStart::Exhausted(task.clone()));
        }
        task.status = TaskStatus::Running;
        task.attempt_count += 1;
        Ok(AttemptStart::Started(task.clone()))
    }

    async fn record_attempt_error(
        &self,
        job_id: &str,
        task_id: &str,
        kind: TaskErrorKind,
        error: &str,
    ) -> Result<(), StoreError> {
        let entry = self.entry(job_id)?;
        let mut task = entry.task_slot(task_id)?.lock().await;
        if !task.status.is_terminal() {
            task.error = Some(error.to_string());
            task.error_kind = Some(kind);
        }
        Ok(())
    }

    async fn finish_task(
        &self,
        job_id: &str,
        task_id: &str,
        outcome: TaskOutcome,
    ) -> Result<FinishOutcome, StoreError> {
        self.entry(job_id)?.finish(task_id, outcome).await
    }

    async fn request_cancel(&self, job_id: &str) -> Result<Job, StoreError> {
        let entry = self.entry(job_id)?;
        if !entry.status().is_terminal() {
            entry.cancel_requested.store(true, Ordering::Release);
        }
        Ok(entry.snapshot())
    }

    async fn fail_job(&self, job_id: &str, error: &str) -> Result<Job, StoreError> {
        let entry = self.entry(job_id)?;
        let _ = entry.error.set(error.to_string());
        let task_ids: Vec<String> = entry.task_index.keys().cloned().collect();
        for task_id in task_ids {
            entry
                .finish(&task_id, TaskOutcome::failed(TaskErrorKind::QueueUnavailable, error))
                .await?;
        }
        Ok(entry.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Message, Usage};
    use crate::store::NewTask;

    fn params() -> GenerationParams {
        GenerationParams {
            max_tokens: 64,
            temperature: 0.7,
            top_p: 0.95,
        }
    }

    fn new_job(job_id: &str, task_ids: &[&str]) -> NewJob {
        NewJob {
            job_id: job_id.to_string(),
            model: "llama-7b".to_string(),
            params: params(),
            metadata: None,
            tasks: task_ids
                .iter()
                .map(|id| NewTask {
                    task_id: id.to_string(),
                    messages: vec![Message::user(format!("prompt {}", id))],
                })
                .collect(),
        }
    }

    fn success(text: &str) -> TaskOutcome {
        TaskOutcome::Succeeded {
            output: text.to_string(),
            usage: Usage::new(3, 5),
        }
    }

    #[tokio::test]
    async fn test_create_job_starts_queued() {
        let store = InMemoryJobStore::new();
        let job = store.create_job(new_job("batch-1", &["a", "b", "c"])).await.unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.task_count, 3);
        assert_eq!((job.completed_count, job.failed_count), (0, 0));
        assert!(job.started_at.is_none());

        let tasks = store.list_tasks("batch-1").await.unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_duplicate_task_ids_create_nothing() {
        let store = InMemoryJobStore::new();
        let err = store.create_job(new_job("batch-1", &["a", "a"])).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateTask("a".into()));
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a"])).await.unwrap();
        let err = store.create_job(new_job("batch-1", &["b"])).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateJob("batch-1".into()));
    }

    #[tokio::test]
    async fn test_mark_running_once() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a"])).await.unwrap();

        assert!(store.mark_job_running("batch-1").await.unwrap());
        assert!(!store.mark_job_running("batch-1").await.unwrap());

        let job = store.get_job("batch-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a", "b"])).await.unwrap();

        let first = store.finish_task("batch-1", "a", success("one")).await.unwrap();
        assert_eq!(
            first,
            FinishOutcome::Recorded {
                job_status: JobStatus::Queued,
                finalized: false
            }
        );

        let again = store
            .finish_task("batch-1", "a", TaskOutcome::failed(TaskErrorKind::Unknown, "late"))
            .await
            .unwrap();
        assert_eq!(again, FinishOutcome::AlreadyTerminal);

        let job = store.get_job("batch-1").await.unwrap();
        assert_eq!((job.completed_count, job.failed_count), (1, 0));
        let task = store.get_task("batch-1", "a").await.unwrap();
        assert_eq!(task.output.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_last_finish_finalizes() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a", "b"])).await.unwrap();
        store.mark_job_running("batch-1").await.unwrap();

        store.finish_task("batch-1", "a", success("ok")).await.unwrap();
        let last = store
            .finish_task("batch-1", "b", TaskOutcome::failed(TaskErrorKind::InvalidRequest, "bad"))
            .await
            .unwrap();
        assert_eq!(
            last,
            FinishOutcome::Recorded {
                job_status: JobStatus::PartiallyCompleted,
                finalized: true
            }
        );

        let job = store.get_job("batch-1").await.unwrap();
        assert_eq!(job.status, JobStatus::PartiallyCompleted);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_begin_attempt_counts_and_skips_terminal() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a"])).await.unwrap();

        let AttemptStart::Started(task) = store.begin_attempt("batch-1", "a", 3).await.unwrap() else {
            panic!("first attempt should start");
        };
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempt_count, 1);
        let AttemptStart::Started(task) = store.begin_attempt("batch-1", "a", 3).await.unwrap() else {
            panic!("second attempt should start");
        };
        assert_eq!(task.attempt_count, 2);

        store.finish_task("batch-1", "a", success("ok")).await.unwrap();
        assert_eq!(
            store.begin_attempt("batch-1", "a", 3).await.unwrap(),
            AttemptStart::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn test_begin_attempt_stops_at_ceiling() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a"])).await.unwrap();

        for _ in 0..2 {
            store.begin_attempt("batch-1", "a", 2).await.unwrap();
        }
        store
            .record_attempt_error("batch-1", "a", TaskErrorKind::RateLimited, "rate limited")
            .await
            .unwrap();

        match store.begin_attempt("batch-1", "a", 2).await.unwrap() {
            AttemptStart::Exhausted(task) => {
                assert_eq!(task.attempt_count, 2);
                assert_eq!(task.error_kind, Some(TaskErrorKind::RateLimited));
                assert_eq!(task.error.as_deref(), Some("rate limited"));
            }
            other => panic!("unexpected start: {:?}", other),
        }
        assert_eq!(store.get_task("batch-1", "a").await.unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_cancel_ignored_on_terminal_job() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a"])).await.unwrap();
        store.finish_task("batch-1", "a", success("ok")).await.unwrap();

        let job = store.request_cancel("batch-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!job.cancel_requested);
    }

    #[tokio::test]
    async fn test_fail_job_fails_every_task() {
        let store = InMemoryJobStore::new();
        store.create_job(new_job("batch-1", &["a", "b"])).await.unwrap();

        let job = store.fail_job("batch-1", "queue closed").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("queue closed"));
        assert_eq!((job.completed_count, job.failed_count), (0, 2));

        let task = store.get_task("batch-1", "b").await.unwrap();
        assert_eq!(task.error_kind, Some(TaskErrorKind::QueueUnavailable));
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let store = InMemoryJobStore::new();
        assert!(matches!(store.get_job("nope").await, Err(StoreError::JobNotFound(_))));

        store.create_job(new_job("batch-1", &["a"])).await.unwrap();
        assert!(matches!(
            store.get_task("batch-1", "zzz").await,
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_finishers_finalize_once() {
        let store = InMemoryJobStore::new();
        let ids: Vec<String> = (0..64).map(|i| format!("t{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        store.create_job(new_job("batch-1", &id_refs)).await.unwrap();

        let mut handles = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let outcome = if i % 4 == 0 {
                    TaskOutcome::failed(TaskErrorKind::InvalidRequest, "bad")
                } else {
                    success("ok")
                };
                store.finish_task("batch-1", &id, outcome).await.unwrap()
            }));
        }

        let mut finalized = 0;
        for handle in handles {
            if let FinishOutcome::Recorded { finalized: true, .. } = handle.await.unwrap() {
                finalized += 1;
            }
        }

        assert_eq!(finalized, 1);
        let job = store.get_job("batch-1").await.unwrap();
        assert_eq!((job.completed_count, job.failed_count), (48, 16));
        assert_eq!(job.status, JobStatus::PartiallyCompleted);
    }
}
