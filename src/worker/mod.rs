//! # Batch Worker Pool
//!
//! A fixed number of long-running workers pull task references from the
//! [`TaskQueue`], run them against the [`CompletionBackend`] with retries, and
//! record exactly one terminal outcome per task in the [`JobStore`].
//!
//! Deliveries are at-least-once, so every step re-reads the task from the
//! store and relies on the store's conditional transitions. A redelivered
//! task that already finished is acknowledged without another backend call.

use crate::{
    adapters::{CompletionBackend, CompletionRequest, CompletionResponse},
    error::BackendError,
    queue::{Lease, QueueError, TaskQueue},
    registry::{ModelConfig, ModelRegistry},
    store::{AttemptStart, FinishOutcome, JobStore, StoreError, TaskErrorKind, TaskOutcome, TaskRef},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

mod retry;

pub use retry::RetryPolicy;

/// Runtime settings for the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// How long a dequeued reference stays invisible to other workers
    pub lease_timeout: Duration,
    /// How long one dequeue call blocks before looping
    pub dequeue_wait: Duration,
    /// Per-attempt deadline when the model does not set its own
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
            lease_timeout: Duration::from_secs(300),
            dequeue_wait: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// A terminal outcome was recorded by this delivery.
    Finished,
    /// Nothing to do: the task is gone or already terminal.
    Skipped,
    /// Shutdown interrupted a backoff; the lease is left to expire.
    Interrupted,
}

/// One pool member. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn CompletionBackend>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn CompletionBackend>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            store,
            queue,
            registry,
            backend,
            config,
            shutdown,
        }
    }

    /// Pull and process references until shutdown or queue close.
    pub async fn run(self) {
        debug!(worker = self.id, "Batch worker started");
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = self.queue.dequeue(self.config.lease_timeout, self.config.dequeue_wait) => next,
            };

            match next {
                Ok(Some(lease)) => self.handle(lease).await,
                Ok(None) => {}
                Err(QueueError::Closed) => break,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Dequeue failed");
                    tokio::time::sleep(self.config.dequeue_wait).await;
                }
            }
        }
        debug!(worker = self.id, "Batch worker stopped");
    }

    /// Process one delivery and acknowledge it unless processing was cut short.
    pub async fn handle(&self, lease: Lease) {
        match self.process(&lease).await {
            Ok(Processed::Interrupted) => {
                debug!(worker = self.id, task = %lease.task, "Left lease to expire after shutdown");
            }
            Ok(_) => {
                if let Err(e) = self.queue.ack(&lease).await {
                    // The reference may be delivered again; that delivery will
                    // find the task terminal and skip it.
                    debug!(worker = self.id, task = %lease.task, error = %e, "Ack failed");
                }
            }
            Err(e) => {
                error!(worker = self.id, task = %lease.task, error = %e, "Store error while processing task");
            }
        }
    }

    pub async fn process(&self, lease: &Lease) -> Result<Processed, StoreError> {
        let TaskRef { job_id, task_id } = &lease.task;

        let job = match self.store.get_job(job_id).await {
            Ok(job) => job,
            Err(StoreError::JobNotFound(_)) => {
                warn!(task = %lease.task, "Dropping reference to unknown job");
                return Ok(Processed::Skipped);
            }
            Err(e) => return Err(e),
        };
        let task = match self.store.get_task(job_id, task_id).await {
            Ok(task) => task,
            Err(StoreError::TaskNotFound { .. }) => {
                warn!(task = %lease.task, "Dropping reference to unknown task");
                return Ok(Processed::Skipped);
            }
            Err(e) => return Err(e),
        };

        if task.status.is_terminal() {
            debug!(task = %lease.task, delivery = lease.delivery, "Task already terminal; skipping redelivery");
            return Ok(Processed::Skipped);
        }

        if job.cancel_requested {
            let outcome = TaskOutcome::failed(TaskErrorKind::Cancelled, "job was cancelled before this task ran");
            return self.finish(&lease.task, outcome).await;
        }

        if self.store.mark_job_running(job_id).await? {
            info!(
                event = "batch_started",
                job_id = %job_id,
                model = %job.model,
                task_count = job.task_count,
                "Batch job started"
            );
        }

        let model = match self.registry.resolve(&job.model) {
            Ok(model) => model.clone(),
            Err(e) => {
                let outcome = TaskOutcome::failed(TaskErrorKind::ModelNotFound, e.to_string());
                return self.finish(&lease.task, outcome).await;
            }
        };

        let request = CompletionRequest {
            physical_model_name: model.physical_model_name.clone(),
            messages: task.messages,
            max_tokens: Some(job.params.max_tokens.min(model.max_tokens)),
            temperature: Some(job.params.temperature),
            top_p: Some(job.params.top_p),
        };
        let deadline = model.timeout.unwrap_or(self.config.request_timeout);
        let retry = self.config.retry;

        loop {
            // Attempts survive redelivery, so the budget is checked against
            // the stored count before it is bumped.
            let attempt = match self.store.begin_attempt(job_id, task_id, retry.max_attempts).await? {
                AttemptStart::Started(task) => task.attempt_count,
                AttemptStart::AlreadyTerminal => return Ok(Processed::Skipped),
                AttemptStart::Exhausted(task) => {
                    warn!(
                        task = %lease.task,
                        attempts = task.attempt_count,
                        "Redelivered task has no attempts left"
                    );
                    let kind = task.error_kind.unwrap_or(TaskErrorKind::Unknown);
                    let error = match task.error {
                        Some(last) => format!("{} (after {} attempt(s))", last, task.attempt_count),
                        None => format!("retry budget of {} attempts exhausted", retry.max_attempts),
                    };
                    return self.finish(&lease.task, TaskOutcome::failed(kind, error)).await;
                }
            };

            let started = Instant::now();
            let result = self.call_with_heartbeat(lease, &model, request.clone(), deadline).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    debug!(
                        task = %lease.task,
                        attempt,
                        latency_ms = elapsed_ms,
                        completion_tokens = response.completion_tokens,
                        "Task attempt succeeded"
                    );
                    let outcome = TaskOutcome::Succeeded {
                        usage: response.usage(),
                        output: response.content,
                    };
                    return self.finish(&lease.task, outcome).await;
                }
                Err(err) if retry.should_retry(attempt, &err) => {
                    let delay = retry.delay_for(attempt, &err);
                    warn!(
                        task = %lease.task,
                        attempt,
                        max_attempts = retry.max_attempts,
                        error_kind = err.kind(),
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Task attempt failed; retrying"
                    );
                    self.store
                        .record_attempt_error(job_id, task_id, TaskErrorKind::from(&err), &err.to_string())
                        .await?;
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(Processed::Interrupted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    warn!(
                        task = %lease.task,
                        attempt,
                        error_kind = err.kind(),
                        error = %err,
                        "Task failed"
                    );
                    let outcome = TaskOutcome::failed(
                        TaskErrorKind::from(&err),
                        format!("{} (after {} attempt(s))", err, attempt),
                    );
                    return self.finish(&lease.task, outcome).await;
                }
            }
        }
    }

    /// Run one backend call under `deadline`, renewing the lease every half
    /// lease period so a slow model cannot outlive it.
    async fn call_with_heartbeat(
        &self,
        lease: &Lease,
        model: &ModelConfig,
        request: CompletionRequest,
        deadline: Duration,
    ) -> Result<CompletionResponse, BackendError> {
        let call = tokio::time::timeout(deadline, self.backend.complete(model, request));
        tokio::pin!(call);

        let period = (self.config.lease_timeout / 2).max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outcome = &mut call => {
                    return match outcome {
                        Ok(result) => result,
                        Err(_) => Err(BackendError::Timeout(format!("no response within {:?}", deadline))),
                    };
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.queue.extend(lease, self.config.lease_timeout).await {
                        debug!(task = %lease.task, error = %e, "Could not extend lease");
                    }
                }
            }
        }
    }

    async fn finish(&self, task: &TaskRef, outcome: TaskOutcome) -> Result<Processed, StoreError> {
        match self.store.finish_task(&task.job_id, &task.task_id, outcome).await? {
            FinishOutcome::AlreadyTerminal => Ok(Processed::Skipped),
            FinishOutcome::Recorded { finalized: true, .. } => {
                let job = self.store.get_job(&task.job_id).await?;
                info!(
                    event = "batch_completed",
                    job_id = %job.job_id,
                    status = %job.status,
                    task_count = job.task_count,
                    completed_count = job.completed_count,
                    failed_count = job.failed_count,
                    "Batch job finished"
                );
                Ok(Processed::Finished)
            }
            FinishOutcome::Recorded { .. } => Ok(Processed::Finished),
        }
    }
}

/// # Worker Pool
///
/// Owns the spawned workers. Dropping the pool does not stop them; call
/// [`WorkerPool::shutdown`].
pub struct WorkerPool {
    tracker: TaskTracker,
    shutdown: CancellationToken,
    queue: Arc<dyn TaskQueue>,
    workers: usize,
}

impl WorkerPool {
    pub fn start(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let workers = config.workers.max(1);

        for id in 0..workers {
            let worker = Worker::new(
                id,
                config.clone(),
                Arc::clone(&store),
                Arc::clone(&queue),
                Arc::clone(&registry),
                Arc::clone(&backend),
                shutdown.clone(),
            );
            tracker.spawn(worker.run());
        }
        tracker.close();

        info!(workers, "Batch worker pool started");
        Self {
            tracker,
            shutdown,
            queue,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers
    }

    /// Stop taking new work, close the queue and wait up to `grace` for
    /// in-flight tasks.
    pub async fn shutdown(self, grace: Duration) {
        self.shutdown.cancel();
        self.queue.close().await;
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => info!("Batch worker pool stopped"),
            Err(_) => warn!(
                grace_secs = grace.as_secs(),
                "Batch workers still busy after grace period; abandoning in-flight tasks"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::CompletionResponse,
        queue::InMemoryTaskQueue,
        registry::{BackendProtocol, GenerationDefaults, ModelConfig},
        schemas::Message,
        store::{GenerationParams, InMemoryJobStore, JobStatus, NewJob, NewTask, TaskStatus},
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBackend {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    #[async_trait::async_trait]
    impl CompletionBackend for FlakyBackend {
        async fn complete(
            &self,
            _model: &ModelConfig,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures_before_success {
                return Err(BackendError::BackendUnavailable("HTTP 503".to_string()));
            }
            Ok(CompletionResponse {
                content: "ok".to_string(),
                prompt_tokens: 3,
                completion_tokens: 1,
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            workers: 1,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: 0.0,
            },
            lease_timeout: Duration::from_secs(30),
            dequeue_wait: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
        }
    }

    async fn setup(
        failures_before_success: u32,
    ) -> (Worker, Arc<InMemoryJobStore>, Arc<InMemoryTaskQueue>, Arc<FlakyBackend>) {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            failures_before_success,
        });
        let registry = Arc::new(ModelRegistry::new(
            [ModelConfig::new("tiny", BackendProtocol::OpenAICompatible, "http://localhost:9", "tiny-v1")],
            GenerationDefaults::default(),
        ));

        store
            .create_job(NewJob {
                job_id: "batch-test".to_string(),
                model: "tiny".to_string(),
                params: GenerationParams {
                    max_tokens: 16,
                    temperature: 0.0,
                    top_p: 1.0,
                },
                metadata: None,
                tasks: vec![NewTask {
                    task_id: "t1".to_string(),
                    messages: vec![Message::user("hi")],
                }],
            })
            .await
            .unwrap();
        queue
            .enqueue(vec![TaskRef {
                job_id: "batch-test".to_string(),
                task_id: "t1".to_string(),
            }])
            .await
            .unwrap();

        let worker = Worker::new(
            0,
            test_config(),
            store.clone(),
            queue.clone(),
            registry,
            backend.clone(),
            CancellationToken::new(),
        );
        (worker, store, queue, backend)
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let (worker, store, queue, backend) = setup(2).await;
        let lease = queue.dequeue(Duration::from_secs(30), Duration::ZERO).await.unwrap().unwrap();

        worker.handle(lease).await;

        let task = store.get_task("batch-test", "t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempt_count, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get_job("batch-test").await.unwrap().status, JobStatus::Completed);
        assert_eq!(queue.stats().await.in_flight, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_task() {
        let (worker, store, queue, backend) = setup(10).await;
        let lease = queue.dequeue(Duration::from_secs(30), Duration::ZERO).await.unwrap().unwrap();

        worker.handle(lease).await;

        let task = store.get_task("batch-test", "t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(TaskErrorKind::BackendUnavailable));
        assert_eq!(task.attempt_count, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get_job("batch-test").await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_redelivery_of_finished_task_is_skipped() {
        let (worker, _store, queue, backend) = setup(0).await;
        let lease = queue.dequeue(Duration::from_secs(30), Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(worker.process(&lease).await.unwrap(), Processed::Finished);
        assert_eq!(worker.process(&lease).await.unwrap(), Processed::Skipped);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let (worker, store, queue, _backend) = setup(0).await;
        let registry = worker.registry.clone();
        let backend = worker.backend.clone();

        let pool = WorkerPool::start(test_config(), store.clone(), queue.clone(), registry, backend);
        assert_eq!(pool.size(), 1);

        for _ in 0..100 {
            if store.get_job("batch-test").await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get_job("batch-test").await.unwrap().status, JobStatus::Completed);

        pool.shutdown(Duration::from_secs(1)).await;
        assert!(queue.is_closed());
    }
}
