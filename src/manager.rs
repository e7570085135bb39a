//! # Batch Job Manager
//!
//! Accepts batch submissions, persists them, and hands their task references
//! to the queue. Reads (status, results) go straight to the job store, so a
//! poller always sees the latest counters.

use crate::{
    error::GatewayError,
    queue::TaskQueue,
    registry::ModelRegistry,
    schemas::BatchGenerationRequest,
    store::{GenerationParams, Job, JobStore, NewJob, NewTask, Task, TaskRef},
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Generate a job id of the form `batch-<12 hex chars>`.
pub fn new_job_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("batch-{}", &raw[..12])
}

#[derive(Clone)]
pub struct BatchJobManager {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<ModelRegistry>,
}

impl BatchJobManager {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>, registry: Arc<ModelRegistry>) -> Self {
        Self { store, queue, registry }
    }

    /// Create the job and its tasks, then enqueue every task as one unit.
    ///
    /// Returns as soon as the references are queued. If the queue rejects
    /// them, the job is recorded as failed and `QueueUnavailable` is returned.
    pub async fn submit(&self, request: BatchGenerationRequest) -> Result<Job, GatewayError> {
        let model = self.registry.resolve(&request.model)?;
        let params = self.generation_params(&request)?;
        validate_tasks(&request)?;

        let job_id = new_job_id();
        let tasks: Vec<NewTask> = request
            .tasks
            .into_iter()
            .map(|task| NewTask {
                task_id: task.id,
                messages: task.messages,
            })
            .collect();
        let refs: Vec<TaskRef> = tasks
            .iter()
            .map(|task| TaskRef {
                job_id: job_id.clone(),
                task_id: task.task_id.clone(),
            })
            .collect();

        let job = self
            .store
            .create_job(NewJob {
                job_id: job_id.clone(),
                model: model.logical_name.clone(),
                params,
                metadata: request.batch_metadata,
                tasks,
            })
            .await?;

        if let Err(e) = self.queue.enqueue(refs).await {
            let reason = format!("failed to enqueue tasks: {}", e);
            error!(job_id = %job_id, error = %e, "Batch submission could not be queued");
            self.store.fail_job(&job_id, &reason).await?;
            return Err(GatewayError::QueueUnavailable {
                message: reason,
                job_id: Some(job_id),
            });
        }

        info!(
            event = "batch_submitted",
            job_id = %job.job_id,
            model = %job.model,
            task_count = job.task_count,
            metadata = ?job.metadata,
            "Batch job submitted"
        );
        Ok(job)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Job, GatewayError> {
        Ok(self.store.get_job(job_id).await?)
    }

    /// Tasks that have reached a terminal status, in submission order.
    pub async fn get_results(&self, job_id: &str) -> Result<Vec<Task>, GatewayError> {
        let mut tasks: Vec<Task> = self
            .store
            .list_tasks(job_id)
            .await?
            .into_iter()
            .filter(|task| task.status.is_terminal())
            .collect();
        tasks.sort_by_key(|task| task.index);
        Ok(tasks)
    }

    /// Flag the job for cancellation. Tasks not yet started are failed as
    /// cancelled when a worker picks them up.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, GatewayError> {
        let job = self.store.request_cancel(job_id).await?;
        if job.cancel_requested {
            info!(event = "batch_cancel_requested", job_id = %job.job_id, status = %job.status, "Batch job cancellation requested");
        }
        Ok(job)
    }

    fn generation_params(&self, request: &BatchGenerationRequest) -> Result<GenerationParams, GatewayError> {
        let defaults = self.registry.defaults();
        let params = GenerationParams {
            max_tokens: request.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: request.temperature.unwrap_or(defaults.temperature),
            top_p: request.top_p.unwrap_or(defaults.top_p),
        };

        if params.max_tokens == 0 {
            return Err(GatewayError::BadRequest("max_tokens must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&params.temperature) {
            return Err(GatewayError::BadRequest("temperature must be between 0 and 2".to_string()));
        }
        if !(0.0..=1.0).contains(&params.top_p) {
            return Err(GatewayError::BadRequest("top_p must be between 0 and 1".to_string()));
        }
        Ok(params)
    }
}

fn validate_tasks(request: &BatchGenerationRequest) -> Result<(), GatewayError> {
    if request.tasks.is_empty() {
        return Err(GatewayError::BadRequest("tasks must not be empty".to_string()));
    }

    let mut seen = HashSet::with_capacity(request.tasks.len());
    for task in &request.tasks {
        if task.id.trim().is_empty() {
            return Err(GatewayError::BadRequest("task id must not be empty".to_string()));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(GatewayError::BadRequest(format!("duplicate task id: {}", task.id)));
        }
        if task.messages.is_empty() {
            return Err(GatewayError::BadRequest(format!("task {} has no messages", task.id)));
        }
    }
    Ok(())
}
