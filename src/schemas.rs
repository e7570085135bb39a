//! # Schemas Module
//!
//! Request and response bodies for the HTTP surface: OpenAI-compatible chat
//! completions, batch submission/status, and the model listing.

use crate::store::{Job, JobStatus, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// # Chat Completion Request
///
/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// Logical model identifier, resolved through the registry
    pub model: String,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 to 2.0)
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter (0.0 to 1.0)
    pub top_p: Option<f32>,
    /// Streaming is not served by this gateway; `true` is rejected
    pub stream: Option<bool>,
    /// Free-form caller metadata, logged but not forwarded
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// One task inside a batch submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchTask {
    pub id: String,
    pub messages: Vec<Message>,
}

/// # Batch Generation Request
///
/// Body of `POST /v1/batch/generate`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchGenerationRequest {
    pub model: String,
    pub tasks: Vec<BatchTask>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub batch_metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmissionResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub submitted_at: i64,
    pub task_count: u32,
}

impl From<&Job> for BatchSubmissionResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            submitted_at: job.submitted_at,
            task_count: job.task_count,
        }
    }
}

/// Per-task entry in batch status and results responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTaskResult {
    pub id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub attempts: u32,
}

impl From<&Task> for BatchTaskResult {
    fn from(task: &Task) -> Self {
        Self {
            id: task.task_id.clone(),
            status: task.status,
            output: task.output.clone(),
            error: task.error.clone(),
            usage: task.usage,
            attempts: task.attempt_count,
        }
    }
}

/// # Batch Status Response
///
/// Body of `GET /v1/batch/{job_id}`: the job record plus every task that has
/// reached a terminal status so far, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub job_id: String,
    pub model: String,
    pub status: JobStatus,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub task_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub results: Vec<BatchTaskResult>,
}

impl BatchStatusResponse {
    pub fn new(job: Job, results: Vec<BatchTaskResult>) -> Self {
        Self {
            job_id: job.job_id,
            model: job.model,
            status: job.status,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            task_count: job.task_count,
            completed_count: job.completed_count,
            failed_count: job.failed_count,
            cancel_requested: job.cancel_requested,
            error: job.error,
            metadata: job.metadata,
            results,
        }
    }
}

/// Body of `GET /v1/batch/{job_id}/results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultsResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub results: Vec<BatchTaskResult>,
}

/// Display entry for `GET /v1/models`. Never carries URLs or credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub tier: String,
    pub max_tokens: u32,
    pub supports_streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsListResponse {
    pub models: Vec<ModelInfo>,
}
