//! Collaborator traits for job management.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ExecutionId, ParameterValues};

/// Configuration an execution was submitted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Script the execution runs.
    pub script_name: String,
    /// Values submitted when the execution was started.
    #[serde(default)]
    pub parameter_values: ParameterValues,
}

/// Job management error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Access denied")]
    Forbidden,
    #[error("Not found")]
    NotFound,
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Trait for the server-side job management API.
///
/// The sync engine only submits, lists, inspects and signals jobs;
/// running them is entirely the server's business.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit a script for execution, returning the server-assigned id.
    async fn start_job(
        &self,
        script_name: &str,
        values: &ParameterValues,
    ) -> Result<ExecutionId, ApiError>;

    /// Ids of executions the server still considers active.
    async fn list_active_jobs(&self) -> Result<Vec<ExecutionId>, ApiError>;

    /// Original submitted configuration of an execution.
    async fn get_job_config(&self, id: &ExecutionId) -> Result<JobConfig, ApiError>;

    /// Ask the execution to stop gracefully.
    async fn stop_job(&self, id: &ExecutionId) -> Result<(), ApiError>;

    /// Terminate the execution immediately.
    async fn kill_job(&self, id: &ExecutionId) -> Result<(), ApiError>;
}
