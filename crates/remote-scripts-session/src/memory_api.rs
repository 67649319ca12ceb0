//! In-memory job API.
//!
//! Useful for development and tests: jobs never run, they are only recorded.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use indexmap::IndexMap;
use remote_scripts_core::{ApiError, ExecutionId, JobApi, JobConfig, ParameterValues};

/// A signal sent to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSignal {
    Stop(ExecutionId),
    Kill(ExecutionId),
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    jobs: IndexMap<ExecutionId, JobConfig>,
    active: Vec<ExecutionId>,
    signals: Vec<JobSignal>,
    list_calls: usize,
    fail_list: bool,
    failing_configs: Vec<ExecutionId>,
}

/// Job API that keeps submitted jobs in memory.
#[derive(Default)]
pub struct MemoryJobApi {
    inner: RwLock<Inner>,
}

impl MemoryJobApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job the server already runs, e.g. from an earlier client.
    pub fn add_active(&self, id: impl Into<ExecutionId>, script_name: &str, values: ParameterValues) {
        let id = id.into();
        let mut inner = self.write();
        inner.jobs.insert(
            id.clone(),
            JobConfig {
                script_name: script_name.to_string(),
                parameter_values: values,
            },
        );
        inner.active.push(id);
    }

    /// Mark a job as no longer active.
    pub fn finish(&self, id: &ExecutionId) {
        self.write().active.retain(|active| active != id);
    }

    /// Make `list_active_jobs` fail.
    pub fn fail_list(&self, fail: bool) {
        self.write().fail_list = fail;
    }

    /// Make `get_job_config` fail for `id`.
    pub fn fail_config(&self, id: impl Into<ExecutionId>) {
        self.write().failing_configs.push(id.into());
    }

    #[must_use]
    pub fn signals(&self) -> Vec<JobSignal> {
        self.read().signals.clone()
    }

    #[must_use]
    pub fn submitted(&self) -> Vec<(ExecutionId, JobConfig)> {
        self.read()
            .jobs
            .iter()
            .map(|(id, config)| (id.clone(), config.clone()))
            .collect()
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.read().list_calls
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobApi for MemoryJobApi {
    async fn start_job(
        &self,
        script_name: &str,
        values: &ParameterValues,
    ) -> Result<ExecutionId, ApiError> {
        let mut inner = self.write();
        inner.next_id += 1;
        let id = ExecutionId::new(format!("job-{}", inner.next_id));
        inner.jobs.insert(
            id.clone(),
            JobConfig {
                script_name: script_name.to_string(),
                parameter_values: values.clone(),
            },
        );
        inner.active.push(id.clone());
        Ok(id)
    }

    async fn list_active_jobs(&self) -> Result<Vec<ExecutionId>, ApiError> {
        let mut inner = self.write();
        inner.list_calls += 1;
        if inner.fail_list {
            return Err(ApiError::Status {
                status: 500,
                body: "list failed".to_string(),
            });
        }
        Ok(inner.active.clone())
    }

    async fn get_job_config(&self, id: &ExecutionId) -> Result<JobConfig, ApiError> {
        let inner = self.read();
        if inner.failing_configs.contains(id) {
            return Err(ApiError::NotFound);
        }
        inner.jobs.get(id).cloned().ok_or(ApiError::NotFound)
    }

    async fn stop_job(&self, id: &ExecutionId) -> Result<(), ApiError> {
        self.write().signals.push(JobSignal::Stop(id.clone()));
        Ok(())
    }

    async fn kill_job(&self, id: &ExecutionId) -> Result<(), ApiError> {
        self.write().signals.push(JobSignal::Kill(id.clone()));
        Ok(())
    }
}
