//! Registry of execution sessions.

use indexmap::IndexMap;
use remote_scripts_core::{
    ApiError, ExecutionId, ExecutionState, ExecutionStatus, ParameterValues,
};
use tokio::task::JoinHandle;

use crate::{context::SyncContext, execution::ExecutionHandle};

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Job API error: {0}")]
    Api(#[from] ApiError),
}

/// Owns every tracked execution session, keyed by execution id.
pub struct ExecutionRegistry {
    ctx: SyncContext,
    sessions: IndexMap<ExecutionId, ExecutionHandle>,
    selected: Option<ExecutionId>,
}

impl ExecutionRegistry {
    #[must_use]
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            sessions: IndexMap::new(),
            selected: None,
        }
    }

    /// Submit a job, start streaming it and select it.
    ///
    /// # Errors
    /// Returns error if the job API rejects the submission.
    pub async fn start(
        &mut self,
        script_name: &str,
        values: ParameterValues,
    ) -> Result<ExecutionId, RegistryError> {
        let id = self.ctx.api().start_job(script_name, &values).await?;
        tracing::info!(execution_id = %id, script = %script_name, "Execution started");

        let state = ExecutionState::new(id.clone(), script_name, ExecutionStatus::Initializing, values);
        self.track(ExecutionHandle::spawn(&self.ctx, state));
        self.selected = Some(id.clone());
        Ok(id)
    }

    /// Select a tracked execution. Unknown ids leave the selection unchanged.
    pub fn select(&mut self, id: &ExecutionId) -> bool {
        if self.sessions.contains_key(id) {
            self.selected = Some(id.clone());
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn get(&self, id: &ExecutionId) -> Option<&ExecutionHandle> {
        self.sessions.get(id)
    }

    #[must_use]
    pub fn selected(&self) -> Option<&ExecutionHandle> {
        self.selected.as_ref().and_then(|id| self.sessions.get(id))
    }

    #[must_use]
    pub const fn selected_id(&self) -> Option<&ExecutionId> {
        self.selected.as_ref()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ExecutionId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionHandle> {
        self.sessions.values()
    }

    /// Sessions still initializing or executing.
    #[must_use]
    pub fn active(&self) -> Vec<&ExecutionHandle> {
        self.sessions
            .values()
            .filter(|handle| handle.status().is_active())
            .collect()
    }

    #[must_use]
    pub fn has_active(&self) -> bool {
        self.sessions.values().any(|handle| handle.status().is_active())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Reply to an execution's input prompt. Returns false if untracked.
    pub fn send_input(&self, id: &ExecutionId, text: impl Into<String>) -> bool {
        self.sessions.get(id).is_some_and(|handle| {
            handle.send_input(text);
            true
        })
    }

    /// Ask the server to stop an execution. Local status follows the stream.
    pub fn stop(&self, id: &ExecutionId) -> JoinHandle<()> {
        let api = self.ctx.api();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.stop_job(&id).await {
                tracing::error!(execution_id = %id, "Failed to stop execution: {e}");
            }
        })
    }

    /// Ask the server to kill an execution. Local status follows the stream.
    pub fn kill(&self, id: &ExecutionId) -> JoinHandle<()> {
        let api = self.ctx.api();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.kill_job(&id).await {
                tracing::error!(execution_id = %id, "Failed to kill execution: {e}");
            }
        })
    }

    /// Stop tracking an execution and close its stream.
    pub fn close(&mut self, id: &ExecutionId) -> bool {
        let Some(handle) = self.sessions.shift_remove(id) else {
            return false;
        };
        handle.close();
        tracing::debug!(execution_id = %id, "Execution closed");

        if self.selected.as_ref() == Some(id) {
            self.selected = self.sessions.keys().next().cloned();
        }
        true
    }

    /// Attach to executions the server still runs but this registry does not
    /// track yet. Returns the newly attached ids.
    ///
    /// # Errors
    /// Returns error if the active execution list cannot be fetched.
    pub async fn reconnect_active_executions(&mut self) -> Result<Vec<ExecutionId>, RegistryError> {
        let api = self.ctx.api();
        let active = api.list_active_jobs().await?;

        let mut attached = Vec::new();
        for id in active {
            if self.sessions.contains_key(&id) {
                continue;
            }
            let config = match api.get_job_config(&id).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(execution_id = %id, "Skipping execution, config unavailable: {e}");
                    continue;
                }
            };
            tracing::info!(execution_id = %id, script = %config.script_name, "Reattaching execution");
            let state = ExecutionState::new(
                id.clone(),
                config.script_name,
                ExecutionStatus::Executing,
                config.parameter_values,
            );
            self.track(ExecutionHandle::spawn(&self.ctx, state));
            attached.push(id);
        }

        if self.selected.is_none() {
            self.selected = self.sessions.keys().next().cloned();
        }
        Ok(attached)
    }

    /// Close every stream and forget every execution.
    pub fn clear_all(&mut self) {
        for handle in self.sessions.values() {
            handle.close();
        }
        tracing::debug!("Cleared {} executions", self.sessions.len());
        self.sessions.clear();
        self.selected = None;
    }

    fn track(&mut self, handle: ExecutionHandle) {
        if let Some(previous) = self.sessions.insert(handle.id().clone(), handle) {
            previous.close();
        }
    }
}

impl Drop for ExecutionRegistry {
    fn drop(&mut self) {
        self.clear_all();
    }
}
