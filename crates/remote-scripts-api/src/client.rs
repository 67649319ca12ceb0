//! HTTP client for the job management endpoints.
//!
//! Implements [`JobApi`] over the server's REST surface using [`reqwest`].
//! Non-success statuses are mapped onto [`ApiError`] so callers can tell an
//! expired login from a missing execution.

use async_trait::async_trait;
use remote_scripts_core::{
    ApiError, ClientConfig, ExecutionId, JobApi, JobConfig, ParameterValues,
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::form::{FormFields, SCRIPT_NAME_FIELD};

/// HTTP client bound to one server.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpJobApi {
    /// Build a client honoring the config's request timeout.
    ///
    /// # Errors
    /// Returns error if the underlying HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(request_error)?;
        Ok(Self { client, config })
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, config: ClientConfig) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.config
            .http_url(path)
            .map_err(|e| ApiError::Transport(e.to_string()))
    }

    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        form: Option<FormFields>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path)?;
        tracing::debug!(%method, %url, "API request");
        let mut request = self.client.request(method, url);
        if let Some(form) = form {
            request = request.multipart(form.into_form());
        }
        let response = request.send().await.map_err(request_error)?;
        ensure_success(response).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, None).await?;
        parse_response(response).await
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn start_job(
        &self,
        script_name: &str,
        values: &ParameterValues,
    ) -> Result<ExecutionId, ApiError> {
        let form = FormFields::from_values(values).field(SCRIPT_NAME_FIELD, script_name);
        let response = self
            .send(Method::POST, "executions/start", Some(form))
            .await?;
        let body = response.text().await.map_err(request_error)?;
        let id = parse_execution_id(&body)?;
        tracing::info!(execution_id = %id, script = %script_name, "Started execution");
        Ok(id)
    }

    async fn list_active_jobs(&self) -> Result<Vec<ExecutionId>, ApiError> {
        let ids: Vec<String> = self.get_json("executions/active").await?;
        Ok(ids.into_iter().map(ExecutionId::from).collect())
    }

    async fn get_job_config(&self, id: &ExecutionId) -> Result<JobConfig, ApiError> {
        let path = format!("executions/config/{}", urlencoding::encode(id.as_str()));
        self.get_json(&path).await
    }

    async fn stop_job(&self, id: &ExecutionId) -> Result<(), ApiError> {
        let path = format!("executions/stop/{}", urlencoding::encode(id.as_str()));
        self.send(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn kill_job(&self, id: &ExecutionId) -> Result<(), ApiError> {
        let path = format!("executions/kill/{}", urlencoding::encode(id.as_str()));
        self.send(Method::POST, &path, None).await?;
        Ok(())
    }
}

pub(crate) fn request_error(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

/// Map a non-success status onto [`ApiError`], passing success through.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let err = match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        _ => {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            ApiError::Status {
                status: status.as_u16(),
                body,
            }
        }
    };
    tracing::warn!(status = status.as_u16(), "API request rejected: {err}");
    Err(err)
}

pub(crate) async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let body = response.bytes().await.map_err(request_error)?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Execution ids come back as plain text, sometimes JSON-quoted.
fn parse_execution_id(body: &str) -> Result<ExecutionId, ApiError> {
    let trimmed = body.trim();
    let id = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed).map_err(|e| ApiError::Decode(e.to_string()))?
    } else {
        trimmed.to_string()
    };
    if id.is_empty() {
        return Err(ApiError::Decode("empty execution id".to_string()));
    }
    Ok(ExecutionId::new(id))
}
