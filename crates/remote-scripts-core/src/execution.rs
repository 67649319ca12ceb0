//! Execution state as seen by the client.

use std::{
    collections::HashMap,
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{ParameterValues, SessionError};

/// Server-assigned execution identifier. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ExecutionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Submitted, stream not yet open.
    Initializing,
    /// Stream open, job running.
    Executing,
    /// Stream closed normally.
    Finished,
    /// Stream dropped abnormally; the job may still be running.
    Disconnected,
    /// Stream refused or failed.
    Error,
}

impl ExecutionStatus {
    /// Whether the session is still waiting on its stream.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Initializing | Self::Executing)
    }
}

/// One chunk of output with the local time it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub text: String,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
}

impl LogChunk {
    /// Stamp a chunk with the current time.
    #[must_use]
    pub fn now(text: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            text: text.into(),
            timestamp,
        }
    }
}

/// A file produced by the execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadableFile {
    pub url: String,
    pub filename: String,
}

/// Client-side view of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionState {
    pub id: ExecutionId,
    pub script_name: String,
    pub status: ExecutionStatus,
    /// Append-only.
    pub logs: Vec<LogChunk>,
    /// At most one outstanding prompt; a newer one replaces it.
    pub input_prompt: Option<String>,
    /// Append-only.
    pub files: Vec<DownloadableFile>,
    /// Output path -> download URL, last write wins.
    pub inline_images: HashMap<String, String>,
    pub exit_code: Option<i32>,
    pub error: Option<SessionError>,
    /// Values the execution was submitted with, when known.
    pub parameter_values: ParameterValues,
}

impl ExecutionState {
    /// Create state for a freshly tracked execution.
    #[must_use]
    pub fn new(
        id: ExecutionId,
        script_name: impl Into<String>,
        status: ExecutionStatus,
        parameter_values: ParameterValues,
    ) -> Self {
        Self {
            id,
            script_name: script_name.into(),
            status,
            logs: Vec::new(),
            input_prompt: None,
            files: Vec::new(),
            inline_images: HashMap::new(),
            exit_code: None,
            error: None,
            parameter_values,
        }
    }

    /// Concatenated log text.
    #[must_use]
    pub fn output(&self) -> String {
        self.logs.iter().map(|c| c.text.as_str()).collect()
    }
}

/// Live change to an execution, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Log(LogChunk),
    InputPrompt { text: String },
    InputAnswered,
    File(DownloadableFile),
    InlineImage {
        output_path: String,
        download_url: String,
    },
    Status {
        status: ExecutionStatus,
        error: Option<SessionError>,
    },
}

impl ExecutionEvent {
    /// Approximate size in bytes, used to bound feed history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 16;
        match self {
            Self::Log(chunk) => chunk.text.len() + OVERHEAD,
            Self::InputPrompt { text } => text.len() + OVERHEAD,
            Self::File(file) => file.url.len() + file.filename.len() + OVERHEAD,
            Self::InlineImage {
                output_path,
                download_url,
            } => output_path.len() + download_url.len() + OVERHEAD,
            Self::InputAnswered | Self::Status { .. } => OVERHEAD,
        }
    }

    /// Whether this event ends the live stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Status { status, .. } if !status.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(ExecutionStatus::Initializing.is_active());
        assert!(ExecutionStatus::Executing.is_active());
        assert!(!ExecutionStatus::Finished.is_active());
        assert!(!ExecutionStatus::Disconnected.is_active());
        assert!(!ExecutionStatus::Error.is_active());
    }

    #[test]
    fn test_output_concatenates_chunks() {
        let mut state = ExecutionState::new(
            ExecutionId::new("7"),
            "build",
            ExecutionStatus::Executing,
            ParameterValues::new(),
        );
        state.logs.push(LogChunk::now("hello "));
        state.logs.push(LogChunk::now("world"));
        assert_eq!(state.output(), "hello world");
    }

    #[test]
    fn test_status_event_terminality() {
        let finished = ExecutionEvent::Status {
            status: ExecutionStatus::Finished,
            error: None,
        };
        let executing = ExecutionEvent::Status {
            status: ExecutionStatus::Executing,
            error: None,
        };
        assert!(finished.is_terminal());
        assert!(!executing.is_terminal());
        assert!(!ExecutionEvent::InputAnswered.is_terminal());
    }
}
