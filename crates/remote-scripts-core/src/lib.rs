//! Core types for remote script execution and configuration sync.
//!
//! This crate provides the fundamental building blocks:
//! - `ExecutionState` / `ExecutionEvent` - Per-execution state and live events
//! - `EventFeed` - Broadcast + history for late subscribers
//! - `Parameter` / `ScriptConfig` - Parameter schema model and validation
//! - `ClientConfig` - Server address and client tuning
//! - `JobApi` - Job management collaborator trait

pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod parameter;
pub mod traits;

pub use config::ClientConfig;
pub use error::{ConfigError, SessionError};
pub use execution::{
    DownloadableFile, ExecutionEvent, ExecutionId, ExecutionState, ExecutionStatus, LogChunk,
};
pub use feed::EventFeed;
pub use parameter::{Parameter, ParameterType, ParameterValues, ScriptConfig, ScriptInfo};
pub use traits::{ApiError, JobApi, JobConfig};
