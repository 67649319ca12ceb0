//! Session sync for remote script executions and configurations.
//!
//! Provides:
//! - `ExecutionRegistry` - Start, track, reattach and close execution sessions
//! - `ConfigurationClient` - The single live configuration session
//! - `ParameterValueStore` - Working values following the live schema
//! - `MemoryJobApi` - In-memory job API for development and tests

pub mod configuration;
pub mod context;
pub mod execution;
pub mod machine;
pub mod memory_api;
pub mod reconcile;
pub mod registry;
pub mod values;

pub use configuration::{
    ConfigState, ConfigurationClient, ConfigurationHandle, SchemaChange, script_endpoint,
};
pub use context::{ClientSignal, SyncContext};
pub use execution::{ExecutionHandle, execution_endpoint};
pub use machine::{SessionHandle, SessionMachine};
pub use memory_api::{JobSignal, MemoryJobApi};
pub use reconcile::PendingReloads;
pub use registry::{ExecutionRegistry, RegistryError};
pub use values::{ParameterSink, ParameterValueStore};
