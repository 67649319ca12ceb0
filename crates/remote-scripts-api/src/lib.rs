//! HTTP job management client.
//!
//! Provides:
//! - [`HttpJobApi`], the reqwest implementation of `JobApi`
//! - Multipart form encoding of parameter values
//! - Schedule endpoints

pub mod client;
pub mod form;
pub mod schedules;

pub use client::HttpJobApi;
pub use form::FormFields;
pub use schedules::{EndOption, Schedule, ScheduleConfig};
