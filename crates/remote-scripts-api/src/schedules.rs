//! Scheduled execution endpoints.

use remote_scripts_core::{ApiError, ParameterValues};
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::client::{HttpJobApi, parse_response};
use crate::form::{FormFields, SCHEDULE_CONFIG_FIELD, SCRIPT_NAME_FIELD};

/// A schedule registered on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub script_name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execution: Option<String>,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default)]
    pub start_datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_period: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_days: Option<Vec<String>>,
}

/// When a scheduled execution ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOption {
    Never,
    Count,
    Date,
}

/// Recurrence settings submitted with a new schedule.
///
/// Recurrence is computed by the server; the client only forwards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub repeatable: bool,
    pub start_datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_option: Option<EndOption>,
    /// Run count or end date, depending on `end_option`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_arg: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_period: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_days: Option<Vec<String>>,
}

impl ScheduleConfig {
    /// A single run at `start_datetime`.
    #[must_use]
    pub fn once(start_datetime: impl Into<String>) -> Self {
        Self {
            repeatable: false,
            start_datetime: start_datetime.into(),
            end_option: None,
            end_arg: None,
            repeat_unit: None,
            repeat_period: None,
            week_days: None,
        }
    }

    /// Repeat every `period` `unit`s (e.g. `"hours"`, `"days"`).
    #[must_use]
    pub fn every(mut self, period: u32, unit: impl Into<String>) -> Self {
        self.repeatable = true;
        self.repeat_period = Some(period);
        self.repeat_unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn on_week_days(mut self, days: Vec<String>) -> Self {
        self.week_days = Some(days);
        self
    }

    #[must_use]
    pub fn ending(mut self, option: EndOption, arg: Option<Value>) -> Self {
        self.end_option = Some(option);
        self.end_arg = arg;
        self
    }
}

#[derive(Deserialize)]
struct ScheduleList {
    #[serde(default)]
    schedules: Vec<Schedule>,
}

#[derive(Deserialize)]
struct Created {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

impl HttpJobApi {
    /// Schedules on the server, optionally only those of one script.
    ///
    /// # Errors
    /// Returns error if the request fails or the response cannot be decoded.
    pub async fn list_schedules(&self, script_name: Option<&str>) -> Result<Vec<Schedule>, ApiError> {
        let path = match script_name {
            Some(script) => format!("schedules?script={}", urlencoding::encode(script)),
            None => "schedules".to_string(),
        };
        let list: ScheduleList = self.get_json(&path).await?;
        Ok(list.schedules)
    }

    /// Register a schedule, returning its id.
    ///
    /// # Errors
    /// Returns error if the request fails or the server rejects the schedule.
    pub async fn create_schedule(
        &self,
        script_name: &str,
        values: &ParameterValues,
        config: &ScheduleConfig,
    ) -> Result<String, ApiError> {
        let schedule_config =
            serde_json::to_string(config).map_err(|e| ApiError::Decode(e.to_string()))?;
        let form = FormFields::from_values(values)
            .field(SCRIPT_NAME_FIELD, script_name)
            .field(SCHEDULE_CONFIG_FIELD, schedule_config);
        let response = self.send(Method::POST, "schedule", Some(form)).await?;
        let created: Created = parse_response(response).await?;
        tracing::info!(schedule_id = %created.id, script = %script_name, "Created schedule");
        Ok(created.id)
    }

    /// # Errors
    /// Returns error if the request fails or the schedule does not exist.
    pub async fn delete_schedule(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("schedules/{}", urlencoding::encode(id));
        self.send(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
