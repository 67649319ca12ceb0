//! Multipart form encoding of parameter values.

use remote_scripts_core::{ParameterValues, parameter::value_text};
use reqwest::multipart::Form;
use serde_json::Value;

/// Field carrying the script name in submission forms.
pub const SCRIPT_NAME_FIELD: &str = "__script_name";
/// Field carrying the JSON schedule config in schedule forms.
pub const SCHEDULE_CONFIG_FIELD: &str = "__schedule_config";

/// Text fields of a submission form, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    fields: Vec<(String, String)>,
}

impl FormFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields for `values`: arrays expand to repeated fields, `true` becomes
    /// `"true"`, and `false`, null and empty strings are left out.
    #[must_use]
    pub fn from_values(values: &ParameterValues) -> Self {
        let mut form = Self::new();
        for (name, value) in values {
            form.push_value(name, value);
        }
        form
    }

    /// Append one field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    fn push_value(&mut self, name: &str, value: &Value) {
        match value {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => self.fields.push((name.to_string(), "true".to_string())),
            Value::String(s) if s.is_empty() => {}
            Value::Array(items) => {
                for item in items {
                    self.push_value(name, item);
                }
            }
            other => self.fields.push((name.to_string(), value_text(other))),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    #[must_use]
    pub fn into_form(self) -> Form {
        self.fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value))
    }
}
