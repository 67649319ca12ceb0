//! Script parameter schema and local validation.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter name -> working value, in schema order.
pub type ParameterValues = IndexMap<String, Value>;

/// Parameter input type.
///
/// Unknown type names from the server fall back to `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParameterType {
    #[default]
    Text,
    Int,
    List,
    Multiselect,
    EditableList,
    FileUpload,
    ServerFile,
    MultilineText,
    Ip,
    Ip4,
    Ip6,
}

impl ParameterType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::List => "list",
            Self::Multiselect => "multiselect",
            Self::EditableList => "editable_list",
            Self::FileUpload => "file_upload",
            Self::ServerFile => "server_file",
            Self::MultilineText => "multiline_text",
            Self::Ip => "ip",
            Self::Ip4 => "ip4",
            Self::Ip6 => "ip6",
        }
    }
}

impl From<String> for ParameterType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "int" => Self::Int,
            "list" => Self::List,
            "multiselect" => Self::Multiselect,
            "editable_list" => Self::EditableList,
            "file_upload" => Self::FileUpload,
            "server_file" => Self::ServerFile,
            "multiline_text" => Self::MultilineText,
            "ip" => Self::Ip,
            "ip4" => Self::Ip4,
            "ip6" => Self::Ip6,
            _ => Self::Text,
        }
    }
}

impl From<ParameterType> for String {
    fn from(kind: ParameterType) -> Self {
        kind.as_str().to_string()
    }
}

/// One parameter of a script's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Unique within a schema.
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Allowed values for list-like parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default)]
    pub secure: bool,
    /// Boolean flag parameter (present or absent, no value).
    #[serde(default)]
    pub without_value: bool,
}

impl Parameter {
    /// Create a plain text parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: false,
            default: None,
            values: None,
            min: None,
            max: None,
            max_length: None,
            regex: None,
            secure: false,
            without_value: false,
        }
    }

    /// Empty value appropriate for this parameter's type.
    #[must_use]
    pub fn empty_value(&self) -> Value {
        match self.kind {
            ParameterType::Multiselect => Value::Array(Vec::new()),
            ParameterType::FileUpload => Value::Null,
            _ if self.without_value => Value::Bool(false),
            _ => Value::String(String::new()),
        }
    }

    /// Value a fresh form starts with: the default, else the empty value.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or_else(|| self.empty_value())
    }

    #[must_use]
    pub fn allowed_values(&self) -> Option<&[String]> {
        self.values.as_deref()
    }

    /// Validate a working value.
    ///
    /// `forced` values were pushed in bulk by a model reload and are exempt
    /// from the allowed-values check.
    ///
    /// # Errors
    /// Returns a user-facing message describing the first failed rule.
    pub fn validate(&self, value: &Value, forced: bool) -> Result<(), String> {
        if self.required {
            match value {
                Value::Null => return Err("This field is required".to_string()),
                Value::String(s) if s.is_empty() => {
                    return Err("This field is required".to_string());
                }
                Value::Array(items) if items.is_empty() => {
                    return Err("Please select at least one option".to_string());
                }
                _ => {}
            }
        }

        match value {
            Value::Null => Ok(()),
            Value::String(s) if s.is_empty() => Ok(()),
            Value::Array(items) => self.validate_selection(items, forced),
            Value::Bool(_) | Value::Object(_) => Ok(()),
            Value::Number(_) | Value::String(_) => {
                let text = value_text(value);
                self.validate_scalar(&text, forced)
            }
        }
    }

    fn validate_scalar(&self, text: &str, forced: bool) -> Result<(), String> {
        match self.kind {
            ParameterType::Int => self.validate_int(text)?,
            ParameterType::List if !forced => self.validate_allowed(text)?,
            ParameterType::Ip if text.parse::<IpAddr>().is_err() => {
                return Err("Invalid IP address".to_string());
            }
            ParameterType::Ip4 if text.parse::<Ipv4Addr>().is_err() => {
                return Err("Invalid IPv4 address".to_string());
            }
            ParameterType::Ip6 if text.parse::<Ipv6Addr>().is_err() => {
                return Err("Invalid IPv6 address".to_string());
            }
            _ => {}
        }

        if let Some(max_length) = self.max_length {
            if text.chars().count() > max_length {
                return Err(format!("Maximum length is {max_length}"));
            }
        }

        if let Some(pattern) = &self.regex {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(text) => {
                    return Err("Value does not match the required pattern".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(parameter = %self.name, "Ignoring invalid regex: {e}");
                }
            }
        }

        Ok(())
    }

    fn validate_int(&self, text: &str) -> Result<(), String> {
        let number: f64 = text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| "Must be a number".to_string())?;
        if number.fract() != 0.0 {
            return Err("Must be an integer".to_string());
        }
        if let Some(min) = self.min {
            if number < min {
                return Err(format!("Minimum value is {min}"));
            }
        }
        if let Some(max) = self.max {
            if number > max {
                return Err(format!("Maximum value is {max}"));
            }
        }
        Ok(())
    }

    fn validate_selection(&self, items: &[Value], forced: bool) -> Result<(), String> {
        if forced || self.kind != ParameterType::Multiselect {
            return Ok(());
        }
        items
            .iter()
            .try_for_each(|item| self.validate_allowed(&value_text(item)))
    }

    fn validate_allowed(&self, text: &str) -> Result<(), String> {
        match self.allowed_values() {
            Some(allowed) if !allowed.iter().any(|a| a == text) => {
                Err("Value is not allowed".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Textual form of a scalar value as submitted to the server.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Script metadata pushed alongside its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Echo of the model id a reload was requested with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_model_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default)]
    pub scheduling_enabled: bool,
}

/// Full script configuration as pushed by `initialConfig`/`reloadedConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(flatten)]
    pub info: ScriptInfo,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}
