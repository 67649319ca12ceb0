//! Working parameter values for the open script.
//!
//! The store is derived state: it follows the schema pushed by the
//! configuration session, validates local edits and forwards every edit.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use remote_scripts_core::{Parameter, ParameterValues};
use serde_json::Value;

use crate::configuration::SchemaChange;

/// Where the store sends its mutations.
pub trait ParameterSink {
    fn send_parameter_value(&self, name: &str, value: Value);

    /// Request a model reload, returning its model id.
    fn reload_model(&self, values: ParameterValues) -> String;
}

/// Client working values with validation errors.
pub struct ParameterValueStore<S> {
    sink: S,
    parameters: Vec<Parameter>,
    values: ParameterValues,
    errors: IndexMap<String, String>,
    /// Names whose values came from an answered reload.
    forced: HashSet<String>,
    /// Defaults seen in the schema, to tell untouched values from edits.
    defaults: HashMap<String, Value>,
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

impl<S: ParameterSink> ParameterValueStore<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            parameters: Vec::new(),
            values: ParameterValues::new(),
            errors: IndexMap::new(),
            forced: HashSet::new(),
            defaults: HashMap::new(),
        }
    }

    /// Follow a schema change. Never sends anything.
    pub fn apply(&mut self, change: SchemaChange) {
        let previous = std::mem::replace(&mut self.parameters, change.parameters);

        if let Some(values) = change.reloaded_values {
            self.forced = values.keys().cloned().collect();
            self.values = values;
            self.revalidate();
            return;
        }

        self.revoke_forced(&previous);
        let present: HashSet<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        self.values.retain(|name, _| present.contains(name.as_str()));
        self.forced.retain(|name| present.contains(name.as_str()));

        for parameter in &self.parameters {
            let seed = match self.values.get(&parameter.name) {
                None => Some(parameter.initial_value()),
                Some(current) => parameter.default.as_ref().filter(|&default| {
                    default != current
                        && (is_empty_value(current)
                            || self.defaults.get(&parameter.name) == Some(current))
                }).cloned(),
            };
            if let Some(value) = seed {
                self.values.insert(parameter.name.clone(), value);
            }
            match &parameter.default {
                Some(default) => self.defaults.insert(parameter.name.clone(), default.clone()),
                None => self.defaults.remove(&parameter.name),
            };
        }

        self.revalidate();
    }

    /// Apply a local edit and forward it. Invalid values go out as null.
    pub fn set_value(&mut self, name: &str, value: Value) {
        if self.values.get(name) != Some(&value) {
            self.forced.remove(name);
        }
        self.values.insert(name.to_string(), value.clone());

        let outgoing = match self.validate(name) {
            Ok(()) => {
                self.errors.shift_remove(name);
                value
            }
            Err(message) => {
                self.errors.insert(name.to_string(), message);
                Value::Null
            }
        };
        self.sink.send_parameter_value(name, outgoing);
    }

    /// Replace all values at once and ask the server to rebuild the schema
    /// from them. Returns the reload's model id, or `None` when nothing
    /// changed.
    pub fn reload(&mut self, values: ParameterValues) -> Option<String> {
        self.forced.clear();
        if values == self.values {
            return None;
        }
        self.values = values.clone();
        self.revalidate();
        Some(self.sink.reload_model(values))
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    #[must_use]
    pub const fn values(&self) -> &ParameterValues {
        &self.values
    }

    #[must_use]
    pub fn error(&self, name: &str) -> Option<&str> {
        self.errors.get(name).map(String::as_str)
    }

    #[must_use]
    pub const fn errors(&self) -> &IndexMap<String, String> {
        &self.errors
    }

    #[must_use]
    pub fn is_forced(&self, name: &str) -> bool {
        self.forced.contains(name)
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Whether every parameter currently validates.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.parameters
            .iter()
            .all(|p| self.validate(&p.name).is_ok())
    }

    /// Values to submit when starting the script.
    #[must_use]
    pub fn form_values(&self) -> ParameterValues {
        self.values
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        let Some(parameter) = self.parameters.iter().find(|p| p.name == name) else {
            return Ok(());
        };
        let value = self.values.get(name).unwrap_or(&Value::Null);
        parameter.validate(value, self.forced.contains(name))
    }

    fn revalidate(&mut self) {
        self.errors = self
            .parameters
            .iter()
            .filter_map(|p| self.validate(&p.name).err().map(|e| (p.name.clone(), e)))
            .collect();
    }

    fn revoke_forced(&mut self, previous: &[Parameter]) {
        let allowed_before: HashMap<&str, Option<&[String]>> = previous
            .iter()
            .map(|p| (p.name.as_str(), p.allowed_values()))
            .collect();
        let parameters = &self.parameters;
        self.forced.retain(|name| {
            let before = allowed_before.get(name.as_str()).copied().flatten();
            let after = parameters
                .iter()
                .find(|p| &p.name == name)
                .and_then(Parameter::allowed_values);
            let keep = matches!((before, after), (Some(a), Some(b)) if a == b);
            if !keep {
                tracing::debug!(parameter = %name, "Allowed values changed, value no longer forced");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use remote_scripts_core::ParameterType;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Value)>>,
        reloads: Mutex<Vec<ParameterValues>>,
    }

    impl ParameterSink for RecordingSink {
        fn send_parameter_value(&self, name: &str, value: Value) {
            self.sent.lock().unwrap().push((name.to_string(), value));
        }

        fn reload_model(&self, values: ParameterValues) -> String {
            let mut reloads = self.reloads.lock().unwrap();
            reloads.push(values);
            format!("model-{}", reloads.len())
        }
    }

    fn replaced(parameters: Vec<Parameter>) -> SchemaChange {
        SchemaChange {
            parameters,
            replaced: true,
            reloaded_values: None,
        }
    }

    fn list(name: &str, allowed: &[&str]) -> Parameter {
        let mut p = Parameter::new(name, ParameterType::List);
        p.values = Some(allowed.iter().map(ToString::to_string).collect());
        p
    }

    fn values(pairs: &[(&str, Value)]) -> ParameterValues {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_seeding_uses_type_defaults_and_does_not_send() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        let mut env = Parameter::new("env", ParameterType::Text);
        env.required = true;
        let mut count = Parameter::new("count", ParameterType::Int);
        count.default = Some(json!(3));
        let mut flag = Parameter::new("verbose", ParameterType::Text);
        flag.without_value = true;
        store.apply(replaced(vec![
            env,
            count,
            flag,
            Parameter::new("tags", ParameterType::Multiselect),
            Parameter::new("upload", ParameterType::FileUpload),
        ]));

        assert_eq!(store.value("env"), Some(&json!("")));
        assert_eq!(store.value("count"), Some(&json!(3)));
        assert_eq!(store.value("verbose"), Some(&json!(false)));
        assert_eq!(store.value("tags"), Some(&json!([])));
        assert_eq!(store.value("upload"), Some(&Value::Null));
        assert_eq!(store.error("env"), Some("This field is required"));
        assert!(!store.is_valid());
        assert!(store.sink().sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_replacement_drops_missing_and_keeps_edits() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        store.apply(replaced(vec![
            Parameter::new("a", ParameterType::Text),
            Parameter::new("b", ParameterType::Text),
        ]));
        store.set_value("a", json!("edited"));

        store.apply(replaced(vec![
            Parameter::new("a", ParameterType::Text),
            Parameter::new("c", ParameterType::Text),
        ]));
        assert_eq!(store.value("a"), Some(&json!("edited")));
        assert_eq!(store.value("b"), None);
        assert_eq!(store.value("c"), Some(&json!("")));
    }

    #[test]
    fn test_untouched_default_follows_new_default() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        let mut region = Parameter::new("region", ParameterType::Text);
        region.default = Some(json!("eu"));
        store.apply(replaced(vec![region.clone()]));

        region.default = Some(json!("us"));
        store.apply(replaced(vec![region.clone()]));
        assert_eq!(store.value("region"), Some(&json!("us")));

        store.set_value("region", json!("ap"));
        region.default = Some(json!("sa"));
        store.apply(replaced(vec![region]));
        assert_eq!(store.value("region"), Some(&json!("ap")));
    }

    #[test]
    fn test_invalid_edit_is_forwarded_as_null() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        let mut count = Parameter::new("count", ParameterType::Int);
        count.max = Some(10.0);
        store.apply(replaced(vec![count]));

        store.set_value("count", json!("11"));
        store.set_value("count", json!("7"));

        assert_eq!(
            *store.sink().sent.lock().unwrap(),
            vec![
                ("count".to_string(), Value::Null),
                ("count".to_string(), json!("7")),
            ]
        );
        assert_eq!(store.value("count"), Some(&json!("7")));
        assert_eq!(store.error("count"), None);
    }

    #[test]
    fn test_reloaded_values_are_forced() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        store.apply(replaced(vec![list("env", &["dev", "prod"])]));

        let model_id = store.reload(values(&[("env", json!("legacy"))]));
        assert_eq!(model_id.as_deref(), Some("model-1"));

        store.apply(SchemaChange {
            parameters: vec![list("env", &["dev", "prod"])],
            replaced: true,
            reloaded_values: Some(values(&[("env", json!("legacy"))])),
        });
        assert!(store.is_forced("env"));
        assert_eq!(store.error("env"), None);

        // Same allowed values: forcing survives.
        store.apply(replaced(vec![list("env", &["dev", "prod"])]));
        assert!(store.is_forced("env"));

        // Allowed values changed: forcing is revoked and the value fails.
        store.apply(replaced(vec![list("env", &["dev", "prod", "qa"])]));
        assert!(!store.is_forced("env"));
        assert_eq!(store.error("env"), Some("Value is not allowed"));
    }

    #[test]
    fn test_local_edit_revokes_forcing() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        store.apply(SchemaChange {
            parameters: vec![list("env", &["dev"])],
            replaced: true,
            reloaded_values: Some(values(&[("env", json!("legacy"))])),
        });
        assert!(store.is_forced("env"));

        store.set_value("env", json!("other"));
        assert!(!store.is_forced("env"));
        assert_eq!(store.sink().sent.lock().unwrap()[0].1, Value::Null);
    }

    #[test]
    fn test_reload_skipped_when_unchanged() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        store.apply(replaced(vec![Parameter::new("env", ParameterType::Text)]));
        assert_eq!(store.reload(values(&[("env", json!(""))])), None);
        assert!(store.sink().reloads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_form_values_drop_nulls() {
        let mut store = ParameterValueStore::new(RecordingSink::default());
        store.apply(replaced(vec![
            Parameter::new("env", ParameterType::Text),
            Parameter::new("upload", ParameterType::FileUpload),
        ]));
        store.set_value("env", json!("prod"));
        assert_eq!(store.form_values(), values(&[("env", json!("prod"))]));
        assert!(store.is_valid());
    }
}
