//! Wire protocol for execution and configuration streams.
//!
//! Every frame is one JSON envelope `{event, data, clientStateVersion?}`,
//! except execution input replies which are sent as raw text.

use remote_scripts_core::{DownloadableFile, Parameter, ParameterValues, ScriptConfig, SessionError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Inbound envelope before event-specific decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub client_state_version: Option<u64>,
    #[serde(default)]
    pub server_state_version: Option<u64>,
}

impl RawEnvelope {
    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON envelope.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Decode `{event, data}` into an adjacently tagged event enum.
    fn decode<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "event": self.event,
            "data": self.data,
        }))
    }
}

/// Inline image announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub output_path: String,
    pub download_url: String,
}

/// Event pushed on an execution stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum StreamEvent {
    Output(String),
    Input(String),
    File(DownloadableFile),
    InlineImage(InlineImage),
}

impl StreamEvent {
    pub const NAMES: [&'static str; 4] = ["output", "input", "file", "inline-image"];
}

/// Result of decoding one execution stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Event(StreamEvent),
    /// Not a well-formed event; shown as plain output.
    Text(String),
    /// Well-formed envelope with an event this client does not handle.
    Ignored(String),
}

impl StreamFrame {
    /// Decode a frame, falling back to raw text for anything malformed.
    #[must_use]
    pub fn decode(frame: String) -> Self {
        let Ok(raw) = RawEnvelope::parse(&frame) else {
            return Self::Text(frame);
        };
        if !StreamEvent::NAMES.contains(&raw.event.as_str()) {
            return Self::Ignored(raw.event);
        }
        match raw.decode() {
            Ok(event) => Self::Event(event),
            Err(e) => {
                tracing::debug!("Undecodable stream event, treating as text: {e}");
                Self::Text(frame)
            }
        }
    }
}

/// Payload of `parameterRemoved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedParameter {
    pub parameter_name: String,
}

/// Event pushed on a configuration stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ConfigEvent {
    InitialConfig(ScriptConfig),
    ReloadedConfig(ScriptConfig),
    ParameterChanged(Parameter),
    ParameterAdded(Parameter),
    ParameterRemoved(RemovedParameter),
    ClientStateVersionAccepted(Value),
    PreloadScript(Value),
}

/// Decoded configuration envelope.
///
/// The versions are read even when the event itself cannot be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEnvelope {
    pub event: Result<ConfigEvent, SessionError>,
    pub client_state_version: Option<u64>,
    pub server_state_version: Option<u64>,
}

impl ConfigEnvelope {
    /// Decode a configuration frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON envelope. An unknown or
    /// malformed event is reported in `event` instead.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        let raw = RawEnvelope::parse(frame)?;
        let client_state_version = raw.client_state_version;
        let server_state_version = raw.server_state_version;
        Ok(Self {
            event: raw.decode().map_err(SessionError::from),
            client_state_version,
            server_state_version,
        })
    }
}

/// Mutation sent on a configuration stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ConfigRequest {
    #[serde(rename_all = "camelCase")]
    ParameterValue {
        parameter: String,
        value: Value,
        client_state_version: u64,
    },
    #[serde(rename_all = "camelCase")]
    ReloadModelValues {
        parameter_values: ParameterValues,
        client_model_id: String,
        client_state_version: u64,
    },
}

impl ConfigRequest {
    /// Version stamped on this request.
    #[must_use]
    pub const fn client_state_version(&self) -> u64 {
        match self {
            Self::ParameterValue {
                client_state_version,
                ..
            }
            | Self::ReloadModelValues {
                client_state_version,
                ..
            } => *client_state_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_stream_output_event() {
        let frame = json!({"event": "output", "data": "line1"}).to_string();
        assert_eq!(
            StreamFrame::decode(frame),
            StreamFrame::Event(StreamEvent::Output("line1".into()))
        );
    }

    #[test]
    fn test_stream_inline_image_event() {
        let frame = json!({
            "event": "inline-image",
            "data": {"output_path": "/tmp/plot.png", "download_url": "result_files/plot.png"}
        })
        .to_string();
        assert_matches!(
            StreamFrame::decode(frame),
            StreamFrame::Event(StreamEvent::InlineImage(img)) if img.output_path == "/tmp/plot.png"
        );
    }

    #[test]
    fn test_stream_fallbacks() {
        assert_eq!(
            StreamFrame::decode("plain text".into()),
            StreamFrame::Text("plain text".into())
        );

        let bad_data = json!({"event": "file", "data": 3}).to_string();
        assert_eq!(StreamFrame::decode(bad_data.clone()), StreamFrame::Text(bad_data));

        let unknown = json!({"event": "progress", "data": 50}).to_string();
        assert_eq!(StreamFrame::decode(unknown), StreamFrame::Ignored("progress".into()));
    }

    #[test]
    fn test_config_envelope_versions() {
        let frame = json!({
            "event": "parameterRemoved",
            "data": {"parameterName": "env"},
            "clientStateVersion": 4,
            "serverStateVersion": 9
        })
        .to_string();
        let envelope = ConfigEnvelope::decode(&frame).unwrap();
        assert_eq!(envelope.client_state_version, Some(4));
        assert_eq!(envelope.server_state_version, Some(9));
        assert_matches!(envelope.event, Ok(ConfigEvent::ParameterRemoved(r)) if r.parameter_name == "env");
    }

    #[test]
    fn test_config_envelope_without_data() {
        let frame = json!({"event": "clientStateVersionAccepted"}).to_string();
        let envelope = ConfigEnvelope::decode(&frame).unwrap();
        assert_eq!(envelope.event, Ok(ConfigEvent::ClientStateVersionAccepted(Value::Null)));
    }

    #[test]
    fn test_config_envelope_keeps_versions_of_unknown_event() {
        let frame = json!({"event": "somethingElse", "data": {}, "serverStateVersion": 5}).to_string();
        let envelope = ConfigEnvelope::decode(&frame).unwrap();
        assert_eq!(envelope.server_state_version, Some(5));
        assert_matches!(envelope.event, Err(SessionError::ProtocolDecode(_)));
        assert!(ConfigEnvelope::decode("not json").is_err());
    }

    #[test]
    fn test_parameter_value_wire_format() {
        let request = ConfigRequest::ParameterValue {
            parameter: "env".into(),
            value: json!("prod"),
            client_state_version: 1,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "event": "parameterValue",
                "data": {"parameter": "env", "value": "prod", "clientStateVersion": 1}
            })
        );
    }

    #[test]
    fn test_reload_model_wire_format() {
        let mut values = ParameterValues::new();
        values.insert("env".into(), json!("staging"));
        let request = ConfigRequest::ReloadModelValues {
            parameter_values: values,
            client_model_id: "m-1".into(),
            client_state_version: 3,
        };
        assert_eq!(request.client_state_version(), 3);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "event": "reloadModelValues",
                "data": {
                    "parameterValues": {"env": "staging"},
                    "clientModelId": "m-1",
                    "clientStateVersion": 3
                }
            })
        );
    }
}
