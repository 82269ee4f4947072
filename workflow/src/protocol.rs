use crate::status::ExecutionStatus;
use crate::status::LogEntry;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Opaque identifier of one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Event names spoken on the realtime connection.
///
/// The backend grew a workflow vocabulary on top of the older case
/// vocabulary; both rooms may be served by the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelVocabulary {
    #[default]
    Current,
    Legacy,
}

impl ChannelVocabulary {
    pub fn join_event(self) -> &'static str {
        match self {
            Self::Current => "join_workflow",
            Self::Legacy => "join_case",
        }
    }

    pub fn update_event(self) -> &'static str {
        match self {
            Self::Current => "workflow_update",
            Self::Legacy => "case_update",
        }
    }

    fn id_key(self) -> &'static str {
        match self {
            Self::Current => "workflow_id",
            Self::Legacy => "case_id",
        }
    }

    pub fn join_payload(self, execution_id: &ExecutionId) -> Value {
        let mut payload = serde_json::Map::new();
        payload.insert(
            self.id_key().to_string(),
            Value::String(execution_id.as_str().to_string()),
        );
        Value::Object(payload)
    }
}

/// Payload of one `workflow_update` / `case_update` event.
///
/// Fields are decoded one by one and a badly typed field never discards the
/// rest of the message: its log line still arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateMessage {
    #[serde(default, deserialize_with = "text_field")]
    pub workflow_execution_id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub workflow_id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub case_id: Option<String>,
    #[serde(default, deserialize_with = "text_field")]
    pub log: Option<String>,
    #[serde(default, deserialize_with = "status_field")]
    pub status: Option<ExecutionStatus>,
    /// Legacy payloads flag failures instead of sending a status.
    #[serde(default, deserialize_with = "flag_field")]
    pub error: bool,
    #[serde(default, deserialize_with = "optional_flag_field")]
    pub assets_ready: Option<bool>,
}

fn text_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

fn status_field<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<ExecutionStatus>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(status) => Some(ExecutionStatus::from_wire(&status)),
        other => Some(ExecutionStatus::Other(other.to_string())),
    })
}

fn flag_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool().unwrap_or(false))
}

fn optional_flag_field<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<bool>, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool())
}

impl UpdateMessage {
    pub fn from_value(payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload)
    }

    /// Execution the message claims to belong to, if it names one.
    pub fn execution_id(&self) -> Option<&str> {
        self.workflow_execution_id
            .as_deref()
            .or(self.workflow_id.as_deref())
            .or(self.case_id.as_deref())
    }

    pub fn is_for(&self, execution_id: &ExecutionId) -> bool {
        self.execution_id()
            .is_none_or(|id| id == execution_id.as_str())
    }

    pub fn log_entry(&self) -> Option<LogEntry> {
        self.log.as_deref().map(LogEntry::new)
    }

    pub fn effective_status(&self) -> Option<ExecutionStatus> {
        match (&self.status, self.error) {
            (Some(status), _) => Some(status.clone()),
            (None, true) => Some(ExecutionStatus::Error),
            (None, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn join_payload_uses_vocabulary_key() {
        let id = ExecutionId::new("exec-1");
        assert_eq!(
            ChannelVocabulary::Current.join_payload(&id),
            json!({ "workflow_id": "exec-1" })
        );
        assert_eq!(
            ChannelVocabulary::Legacy.join_payload(&id),
            json!({ "case_id": "exec-1" })
        );
        assert_eq!(ChannelVocabulary::Legacy.update_event(), "case_update");
    }

    #[test]
    fn decodes_pipeline_update() {
        let message = UpdateMessage::from_value(json!({
            "workflow_execution_id": "exec-1",
            "log": "Se extrajo el texto de **demanda.pdf**.",
            "status": "PROCESSING",
            "assets_ready": false,
        }))
        .expect("decode");
        assert_eq!(message.execution_id(), Some("exec-1"));
        assert_eq!(message.effective_status(), Some(ExecutionStatus::InProgress));
        assert!(message.is_for(&ExecutionId::new("exec-1")));
        assert!(!message.is_for(&ExecutionId::new("exec-2")));
    }

    #[test]
    fn legacy_error_flag_means_error_status() {
        let message = UpdateMessage::from_value(json!({
            "case_id": "c-9",
            "log": "Error generando demanda inicial: boom",
            "error": true,
        }))
        .expect("decode");
        assert_eq!(message.effective_status(), Some(ExecutionStatus::Error));
    }

    #[test]
    fn badly_typed_fields_degrade_instead_of_failing() {
        let message = UpdateMessage::from_value(json!({
            "workflow_execution_id": 42,
            "log": "Leyendo archivos",
            "status": 3,
            "error": null,
            "assets_ready": "yes",
        }))
        .expect("decode");
        assert_eq!(message.execution_id(), Some("42"));
        assert_eq!(message.log.as_deref(), Some("Leyendo archivos"));
        assert_eq!(message.status, Some(ExecutionStatus::Other("3".to_string())));
        assert!(!message.error);
        assert_eq!(message.assets_ready, None);
        assert!(!message.effective_status().is_some_and(|status| status.is_terminal()));
    }

    #[test]
    fn message_without_id_is_accepted_by_any_subscription() {
        let message = UpdateMessage::from_value(json!({ "log": "Leyendo archivos" }))
            .expect("decode");
        assert!(message.is_for(&ExecutionId::new("anything")));
        assert_eq!(message.effective_status(), None);
    }
}
