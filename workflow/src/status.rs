use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use std::fmt;

/// Lifecycle status of one workflow execution as reported by the backend.
///
/// Parsing never fails: a value outside the known vocabulary becomes
/// [`ExecutionStatus::Other`], which is always non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Done,
    Error,
    /// Older backends report success as `COMPLETED`.
    Completed,
    Other(String),
}

impl ExecutionStatus {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "PENDING" => Self::Pending,
            // The processing pipeline reports intermediate steps as PROCESSING.
            "IN_PROGRESS" | "PROCESSING" => Self::InProgress,
            "DONE" => Self::Done,
            "ERROR" => Self::Error,
            "COMPLETED" => Self::Completed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Completed => "COMPLETED",
            Self::Other(value) => value,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done | Self::Completed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for ExecutionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ExecutionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

const AGENT_MESSAGE_OPEN: &str = "<AI_MESSAGE>";
const AGENT_MESSAGE_CLOSE: &str = "</AI_MESSAGE>";

/// One progress line, kept exactly as the backend sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(String);

impl LogEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    /// Inner text when the line is a message written by the AI agent
    /// rather than a pipeline step.
    pub fn agent_message(&self) -> Option<&str> {
        self.0
            .strip_prefix(AGENT_MESSAGE_OPEN)
            .and_then(|rest| rest.strip_suffix(AGENT_MESSAGE_CLOSE))
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
