use crate::protocol::ExecutionId;
use crate::status::ExecutionStatus;
use crate::status::LogEntry;
use anyhow::Context;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

/// Saved transcript of one watched execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub note: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            workflow_name: None,
            status: None,
            logs: Vec::new(),
            note: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    pub fn set_status(&mut self, status: ExecutionStatus) {
        if status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self.status = Some(status);
    }

    pub fn mark_interrupted(&mut self, note: impl Into<String>) {
        self.note = Some(note.into());
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read execution record {}", path.display()))?;
        let record: ExecutionRecord =
            serde_json::from_str(&data).context("parse execution record json")?;
        Ok(record)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp_path = tmp_path(path);
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp_path, data)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        Ok(())
    }

    /// Plain-text transcript, one log line per line.
    pub fn write_progress_log(&self, path: &Path) -> anyhow::Result<()> {
        let mut file = fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writeln!(file, "# Execution {}", self.execution_id)?;
        if let Some(name) = &self.workflow_name {
            writeln!(file, "# Workflow: {name}")?;
        }
        writeln!(file, "# Started: {}", self.started_at.to_rfc3339())?;
        writeln!(file)?;
        for entry in &self.logs {
            writeln!(file, "{entry}")?;
        }
        writeln!(file)?;
        match &self.status {
            Some(status) => writeln!(file, "# Status: {status}")?,
            None => writeln!(file, "# Status: unknown")?,
        }
        if let Some(note) = &self.note {
            writeln!(file, "# Note: {note}")?;
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let mut file_name = path
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    file_name.push(".tmp");
    tmp.set_file_name(file_name);
    tmp
}
