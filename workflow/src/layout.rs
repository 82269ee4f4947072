use crate::protocol::ExecutionId;
use anyhow::Context;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

/// On-disk layout for transcripts of watched executions.
#[derive(Debug, Clone)]
pub struct TranscriptLayout {
    root: PathBuf,
}

impl TranscriptLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn execution_dir(&self, execution_id: &ExecutionId) -> PathBuf {
        self.root
            .join(format!("execution-{}", sanitize(execution_id.as_str())))
    }

    pub fn ensure_execution_dir(&self, execution_id: &ExecutionId) -> anyhow::Result<PathBuf> {
        let dir = self.execution_dir(execution_id);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }

    pub fn record_path(&self, execution_id: &ExecutionId) -> PathBuf {
        self.execution_dir(execution_id).join("record.json")
    }

    pub fn progress_log_path(&self, execution_id: &ExecutionId) -> PathBuf {
        self.execution_dir(execution_id).join("progress.log")
    }
}

/// Keeps ASCII alphanumerics, `-` and `_`; every other byte becomes `%XX`.
/// Distinct ids always map to distinct directory names.
fn sanitize(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(char::from(byte)),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
