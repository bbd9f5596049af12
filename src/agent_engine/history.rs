use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent_engine::state::StepRecord;
use crate::errors::PilotResult;

/// Append-only step history of one run, optionally mirrored to a JSONL file.
pub struct RunHistory {
    records: Vec<StepRecord>,
    file_path: Option<PathBuf>,
}

impl RunHistory {
    pub fn in_memory() -> Self {
        Self { records: Vec::new(), file_path: None }
    }

    /// History whose records are also appended to `<dir>/run_<run_id>.jsonl`.
    pub fn with_session_log(dir: &Path, run_id: &str) -> PilotResult<Self> {
        std::fs::create_dir_all(dir)?;
        let file_path = dir.join(format!("run_{run_id}.jsonl"));
        tracing::info!(path = %file_path.display(), "session log enabled");
        Ok(Self { records: Vec::new(), file_path: Some(file_path) })
    }

    /// Appends `record`, stamping its sequence index.
    pub fn push(&mut self, mut record: StepRecord) -> &StepRecord {
        record.index = self.records.len();
        self.records.push(record);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "could not append to session log");
        }
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn session_log_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }

    /// Append the latest record to the JSONL file.
    fn flush(&self) -> PilotResult<()> {
        let (Some(path), Some(last)) = (&self.file_path, self.records.last()) else {
            return Ok(());
        };
        let line = serde_json::to_string(last)?;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %path.display(), index = last.index, "history entry flushed");
        Ok(())
    }
}
