//! Durable run journal
//!
//! One JSON snapshot per stage transition, named
//! `<run-id>-<seq>.json` so lexical order is transition order.
//! Snapshots are written atomically; the newest one is sufficient to
//! reconstruct and resume the run.

use std::fs;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tracing::debug;

use convoke_utils::atomic_write::write_file_atomic;
use convoke_utils::types::RunId;

use crate::record::RunRecord;

pub struct Journal {
    dir: Utf8PathBuf,
}

impl Journal {
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist the record's current state.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the atomic write fails.
    pub fn snapshot(&self, record: &RunRecord) -> Result<Utf8PathBuf> {
        let filename = format!("{}-{:06}.json", record.run_id, record.seq);
        let path = self.dir.join(&filename);
        let json = serde_json::to_string_pretty(record)
            .with_context(|| format!("Failed to serialize run record {}", record.run_id))?;
        write_file_atomic(&path, &json)?;
        debug!(run = %record.run_id, seq = record.seq, stage = %record.stage, "Snapshot written");
        Ok(path)
    }

    /// Load the newest snapshot for a run, if any exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or the newest
    /// snapshot cannot be read or parsed.
    pub fn load_latest(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        if !self.dir.as_std_path().exists() {
            return Ok(None);
        }

        let prefix = format!("{run_id}-");
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(self.dir.as_std_path())? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str()
                && name.starts_with(&prefix)
                && name.ends_with(".json")
            {
                snapshots.push(entry.path());
            }
        }

        if snapshots.is_empty() {
            return Ok(None);
        }

        // Sequence numbers are zero-padded, so lexical max is newest.
        snapshots.sort();
        let latest = snapshots.last().expect("non-empty snapshot list");

        let content = fs::read_to_string(latest)
            .with_context(|| format!("Failed to read snapshot: {latest:?}"))?;
        let record: RunRecord = serde_json::from_str(&content)
            .with_context(|| format!("Failed to deserialize snapshot: {latest:?}"))?;
        Ok(Some(record))
    }

    /// Directory the journal writes into.
    #[must_use]
    pub fn dir(&self) -> &Utf8PathBuf {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoke_utils::types::Stage;

    use crate::scenario::Scenario;

    fn journal() -> (Journal, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("runs")).unwrap();
        (Journal::new(path), dir)
    }

    #[test]
    fn missing_dir_loads_nothing() {
        let (journal, _guard) = journal();
        let absent = journal
            .load_latest(&RunId::from_string("run-x-20260101T000000Z"))
            .unwrap();
        assert!(absent.is_none());
    }

    #[test]
    fn latest_snapshot_wins() {
        let (journal, _guard) = journal();
        let mut record = RunRecord::new(Scenario::new("s", "notes"));

        journal.snapshot(&record).unwrap();
        record.advance_to(Stage::TaskDerivation, "plan accepted");
        journal.snapshot(&record).unwrap();
        record.advance_to(Stage::Drafting, "tasks submitted");
        journal.snapshot(&record).unwrap();

        let loaded = journal.load_latest(&record.run_id).unwrap().unwrap();
        assert_eq!(loaded.seq, 2);
        assert_eq!(loaded.stage, Stage::Drafting);
        assert_eq!(loaded, record);
    }

    #[test]
    fn runs_do_not_cross_contaminate() {
        let (journal, _guard) = journal();
        let record_a = RunRecord::new(Scenario::new("alpha", "n"));
        let record_b = RunRecord::new(Scenario::new("beta", "n"));
        journal.snapshot(&record_a).unwrap();
        journal.snapshot(&record_b).unwrap();

        let loaded = journal.load_latest(&record_a.run_id).unwrap().unwrap();
        assert_eq!(loaded.scenario.id, "alpha");
    }
}
