// ABOUTME: Append-only log of sandbox command records with JSON persistence
// ABOUTME: Insertion order is execution order and is what recipe synthesis replays

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::record::{CommandRecord, CommandStatus};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to access trace file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse trace file: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;

/// Ordered log of every command a sandbox session executed.
///
/// Records are only ever appended; a record's status and duration are
/// finalized in place as the command progresses, but nothing is removed or
/// reordered. The serialized form is a JSON array and is the sole input to
/// recipe synthesis, so it has to survive process restarts unchanged.
#[derive(Debug, Default, Clone)]
pub struct TraceLog {
    records: Vec<CommandRecord>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its index for later finalization.
    pub fn append(&mut self, record: CommandRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    /// Mark a record as submitted to the shell.
    pub fn mark_dispatched(&mut self, index: usize) {
        match self.records.get_mut(index) {
            Some(record) => record.status = CommandStatus::Dispatched,
            None => warn!(index, "mark_dispatched on missing trace record"),
        }
    }

    /// Finalize a record with its observed status and elapsed time.
    pub fn finish(&mut self, index: usize, status: CommandStatus, duration_secs: f64) {
        match self.records.get_mut(index) {
            Some(record) => {
                record.status = status;
                record.duration_secs = duration_secs;
            }
            None => warn!(index, "finish on missing trace record"),
        }
    }

    /// Attach an error annotation (timeout text, rollback note) to a record.
    pub fn annotate(&mut self, index: usize, annotation: impl Into<String>) {
        match self.records.get_mut(index) {
            Some(record) => record.annotation = Some(annotation.into()),
            None => warn!(index, "annotate on missing trace record"),
        }
    }

    pub fn records(&self) -> &[CommandRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommandRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the log as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.records)?;
        Ok(())
    }

    /// Load a previously saved log.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let records = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self { records })
    }
}

impl<'a> IntoIterator for &'a TraceLog {
    type Item = &'a CommandRecord;
    type IntoIter = std::slice::Iter<'a, CommandRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use pretty_assertions::assert_eq;

    fn shell(command: &str) -> CommandRecord {
        CommandRecord::new(command, "/repo", RecordKind::Shell, true)
    }

    #[test]
    fn append_preserves_insertion_order() {
        let mut log = TraceLog::new();
        log.append(shell("mkdir build"));
        log.append(shell("cmake .."));
        log.append(shell("make"));

        let commands: Vec<&str> = log.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["mkdir build", "cmake ..", "make"]);
    }

    #[test]
    fn finish_updates_status_and_duration() {
        let mut log = TraceLog::new();
        let idx = log.append(shell("make"));
        log.mark_dispatched(idx);
        assert_eq!(log.records()[idx].status, CommandStatus::Dispatched);

        log.finish(idx, CommandStatus::Exited(2), 12.5);
        assert_eq!(log.records()[idx].status, CommandStatus::Exited(2));
        assert_eq!(log.records()[idx].duration_secs, 12.5);
    }

    #[test]
    fn finish_out_of_range_is_ignored() {
        let mut log = TraceLog::new();
        log.finish(7, CommandStatus::Exited(0), 1.0);
        assert!(log.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut log = TraceLog::new();
        let idx = log.append(shell("apt-get update"));
        log.finish(idx, CommandStatus::Exited(0), 3.2);
        log.annotate(idx, "snapshot taken");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inner_commands.json");
        log.save(&path).unwrap();

        let loaded = TraceLog::load(&path).unwrap();
        assert_eq!(loaded.records(), log.records());
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(TraceLog::load(&path), Err(TraceError::Parse(_))));
    }
}
