//! Run log: persisted JSON timeline of what one command did.
//!
//! Each run produces a single `{data_dir}/runs/{command}/{run_id}.json` file
//! containing an ordered list of timestamped events and the final counters.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hotpulse_core::HotpulseResult;
use serde::Serialize;
use tracing::info;

// ---------------------------------------------------------------------------
// RunLog
// ---------------------------------------------------------------------------

pub struct RunLog {
    pub run_id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Debug, Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RecordsLoaded {
        path: String,
        records: usize,
    },
    Deduplicated {
        input: usize,
        kept: usize,
        dropped: usize,
    },
    BatchWritten {
        path: String,
        lines: usize,
    },
    DecodeFailed {
        line_no: usize,
        error: String,
    },
    ExtractionMiss {
        line_no: usize,
        custom_id: String,
    },
    UnknownId {
        line_no: usize,
        custom_id: String,
    },
    MissingResult {
        id: String,
    },
    LabelCall {
        id: String,
        success: bool,
    },
    GroupAnalyzed {
        keyword: String,
        posts: usize,
        source_chars: usize,
        success: bool,
    },
    ReduceFinished {
        groups: usize,
        success: bool,
    },
    PhaseChanged {
        phase: String,
    },
    FileWritten {
        path: String,
    },
}

impl RunLog {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events of the run so far, in order.
    pub fn kinds(&self) -> impl Iterator<Item = &EventKind> {
        self.events.iter().map(|e| &e.kind)
    }

    /// Serialize the run log to JSON and write it under `data_dir`.
    /// Returns the file path on success.
    pub fn save<S: Serialize>(&self, data_dir: &Path, stats: &S) -> HotpulseResult<PathBuf> {
        let dir = data_dir.join("runs").join(&self.command);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", self.run_id));
        let output = SerializedRunLog {
            run_id: &self.run_id,
            command: &self.command,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats,
            events: &self.events,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(path = %path.display(), events = self.events.len(), "Run log saved");

        Ok(path)
    }
}

#[derive(Serialize)]
struct SerializedRunLog<'a, S: Serialize> {
    run_id: &'a str,
    command: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: &'a S,
    events: &'a [RunEvent],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_ordered_events_with_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new("reconcile");
        log.log(EventKind::DecodeFailed {
            line_no: 2,
            error: "EOF".to_string(),
        });
        log.log(EventKind::FileWritten {
            path: "labels.csv".to_string(),
        });

        let path = log
            .save(dir.path(), &serde_json::json!({ "decode_failures": 1 }))
            .unwrap();
        assert!(path.starts_with(dir.path().join("runs/reconcile")));

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["command"], "reconcile");
        assert_eq!(saved["stats"]["decode_failures"], 1);
        assert_eq!(saved["events"][0]["type"], "decode_failed");
        assert_eq!(saved["events"][0]["line_no"], 2);
        assert_eq!(saved["events"][1]["seq"], 1);
    }
}
