//! JSON export of finished runs.
//!
//! Writes history entries to a file so results can be diffed across seeds or
//! fed to external tooling.

use netharness_core::history::HistoryEntry;
use netharness_core::records::RunStatus;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// Totals across every exported entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub runs: usize,
    pub completed: usize,
    pub stopped: usize,
    pub failed: usize,
    pub transactions: u64,
    pub errors: u64,
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunExport {
    /// What was exported (a run id, a topology, "history")
    pub label: String,

    /// Harness seed the runs were derived from
    pub seed: u64,

    pub exported_at_ms: u64,

    pub entries: Vec<HistoryEntry>,

    pub summary: ExportSummary,
}

impl RunExport {
    pub fn new(label: &str, seed: u64, exported_at_ms: u64) -> Self {
        Self {
            label: label.to_string(),
            seed,
            exported_at_ms,
            entries: Vec::new(),
            summary: ExportSummary::default(),
        }
    }

    /// Adds an entry and folds it into the summary.
    pub fn add_entry(&mut self, entry: HistoryEntry) {
        let (status, transactions, errors) = match &entry {
            HistoryEntry::Test(run) => (run.status, run.results.emitted, run.results.dropped),
            HistoryEntry::Generation(generation) => {
                (generation.status, generation.total_transactions, generation.total_errors)
            }
        };

        self.summary.runs += 1;
        match status {
            RunStatus::Completed => self.summary.completed += 1,
            RunStatus::Stopped => self.summary.stopped += 1,
            RunStatus::Failed => self.summary.failed += 1,
            _ => {}
        }
        self.summary.transactions += transactions;
        self.summary.errors += errors;
        self.entries.push(entry);
    }

    /// True when nothing failed.
    pub fn passed(&self) -> bool {
        self.summary.failed == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
