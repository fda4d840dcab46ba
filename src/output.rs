//! Result types returned by conversions and batches.

use crate::error::FileError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a successful conversion produced its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// Converted remotely and written to the destination.
    Converted { bytes: u64 },
    /// Found in the conversion history and downloaded without converting again.
    Reused { bytes: u64 },
    /// Delivered to a remote output target; nothing was written locally.
    Delivered { target: String },
}

impl ConversionOutcome {
    /// Bytes written to the local destination.
    pub fn bytes(&self) -> u64 {
        match self {
            ConversionOutcome::Converted { bytes } | ConversionOutcome::Reused { bytes } => *bytes,
            ConversionOutcome::Delivered { .. } => 0,
        }
    }
}

/// Result of one file of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Set on success.
    pub outcome: Option<ConversionOutcome>,
    /// Set on failure.
    pub error: Option<FileError>,
    /// Wall-clock time from permit acquisition to the terminal outcome.
    pub duration_ms: u64,
}

impl FileResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate counters for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_files: usize,
    pub converted: usize,
    /// Served from the conversion history.
    pub reused: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Sum over all successful local writes.
    pub total_bytes: u64,
    pub total_duration_ms: u64,
}

impl BatchStats {
    pub fn succeeded(&self) -> usize {
        self.converted + self.reused + self.delivered
    }
}

/// Everything a batch produced, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<FileResult>,
    pub stats: BatchStats,
}

impl BatchReport {
    /// Build the report and its counters from per-file results.
    pub fn from_results(results: Vec<FileResult>, total_duration_ms: u64) -> Self {
        let mut stats = BatchStats {
            total_files: results.len(),
            total_duration_ms,
            ..Default::default()
        };
        for r in &results {
            match &r.outcome {
                Some(o @ ConversionOutcome::Converted { .. }) => {
                    stats.converted += 1;
                    stats.total_bytes += o.bytes();
                }
                Some(o @ ConversionOutcome::Reused { .. }) => {
                    stats.reused += 1;
                    stats.total_bytes += o.bytes();
                }
                Some(ConversionOutcome::Delivered { .. }) => stats.delivered += 1,
                None => stats.failed += 1,
            }
        }
        Self { results, stats }
    }

    pub fn all_succeeded(&self) -> bool {
        self.stats.failed == 0
    }

    /// Errors of failed files, in input order.
    pub fn errors(&self) -> impl Iterator<Item = &FileError> {
        self.results.iter().filter_map(|r| r.error.as_ref())
    }
}
