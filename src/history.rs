//! Index of finished conversions, keyed by source file name.
//!
//! A batch builds one [`HistoryIndex`] from the API key's history before any
//! file is started and shares it read-only between workers. A source whose
//! name matches a finished job is downloaded from that job's output URL
//! instead of being converted again.
//!
//! ## Keys
//!
//! Every finished job is registered under two keys derived from the name of
//! the file that was uploaded:
//!
//! * its lowercased base name (`"report a.docx"`)
//! * the same with spaces replaced by the path separator (`"report/a.docx"`)
//!
//! A lookup tries the candidate's lowercased base name first, then accepts any
//! key that is a suffix of the candidate's lowercased full path. When several
//! keys match as suffixes, which one wins is unspecified.

use crate::api::ConversionApi;
use crate::error::CloudConvertError;
use crate::model::{HistoryEntry, Step};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, MAIN_SEPARATOR};
use tracing::{debug, info, warn};

/// Lookup from source file name to the output URL of a finished conversion.
#[derive(Debug, Clone, Default)]
pub struct HistoryIndex {
    outputs: HashMap<String, String>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the full history and the status of every finished job.
    ///
    /// At most `concurrency` status requests are in flight at once. Jobs whose
    /// status cannot be fetched are skipped.
    pub async fn load(
        api: &dyn ConversionApi,
        concurrency: usize,
    ) -> Result<Self, CloudConvertError> {
        let entries = api.history().await?;
        let listed = entries.len();
        let finished: Vec<HistoryEntry> = entries
            .into_iter()
            .filter(|e| e.step == Step::Finished && !e.url.is_empty())
            .collect();
        debug!("History lists {} jobs, {} finished", listed, finished.len());

        let resolved: Vec<HistoryEntry> = stream::iter(finished)
            .map(|mut entry| async move {
                match api.status(&entry.url).await {
                    Ok(status) => {
                        entry.status = Some(status);
                        Some(entry)
                    }
                    Err(e) => {
                        warn!("Skipping history entry {}: {}", entry.url, e);
                        None
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|e| async move { e })
            .collect()
            .await;

        let index = Self::from_entries(&resolved);
        info!("History index holds {} keys", index.len());
        Ok(index)
    }

    /// Index the entries that are finished and carry a complete status.
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        let mut index = Self::new();
        for entry in entries.iter().filter(|e| e.step == Step::Finished) {
            let Some(status) = &entry.status else {
                continue;
            };
            if status.output.url.is_empty()
                || status.output.file_name.is_empty()
                || status.input.file_name.is_empty()
            {
                continue;
            }
            index.insert(&status.input.file_name, &status.output.url);
        }
        index
    }

    /// Register `output_url` as the result of converting `input_file_name`.
    pub fn insert(&mut self, input_file_name: &str, output_url: &str) {
        let base = Path::new(input_file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| input_file_name.to_lowercase());
        let separated = base.replace(' ', &MAIN_SEPARATOR.to_string());
        self.outputs.insert(separated, output_url.to_string());
        self.outputs.insert(base, output_url.to_string());
    }

    /// Output URL of a finished conversion of `source`, if any.
    ///
    /// An exact base-name match wins. Otherwise any registered name that ends
    /// the full path matches, so `a.png` also matches `/tmp/ba.png`.
    pub fn lookup(&self, source: &Path) -> Option<&str> {
        if let Some(base) = source.file_name() {
            if let Some(url) = self.outputs.get(&base.to_string_lossy().to_lowercase()) {
                return Some(url.as_str());
            }
        }
        let full = source.to_string_lossy().to_lowercase();
        self.outputs
            .iter()
            .find(|(key, _)| full.ends_with(key.as_str()))
            .map(|(_, url)| url.as_str())
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::model::StatusResponse;
    use std::path::PathBuf;

    fn finished_status(input: &str, output: &str, url: &str) -> StatusResponse {
        let mut s = FakeApi::finished(url);
        s.input.file_name = input.to_string();
        s.output.file_name = output.to_string();
        s
    }

    fn entry(url: &str, step: Step, status: Option<StatusResponse>) -> HistoryEntry {
        HistoryEntry {
            url: url.to_string(),
            step,
            status,
            ..Default::default()
        }
    }

    #[test]
    fn finds_by_lowercased_base_name() {
        let index = HistoryIndex::from_entries(&[entry(
            "https://h/process/1",
            Step::Finished,
            Some(finished_status("Report A.docx", "Report A.pdf", "https://dl/1")),
        )]);
        let nested = index.lookup(Path::new("/tmp/report a.docx"));
        assert_eq!(nested, Some("https://dl/1"));
        let upper = index.lookup(Path::new("REPORT A.DOCX"));
        assert_eq!(upper, Some("https://dl/1"));
        assert_eq!(index.lookup(Path::new("report b.docx")), None);
    }

    #[test]
    fn finds_by_separator_variant() {
        let index = HistoryIndex::from_entries(&[entry(
            "https://h/process/1",
            Step::Finished,
            Some(finished_status("Report A.docx", "Report A.pdf", "https://dl/1")),
        )]);
        let nested: PathBuf = ["home", "me", "Report", "A.docx"].iter().collect();
        assert_eq!(index.lookup(&nested), Some("https://dl/1"));
    }

    #[test]
    fn registered_name_matches_as_path_suffix() {
        let index = HistoryIndex::from_entries(&[entry(
            "https://h/process/1",
            Step::Finished,
            Some(finished_status("a.png", "a.webp", "https://dl/a")),
        )]);
        let longer = index.lookup(Path::new("/tmp/ba.png"));
        assert_eq!(longer, Some("https://dl/a"));
        assert_eq!(index.lookup(Path::new("/tmp/a.png.bak")), None);
    }

    #[test]
    fn incomplete_entries_are_not_indexed() {
        let no_output_name = finished_status("a.png", "", "https://dl/2");
        let no_url = finished_status("b.png", "b.webp", "");
        let no_input = finished_status("", "c.webp", "https://dl/3");
        let index = HistoryIndex::from_entries(&[
            entry("https://h/process/2", Step::Finished, Some(no_output_name)),
            entry("https://h/process/3", Step::Finished, Some(no_url)),
            entry("https://h/process/4", Step::Finished, Some(no_input)),
            entry("https://h/process/5", Step::Finished, None),
            entry(
                "https://h/process/6",
                Step::Convert,
                Some(finished_status("d.png", "d.webp", "https://dl/6")),
            ),
        ]);
        assert!(index.is_empty());
        assert_eq!(index.lookup(Path::new("a.png")), None);
        assert_eq!(index.lookup(Path::new("d.png")), None);
    }

    #[tokio::test]
    async fn load_fetches_status_of_finished_jobs_only() {
        let api = FakeApi::new().with_history(
            vec![
                entry("https://h/process/1", Step::Finished, None),
                entry("https://h/process/2", Step::Error, None),
            ],
            vec![(
                "https://h/process/1".to_string(),
                finished_status("photo.png", "photo.webp", "https://dl/photo.webp"),
            )],
        );
        let index = HistoryIndex::load(&api, 4).await.unwrap();
        assert_eq!(api.status_calls(), 1);
        let hit = index.lookup(Path::new("photo.png"));
        assert_eq!(hit, Some("https://dl/photo.webp"));
    }

    #[tokio::test]
    async fn load_skips_unreachable_status() {
        let listed = vec![entry("https://h/process/9", Step::Finished, None)];
        let api = FakeApi::new()
            .with_history(listed, vec![])
            .with_statuses(vec![Err("HTTP 500".into())]);
        let index = HistoryIndex::load(&api, 2).await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn load_propagates_history_failure() {
        let api = FakeApi::new().failing_history("HTTP 401");
        assert!(HistoryIndex::load(&api, 2).await.is_err());
    }
}
