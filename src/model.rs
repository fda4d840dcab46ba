//! Wire types exchanged with the conversion service.
//!
//! Every type here is decoded from a JSON response body. The service is
//! loose about types (the progress percentage arrives as a number or a
//! quoted string, unknown steps appear over time), so fields default when
//! absent and the awkward ones are normalised through accessor methods
//! rather than at decode time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Remote lifecycle stage of a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Step {
    /// Waiting for the input file.
    #[default]
    Input,
    /// Waiting for a worker.
    Wait,
    /// Queued on a worker.
    Queued,
    /// The converter is running.
    Convert,
    /// Uploading the result to the output target.
    Output,
    /// Done; the output URL is available.
    Finished,
    /// Terminal failure; `message` explains why.
    Error,
    /// A step this client does not know about yet.
    Other(String),
}

impl Step {
    /// `true` for `Finished` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Finished | Step::Error)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Step::Input => "input",
            Step::Wait => "wait",
            Step::Queued => "queued",
            Step::Convert => "convert",
            Step::Output => "output",
            Step::Finished => "finished",
            Step::Error => "error",
            Step::Other(s) => s,
        }
    }
}

impl From<String> for Step {
    fn from(s: String) -> Self {
        match s.as_str() {
            "input" => Step::Input,
            "wait" => Step::Wait,
            "queued" => Step::Queued,
            "convert" | "converting" => Step::Convert,
            "output" => Step::Output,
            "finished" => Step::Finished,
            "error" => Step::Error,
            _ => Step::Other(s),
        }
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.as_str().to_string()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the result of a finished job is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DownloadSource {
    /// Already known, e.g. recovered from the conversion history.
    Explicit(String),
    /// Read `output.url` from the latest status snapshot.
    #[default]
    FromStatus,
}

/// One remote conversion job, identified by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Process {
    #[serde(default)]
    pub url: String,
    /// Non-empty when the service refused to create the job.
    #[serde(default)]
    pub error: String,
    #[serde(skip)]
    pub download: DownloadSource,
}

impl Process {
    /// Process ID: the last path segment of the job URL.
    pub fn id(&self) -> &str {
        match self.url.rfind('/') {
            Some(i) => &self.url[i + 1..],
            None => &self.url,
        }
    }

    /// The rejection message, if any.
    pub fn rejection(&self) -> Option<&str> {
        let e = self.error.trim();
        (!e.is_empty()).then_some(e)
    }
}

/// Snapshot of a job's state, fetched fresh on every poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusResponse {
    pub id: String,
    pub url: String,
    /// Either a JSON number or a quoted string; read it through [`Self::percent`].
    #[serde(rename = "percent", skip_serializing_if = "Option::is_none")]
    pub raw_percent: Option<serde_json::Value>,
    pub message: String,
    pub step: Step,
    #[serde(rename = "starttime")]
    pub start_time: i64,
    #[serde(rename = "endtime")]
    pub end_time: i64,
    pub expire: i64,
    pub input: StatusInput,
    pub output: StatusOutput,
    pub converter: StatusConverter,
}

impl StatusResponse {
    /// Progress percentage normalised to a number in `[0, 100]`.
    ///
    /// Returns `None` when no percentage was sent. Unparsable or out-of-range
    /// values are logged and also yield `None`.
    pub fn percent(&self) -> Option<f64> {
        let raw = self.raw_percent.as_ref()?;
        let parsed = match raw {
            serde_json::Value::Null => return None,
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                s.parse::<f64>().ok()
            }
            _ => None,
        };
        match parsed {
            Some(p) if (0.0..=100.0).contains(&p) => Some(p),
            _ => {
                warn!(percent = %raw, "Ignoring malformed progress percentage");
                None
            }
        }
    }

    /// Rewrite a protocol-relative `output.url` with `scheme`.
    pub fn absolutize_urls(&mut self, scheme: &str) {
        self.output.url = absolutize(&self.output.url, scheme);
        self.url = absolutize(&self.url, scheme);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusInput {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "filename")]
    pub file_name: String,
    pub size: i64,
    pub name: String,
    pub ext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusOutput {
    #[serde(rename = "filename")]
    pub file_name: String,
    pub ext: String,
    pub files: Vec<String>,
    pub size: i64,
    pub url: String,
    pub downloads: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConverter {
    pub format: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: BTreeMap<String, serde_json::Value>,
    pub duration: f64,
}

/// One past job as reported by the history listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryEntry {
    pub id: String,
    pub host: String,
    pub step: Step,
    #[serde(rename = "starttime")]
    pub start_time: String,
    #[serde(rename = "endtime")]
    pub end_time: String,
    pub url: String,
    /// Filled in by [`crate::history::HistoryIndex::load`].
    #[serde(skip)]
    pub status: Option<StatusResponse>,
}

/// A conversion the service advertises.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionType {
    #[serde(rename = "inputformat")]
    pub input_format: String,
    #[serde(rename = "outputformat")]
    pub output_format: String,
    pub converter: String,
    #[serde(rename = "converteroptions")]
    pub converter_options: BTreeMap<String, serde_json::Value>,
}

/// Prefix a protocol-relative (`//host/...`) URL with `scheme`.
///
/// Absolute and empty URLs are returned unchanged.
pub fn absolutize(url: &str, scheme: &str) -> String {
    if url.starts_with("//") {
        format!("{scheme}:{url}")
    } else {
        url.to_string()
    }
}

/// Scheme of an absolute URL (`"https"` for `https://…`), defaulting to `https`.
pub fn scheme_of(url: &str) -> &str {
    match url.find("://") {
        Some(i) if i > 0 => &url[..i],
        _ => "https",
    }
}
