//! The lifecycle of one conversion.
//!
//! A [`Conversion`] owns its remote [`Process`] and moves through
//!
//! ```text
//! Created ──start──▶ Uploading ──▶ Polling ──wait──▶ Finished ──save──▶ Saved
//!    │                   │            │                  │
//!    └───────────────────┴────────────┴──────────────────┴──▶ Failed(stage)
//! ```
//!
//! Each transition is one async method; calling one out of order returns
//! [`CloudConvertError::InvalidState`] and leaves the state untouched. A
//! conversion recovered from the history starts out `Finished` with an
//! explicit download URL and only needs [`Conversion::save`].

use crate::api::ConversionApi;
use crate::config::{ConversionConfig, UploadOptions};
use crate::error::CloudConvertError;
use crate::model::{DownloadSource, Process, StatusResponse, Step};
use crate::output::ConversionOutcome;
use crate::pipeline::{download, poll};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The lifecycle step a conversion failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Create,
    Upload,
    Poll,
    Download,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Create => "create",
            Stage::Upload => "upload",
            Stage::Poll => "poll",
            Stage::Download => "download",
        })
    }
}

/// Local view of where a conversion stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    /// The remote process exists; nothing has been uploaded.
    Created,
    Uploading,
    Polling,
    /// The remote job finished; the result can be downloaded.
    Finished,
    /// The result was written to the destination.
    Saved,
    /// Cancelled on the remote side. Cannot be resumed.
    Cancelled,
    Failed(Stage),
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionState::Created => f.write_str("created"),
            ConversionState::Uploading => f.write_str("uploading"),
            ConversionState::Polling => f.write_str("polling"),
            ConversionState::Finished => f.write_str("finished"),
            ConversionState::Saved => f.write_str("saved"),
            ConversionState::Cancelled => f.write_str("cancelled"),
            ConversionState::Failed(stage) => write!(f, "failed during {stage}"),
        }
    }
}

/// What to convert and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Overrides the source extension.
    pub source_format: Option<String>,
    /// Overrides the destination extension.
    pub destination_format: Option<String>,
}

impl ConversionRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            ..Default::default()
        }
    }

    pub fn source_format(mut self, format: impl Into<String>) -> Self {
        self.source_format = Some(format.into());
        self
    }

    pub fn destination_format(mut self, format: impl Into<String>) -> Self {
        self.destination_format = Some(format.into());
        self
    }

    /// Format of the result: the explicit one, else the destination extension.
    pub fn resolve_output_format(&self) -> Result<String, CloudConvertError> {
        resolve_format(self.destination_format.as_deref(), &self.destination).ok_or_else(|| {
            CloudConvertError::MissingOutputFormat {
                path: self.destination.clone(),
            }
        })
    }

    /// Format of the source. May be empty, in which case the service decides.
    pub fn resolve_input_format(&self) -> String {
        resolve_format(self.source_format.as_deref(), &self.source).unwrap_or_default()
    }
}

/// The extension of `path`, case preserved. `None` when absent or empty.
pub fn format_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .filter(|e| !e.is_empty())
}

/// An explicit non-blank format wins over the extension of `path`.
pub fn resolve_format(explicit: Option<&str>, path: &Path) -> Option<String> {
    match explicit.map(str::trim) {
        Some(f) if !f.is_empty() => Some(f.to_string()),
        _ => format_of(path),
    }
}

/// `source` with its extension replaced by `to_format`, or appended if it has none.
pub fn destination_for(source: &Path, to_format: &str) -> PathBuf {
    source.with_extension(to_format)
}

/// One conversion of one file.
pub struct Conversion {
    api: Arc<dyn ConversionApi>,
    process: Process,
    source: PathBuf,
    destination: PathBuf,
    input_format: String,
    output_format: String,
    state: ConversionState,
    last_status: Option<StatusResponse>,
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversion")
            .field("process", &self.process)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("input_format", &self.input_format)
            .field("output_format", &self.output_format)
            .field("state", &self.state)
            .finish()
    }
}

impl Conversion {
    /// Resolve the formats of `request` and create the remote process.
    ///
    /// Fails without contacting the service when the source is missing or no
    /// output format can be determined. A refusal from the service is
    /// [`CloudConvertError::Rejected`].
    pub async fn new(
        api: Arc<dyn ConversionApi>,
        request: &ConversionRequest,
    ) -> Result<Self, CloudConvertError> {
        let output_format = request.resolve_output_format()?;
        let input_format = request.resolve_input_format();
        if tokio::fs::metadata(&request.source).await.is_err() {
            return Err(CloudConvertError::FileNotFound {
                path: request.source.clone(),
            });
        }

        let process = api.create_process(&input_format, &output_format).await?;
        if let Some(message) = process.rejection() {
            warn!(
                "Process for {} rejected: {}",
                request.source.display(),
                message
            );
            return Err(CloudConvertError::Rejected {
                message: message.to_string(),
            });
        }
        let shown_input = if input_format.is_empty() {
            "?"
        } else {
            input_format.as_str()
        };
        info!(
            "Process {} created for {} ({} → {})",
            process.id(),
            request.source.display(),
            shown_input,
            output_format
        );

        Ok(Self {
            api,
            process,
            source: request.source.clone(),
            destination: request.destination.clone(),
            input_format,
            output_format,
            state: ConversionState::Created,
            last_status: None,
        })
    }

    /// A conversion whose result already exists at `download_url`.
    pub fn from_history(
        api: Arc<dyn ConversionApi>,
        request: &ConversionRequest,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            api,
            process: Process {
                download: DownloadSource::Explicit(download_url.into()),
                ..Default::default()
            },
            source: request.source.clone(),
            destination: request.destination.clone(),
            input_format: request.resolve_input_format(),
            output_format: request.resolve_output_format().unwrap_or_default(),
            state: ConversionState::Finished,
            last_status: None,
        }
    }

    /// Upload the source file. Returns the acknowledgement snapshot.
    pub async fn start(
        &mut self,
        options: &UploadOptions,
    ) -> Result<&StatusResponse, CloudConvertError> {
        self.expect_state("start", ConversionState::Created)?;
        self.state = ConversionState::Uploading;

        let uploaded = self
            .api
            .upload(
                &self.process.url,
                &self.source,
                &self.output_format,
                options,
            )
            .await;
        let ack = match uploaded {
            Ok(ack) => ack,
            Err(e) => return Err(self.fail(Stage::Upload, e)),
        };
        if ack.step == Step::Error {
            let message = ack.message.clone();
            return Err(self.fail(
                Stage::Upload,
                CloudConvertError::ConversionFailed { message },
            ));
        }
        debug!(
            "Upload of {} acknowledged at step {}",
            self.source.display(),
            ack.step
        );
        self.state = ConversionState::Polling;
        Ok(self.last_status.insert(ack))
    }

    /// Poll until the remote job is done. Returns the `finished` snapshot.
    pub async fn wait(
        &mut self,
        policy: &poll::PollPolicy,
    ) -> Result<&StatusResponse, CloudConvertError> {
        self.expect_state("wait", ConversionState::Polling)?;
        let polled = poll::wait_for_completion(self.api.as_ref(), &self.process.url, policy).await;
        match polled {
            Ok(done) => {
                info!("Process {} finished", self.process.id());
                self.state = ConversionState::Finished;
                Ok(self.last_status.insert(done))
            }
            Err(e) => Err(self.fail(Stage::Poll, e)),
        }
    }

    /// Download the result to the destination. Returns the bytes written.
    pub async fn save(&mut self) -> Result<u64, CloudConvertError> {
        self.expect_state("save", ConversionState::Finished)?;
        let resolved = download::resolve_url(
            self.api.as_ref(),
            &self.process.url,
            &self.process.download,
            self.last_status.as_ref(),
        )
        .await;
        let url = match resolved {
            Ok(url) => url,
            Err(e) => return Err(self.fail(Stage::Download, e)),
        };
        let saved = download::download_to(self.api.as_ref(), &url, &self.destination).await;
        match saved {
            Ok(bytes) => {
                self.state = ConversionState::Saved;
                Ok(bytes)
            }
            Err(e) => Err(self.fail(Stage::Download, e)),
        }
    }

    /// Drive the conversion to its end.
    ///
    /// A conversion recovered from the history is only downloaded. When the
    /// upload options name a remote output target the download is skipped.
    pub async fn run(
        &mut self,
        config: &ConversionConfig,
    ) -> Result<ConversionOutcome, CloudConvertError> {
        if self.state == ConversionState::Finished {
            let bytes = self.save().await?;
            return Ok(ConversionOutcome::Reused { bytes });
        }

        self.start(&config.upload).await?;
        self.wait(&poll::PollPolicy::from_config(config)).await?;

        if config.upload.delivers_remotely() {
            let target = config.upload.output.clone().unwrap_or_default();
            info!(
                "Result of {} delivered to '{}'",
                self.source.display(),
                target
            );
            return Ok(ConversionOutcome::Delivered { target });
        }

        let bytes = self.save().await?;
        Ok(ConversionOutcome::Converted { bytes })
    }

    /// Stop the remote job. The conversion cannot continue afterwards.
    pub async fn cancel(&mut self) -> Result<(), CloudConvertError> {
        let url = self.require_process_url("cancel")?;
        self.api.cancel(&url).await?;
        info!("Process {} cancelled", self.process.id());
        self.state = ConversionState::Cancelled;
        Ok(())
    }

    /// Remove the job's files on the remote side.
    pub async fn delete(&self) -> Result<(), CloudConvertError> {
        let url = self.require_process_url("delete")?;
        self.api.delete(&url).await?;
        info!("Process {} deleted", self.process.id());
        Ok(())
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn input_format(&self) -> &str {
        &self.input_format
    }

    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    /// The most recent status snapshot, if any was fetched.
    pub fn last_status(&self) -> Option<&StatusResponse> {
        self.last_status.as_ref()
    }

    /// The stage a failed conversion stopped in.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self.state {
            ConversionState::Failed(stage) => Some(stage),
            _ => None,
        }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: ConversionState,
    ) -> Result<(), CloudConvertError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CloudConvertError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn require_process_url(&self, operation: &'static str) -> Result<String, CloudConvertError> {
        if self.process.url.is_empty() {
            return Err(CloudConvertError::InvalidState {
                operation,
                state: "not backed by a remote process".into(),
            });
        }
        Ok(self.process.url.clone())
    }

    fn fail(&mut self, stage: Stage, err: CloudConvertError) -> CloudConvertError {
        warn!(
            "Conversion of {} failed during {}: {}",
            self.source.display(),
            stage,
            err
        );
        self.state = ConversionState::Failed(stage);
        err
    }
}
