//! Error types for the cloudconvert library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CloudConvertError`]: **Fatal** for one conversion: the job could not
//!   be created, uploaded, finished or downloaded. Returned as
//!   `Err(CloudConvertError)` from [`crate::process::Conversion`] methods and
//!   the single-file [`crate::convert::convert`] entry point.
//!
//! * [`FileError`]: **Non-fatal** for a batch: one file failed but its
//!   siblings carry on. Stored inside [`crate::output::FileResult`] so callers
//!   can inspect partial success instead of losing the whole batch.

use crate::process::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the cloudconvert library.
#[derive(Debug, Error)]
pub enum CloudConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("Source file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Neither an explicit format nor a destination extension was given.
    #[error("Cannot determine the output format for '{path}'\nPass --tofmt or use a destination file name with an extension.")]
    MissingOutputFormat { path: PathBuf },

    /// No API key in the config or the environment.
    #[error("API key is missing.\nProvide it with --apikey or the CLOUDCONVERT_APIKEY environment variable.")]
    MissingApiKey,

    /// Reading the source file failed while it was being uploaded.
    #[error("Failed to read source file '{path}': {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Transport errors ──────────────────────────────────────────────────
    /// Connection, DNS or body-transfer failure.
    #[error("HTTP request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status and no usable body.
    #[error("HTTP {status} from '{url}': {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// The response body was not the JSON we expected.
    #[error("Failed to decode response from '{url}': {reason}")]
    Decode { url: String, reason: String },

    // ── Remote job errors ─────────────────────────────────────────────────
    /// Process creation returned a non-empty `error` field.
    #[error("Process creation rejected: {message}")]
    Rejected { message: String },

    /// The job reached the `error` step.
    #[error("Conversion failed: {message}")]
    ConversionFailed { message: String },

    /// Status polling failed more often in a row than the retry budget allows.
    #[error("Gave up waiting for '{url}' after {attempts} failed status checks.\nLast error: {last_error}")]
    PollingAbandoned {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// The job finished but no output URL could be resolved.
    #[error("No output URL available for process '{url}'")]
    NoOutputUrl { url: String },

    /// A state-machine operation was called out of order.
    #[error("Cannot {operation} while the conversion is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the destination file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file of a batch.
///
/// The variant records the lifecycle stage that failed; the detail is the
/// rendered [`CloudConvertError`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FileError {
    /// Format resolution, missing source or process creation failed.
    #[error("{path}: could not create conversion: {detail}")]
    CreateFailed { path: PathBuf, detail: String },

    /// The multipart upload failed.
    #[error("{path}: upload failed: {detail}")]
    UploadFailed { path: PathBuf, detail: String },

    /// The remote job errored, or status polling was abandoned.
    #[error("{path}: conversion failed: {detail}")]
    ConversionFailed { path: PathBuf, detail: String },

    /// Fetching or writing the result failed.
    #[error("{path}: download failed: {detail}")]
    DownloadFailed { path: PathBuf, detail: String },

    /// The worker task panicked or was aborted.
    #[error("{path}: worker aborted: {detail}")]
    Aborted { path: PathBuf, detail: String },

    /// An earlier file of the same batch already writes to `destination`.
    #[error("{path}: '{destination}' is already the destination of another file")]
    DuplicateDestination { path: PathBuf, destination: PathBuf },
}

impl FileError {
    /// Wrap a fatal conversion error as the batch error for `stage`.
    pub fn at(stage: Stage, path: impl Into<PathBuf>, err: &CloudConvertError) -> Self {
        let path = path.into();
        let detail = err.to_string();
        match stage {
            Stage::Create => FileError::CreateFailed { path, detail },
            Stage::Upload => FileError::UploadFailed { path, detail },
            Stage::Poll => FileError::ConversionFailed { path, detail },
            Stage::Download => FileError::DownloadFailed { path, detail },
        }
    }

    /// Source file the error belongs to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            FileError::CreateFailed { path, .. }
            | FileError::UploadFailed { path, .. }
            | FileError::ConversionFailed { path, .. }
            | FileError::DownloadFailed { path, .. }
            | FileError::Aborted { path, .. }
            | FileError::DuplicateDestination { path, .. } => path,
        }
    }
}
