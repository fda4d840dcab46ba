//! # cloudconvert
//!
//! Client for the CloudConvert file-conversion service: create a job, stream
//! the source file up, poll until the job is done, and download the result.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source file
//!  │
//!  ├─ 1. Create    resolve formats, open a remote process
//!  ├─ 2. Upload    multipart body fed by a bounded producer/consumer pipe
//!  ├─ 3. Poll      status checks spaced by the job's own progress estimate
//!  └─ 4. Download  result streamed to <dest>.part, renamed into place
//! ```
//!
//! In batch mode every file runs this pipeline in its own task, gated by a
//! semaphore, after a lookup in the [`HistoryIndex`] of earlier conversions:
//! a file that was converted before is only downloaded again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cloudconvert::{convert, convert_batch, ConversionConfig, ConversionRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Key read from CLOUDCONVERT_APIKEY when not set here
//!     let config = ConversionConfig::default();
//!
//!     convert(&ConversionRequest::new("scan.png", "scan.webp"), &config).await?;
//!
//!     let report = convert_batch(&["a.docx", "b.docx"], "pdf", &config).await?;
//!     eprintln!("{}/{} converted", report.stats.succeeded(), report.stats.total_files);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ccup` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! cloudconvert = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod history;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{ConversionApi, HttpApi};
pub use batch::{convert_batch, run_batch};
pub use config::{ConversionConfig, ConversionConfigBuilder, UploadOptions};
pub use convert::{conversion_types, convert, convert_sync, is_possible};
pub use error::{CloudConvertError, FileError};
pub use history::HistoryIndex;
pub use model::{ConversionType, DownloadSource, HistoryEntry, Process, StatusResponse, Step};
pub use output::{BatchReport, BatchStats, ConversionOutcome, FileResult};
pub use process::{Conversion, ConversionRequest, ConversionState, Stage};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
