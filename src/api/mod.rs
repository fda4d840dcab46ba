//! The remote conversion service, seen from the client.
//!
//! [`ConversionApi`] is the seam between the conversion state machine and the
//! network: [`HttpApi`] talks to the real service over reqwest, and tests plug
//! in an in-memory double. Implementations must return absolute URLs:
//! protocol-relative (`//host/...`) values from the service are rewritten with
//! the scheme of the request that produced them before they leave the adapter.

pub mod http;

#[cfg(test)]
pub(crate) mod fake;

use crate::config::UploadOptions;
use crate::error::CloudConvertError;
use crate::model::{ConversionType, HistoryEntry, Process, StatusResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

pub use http::HttpApi;

/// A boxed stream of response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, CloudConvertError>> + Send>>;

/// Operations the conversion service exposes.
#[async_trait]
pub trait ConversionApi: Send + Sync {
    /// Every job run with this API key.
    async fn history(&self) -> Result<Vec<HistoryEntry>, CloudConvertError>;

    /// Supported conversions. Empty formats mean "no filter".
    async fn conversion_types(
        &self,
        input_format: &str,
        output_format: &str,
    ) -> Result<Vec<ConversionType>, CloudConvertError>;

    /// Create a job. A refusal comes back as `Ok` with [`Process::error`] set.
    async fn create_process(
        &self,
        input_format: &str,
        output_format: &str,
    ) -> Result<Process, CloudConvertError>;

    /// Stream `file` to the job and return the acknowledgement snapshot.
    async fn upload(
        &self,
        process_url: &str,
        file: &Path,
        output_format: &str,
        options: &UploadOptions,
    ) -> Result<StatusResponse, CloudConvertError>;

    /// Current job status.
    async fn status(&self, process_url: &str) -> Result<StatusResponse, CloudConvertError>;

    /// Stop the job. It cannot be resumed.
    async fn cancel(&self, process_url: &str) -> Result<(), CloudConvertError>;

    /// Delete the job's files on the remote side.
    async fn delete(&self, process_url: &str) -> Result<(), CloudConvertError>;

    /// Fetch a conversion result.
    async fn download(&self, url: &str) -> Result<ByteStream, CloudConvertError>;
}
