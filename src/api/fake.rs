//! In-memory [`ConversionApi`] for unit tests.

use super::{ByteStream, ConversionApi};
use crate::config::UploadOptions;
use crate::error::CloudConvertError;
use crate::model::{ConversionType, HistoryEntry, Process, StatusResponse, Step};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    History,
    ConversionTypes,
    Create { input: String, output: String },
    Upload { url: String, file: String },
    Status(String),
    Cancel(String),
    Delete(String),
    Download(String),
}

/// Scripted double of the conversion service.
///
/// Process URLs are `https://fake.example/process/<n>`. Once the status
/// script runs out, every status is `finished` with output URL
/// `<process url>/output`, and every download yields its own URL as bytes.
#[derive(Default)]
pub(crate) struct FakeApi {
    statuses: Mutex<VecDeque<Result<StatusResponse, String>>>,
    history: Vec<HistoryEntry>,
    history_error: Option<String>,
    known_statuses: HashMap<String, StatusResponse>,
    failing_uploads: HashSet<String>,
    failing_downloads: HashSet<String>,
    upload_delay: Duration,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    uploads_in_flight: AtomicUsize,
    max_uploads_in_flight: AtomicUsize,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Statuses returned in order, shared by every process.
    pub(crate) fn with_statuses(self, script: Vec<Result<StatusResponse, String>>) -> Self {
        *self.statuses.lock().unwrap() = script.into();
        self
    }

    /// History listing plus the status each listed URL reports.
    pub(crate) fn with_history(
        mut self,
        entries: Vec<HistoryEntry>,
        statuses: Vec<(String, StatusResponse)>,
    ) -> Self {
        self.history = entries;
        self.known_statuses.extend(statuses);
        self
    }

    pub(crate) fn failing_history(mut self, message: &str) -> Self {
        self.history_error = Some(message.to_string());
        self
    }

    /// Uploads of a file with this name fail.
    pub(crate) fn failing_upload(mut self, file_name: &str) -> Self {
        self.failing_uploads.insert(file_name.to_string());
        self
    }

    /// Downloads of this URL fail.
    pub(crate) fn failing_download(mut self, url: &str) -> Self {
        self.failing_downloads.insert(url.to_string());
        self
    }

    pub(crate) fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub(crate) fn step(step: Step) -> StatusResponse {
        StatusResponse {
            step,
            ..Default::default()
        }
    }

    pub(crate) fn finished(output_url: &str) -> StatusResponse {
        let mut s = Self::step(Step::Finished);
        s.output.url = output_url.to_string();
        s
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Status(_)))
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Create { .. }))
    }

    pub(crate) fn upload_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Upload { .. }))
    }

    pub(crate) fn max_uploads_in_flight(&self) -> usize {
        self.max_uploads_in_flight.load(Ordering::SeqCst)
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ConversionApi for FakeApi {
    async fn history(&self) -> Result<Vec<HistoryEntry>, CloudConvertError> {
        self.record(Call::History);
        match &self.history_error {
            Some(msg) => Err(CloudConvertError::Internal(msg.clone())),
            None => Ok(self.history.clone()),
        }
    }

    async fn conversion_types(
        &self,
        input_format: &str,
        output_format: &str,
    ) -> Result<Vec<ConversionType>, CloudConvertError> {
        self.record(Call::ConversionTypes);
        let all = [("png", "webp"), ("png", "jpg"), ("docx", "pdf")];
        Ok(all
            .iter()
            .filter(|(i, o)| {
                (input_format.is_empty() || *i == input_format)
                    && (output_format.is_empty() || *o == output_format)
            })
            .map(|(i, o)| ConversionType {
                input_format: i.to_string(),
                output_format: o.to_string(),
                converter: "fake".into(),
                ..Default::default()
            })
            .collect())
    }

    async fn create_process(
        &self,
        input_format: &str,
        output_format: &str,
    ) -> Result<Process, CloudConvertError> {
        self.record(Call::Create {
            input: input_format.to_string(),
            output: output_format.to_string(),
        });
        if output_format == "unsupported" {
            return Ok(Process {
                error: "This conversion type is not supported".into(),
                ..Default::default()
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Process {
            url: format!("https://fake.example/process/{n}"),
            ..Default::default()
        })
    }

    async fn upload(
        &self,
        process_url: &str,
        file: &Path,
        _output_format: &str,
        _options: &UploadOptions,
    ) -> Result<StatusResponse, CloudConvertError> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(Call::Upload {
            url: process_url.to_string(),
            file: name.clone(),
        });

        let now = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_uploads_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_uploads.contains(&name) {
            return Err(CloudConvertError::Internal(format!("upload of {name} refused")));
        }
        if !file.exists() {
            return Err(CloudConvertError::FileNotFound {
                path: file.to_path_buf(),
            });
        }
        Ok(Self::step(Step::Wait))
    }

    async fn status(&self, process_url: &str) -> Result<StatusResponse, CloudConvertError> {
        self.record(Call::Status(process_url.to_string()));
        if let Some(known) = self.known_statuses.get(process_url) {
            return Ok(known.clone());
        }
        let scripted = self.statuses.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(s)) => Ok(s),
            Some(Err(msg)) => Err(CloudConvertError::Internal(msg)),
            None => Ok(Self::finished(&format!("{process_url}/output"))),
        }
    }

    async fn cancel(&self, process_url: &str) -> Result<(), CloudConvertError> {
        self.record(Call::Cancel(process_url.to_string()));
        Ok(())
    }

    async fn delete(&self, process_url: &str) -> Result<(), CloudConvertError> {
        self.record(Call::Delete(process_url.to_string()));
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<ByteStream, CloudConvertError> {
        self.record(Call::Download(url.to_string()));
        if self.failing_downloads.contains(url) {
            return Err(CloudConvertError::HttpStatus {
                url: url.to_string(),
                status: 404,
                body: "gone".into(),
            });
        }
        let body = Bytes::from(url.to_string());
        Ok(Box::pin(futures::stream::iter(vec![Ok(body)])))
    }
}
