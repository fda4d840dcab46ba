//! Configuration types for conversions.
//!
//! All client behaviour is controlled through [`ConversionConfig`], built via
//! its [`ConversionConfigBuilder`]. One struct holds the API credentials, the
//! polling policy, the batch ceiling and the upload options so it can be
//! cloned into every batch worker unchanged.

use crate::api::ConversionApi;
use crate::error::CloudConvertError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Production endpoint of the conversion service.
pub const DEFAULT_BASE_URL: &str = "https://api.cloudconvert.org";

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "CLOUDCONVERT_APIKEY";

/// Upper bound applied by [`ConversionConfigBuilder::max_status_retries`].
pub const MAX_STATUS_RETRIES: u32 = 100;

/// Configuration for one or many conversions.
///
/// # Example
/// ```rust
/// use cloudconvert::ConversionConfig;
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .api_key("my-key")
///     .concurrency(3)
///     .poll_interval(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 3);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// API key. If None, [`API_KEY_ENV`] is read when the HTTP client is built.
    pub api_key: Option<String>,

    /// Base URL of the API. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,

    /// Pre-constructed API client. Takes precedence over `api_key`.
    pub api: Option<Arc<dyn ConversionApi>>,

    /// Maximum number of conversions in flight in batch mode. Default: 5.
    pub concurrency: usize,

    /// Poll interval used when the job reports no usable progress. Default: 1 s.
    pub poll_interval: Duration,

    /// Consecutive status-check failures tolerated before giving up. Default: 3.
    pub max_status_retries: u32,

    /// Pause after a failed status check. Default: 10 s.
    pub status_retry_backoff: Duration,

    /// TCP connect timeout for every request. Default: 30 s.
    /// Transfers themselves have no overall deadline.
    pub connect_timeout: Duration,

    /// Skip files whose output already exists in the conversion history.
    /// Batch mode only. Default: true.
    pub use_history: bool,

    /// Options sent with every upload.
    pub upload: UploadOptions,

    /// Per-file progress events for batch conversions.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            api: None,
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
            max_status_retries: 3,
            status_retry_backoff: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            use_history: true,
            upload: UploadOptions::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callback = self.progress_callback.as_ref();
        f.debug_struct("ConversionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("api", &self.api.as_ref().map(|_| "<dyn ConversionApi>"))
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .field("max_status_retries", &self.max_status_retries)
            .field("status_retry_backoff", &self.status_retry_backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("use_history", &self.use_history)
            .field("upload", &self.upload)
            .field(
                "progress_callback",
                &callback.map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The configured API key, falling back to [`API_KEY_ENV`].
    pub fn resolve_api_key(&self) -> Result<String, CloudConvertError> {
        if let Some(key) = self.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                return Ok(key.to_string());
            }
        }
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(CloudConvertError::MissingApiKey),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api(mut self, api: Arc<dyn ConversionApi>) -> Self {
        self.config.api = Some(api);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Clamped to [`MAX_STATUS_RETRIES`].
    pub fn max_status_retries(mut self, n: u32) -> Self {
        self.config.max_status_retries = n.min(MAX_STATUS_RETRIES);
        self
    }

    pub fn status_retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.status_retry_backoff = backoff;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn use_history(mut self, v: bool) -> Self {
        self.config.use_history = v;
        self
    }

    pub fn upload_options(mut self, options: UploadOptions) -> Self {
        self.config.upload = options;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, CloudConvertError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(CloudConvertError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.poll_interval.is_zero() {
            return Err(CloudConvertError::InvalidConfig(
                "Poll interval must be greater than zero".into(),
            ));
        }
        if c.api.is_none()
            && !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://"))
        {
            return Err(CloudConvertError::InvalidConfig(format!(
                "Base URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        Ok(self.config)
    }
}

/// Optional metadata sent alongside an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Ask the service to send a notification e-mail when the job ends.
    pub email: bool,

    /// Output destination other than a download (e.g. `"googledrive"`).
    ///
    /// When set, the result is delivered there and no local file is written.
    pub output: Option<String>,

    /// URL the service calls when the job ends.
    pub callback: Option<String>,

    /// Converter-specific options, sent as `options[<name>]=<value>`.
    pub converter_options: BTreeMap<String, String>,
}

impl UploadOptions {
    /// `true` when the result goes to a remote target instead of a download.
    pub fn delivers_remotely(&self) -> bool {
        self.output.as_deref().is_some_and(|o| !o.trim().is_empty())
    }
}
