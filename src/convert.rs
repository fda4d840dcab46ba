//! Single-file conversion entry points.
//!
//! These wrap [`Conversion`] for the common case: create, upload, wait and
//! download in one call. Use [`crate::batch::convert_batch`] for many files,
//! or drive a [`Conversion`] by hand to cancel or inspect it between steps.

use crate::api::{ConversionApi, HttpApi};
use crate::config::ConversionConfig;
use crate::error::CloudConvertError;
use crate::model::ConversionType;
use crate::output::ConversionOutcome;
use crate::process::{Conversion, ConversionRequest};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Convert one file.
///
/// # Example
/// ```rust,no_run
/// use cloudconvert::{convert, ConversionConfig, ConversionRequest};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::builder().api_key("my-key").build()?;
/// let outcome = convert(&ConversionRequest::new("a.png", "b.webp"), &config).await?;
/// println!("{} bytes written", outcome.bytes());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - the source is missing or no output format can be determined
/// - no API key is configured
/// - the service rejects the job, the job fails, or polling is abandoned
/// - the result cannot be downloaded or written
pub async fn convert(
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, CloudConvertError> {
    let start = Instant::now();
    let api = resolve_api(config)?;
    let mut conversion = Conversion::new(api, request).await?;
    let outcome = conversion.run(config).await?;
    info!(
        "Converted {} → {} in {}ms",
        request.source.display(),
        request.destination.display(),
        start.elapsed().as_millis()
    );
    Ok(outcome)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, CloudConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| {
            CloudConvertError::Internal(format!("Failed to create tokio runtime: {}", e))
        })?
        .block_on(convert(request, config))
}

/// Conversions the service supports. Empty formats match everything.
///
/// Does not require an API key.
pub async fn conversion_types(
    input_format: &str,
    output_format: &str,
    config: &ConversionConfig,
) -> Result<Vec<ConversionType>, CloudConvertError> {
    let api: Arc<dyn ConversionApi> = match &config.api {
        Some(api) => api.clone(),
        None => {
            let key = config.resolve_api_key().unwrap_or_default();
            Arc::new(HttpApi::new(&config.base_url, key, config.connect_timeout)?)
        }
    };
    let types = api.conversion_types(input_format, output_format).await?;
    debug!(
        "{} conversion types for '{}' → '{}'",
        types.len(),
        input_format,
        output_format
    );
    Ok(types)
}

/// Whether the service can convert `input_format` to `output_format`.
///
/// Both formats are required; an empty one answers `false` without a request.
pub async fn is_possible(
    input_format: &str,
    output_format: &str,
    config: &ConversionConfig,
) -> Result<bool, CloudConvertError> {
    if input_format.is_empty() || output_format.is_empty() {
        return Ok(false);
    }
    Ok(!conversion_types(input_format, output_format, config)
        .await?
        .is_empty())
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// The API client to use, from most-specific to least-specific.
///
/// 1. `config.api`: a pre-built client
/// 2. `config.api_key`, then `CLOUDCONVERT_APIKEY`, with [`HttpApi`]
pub(crate) fn resolve_api(
    config: &ConversionConfig,
) -> Result<Arc<dyn ConversionApi>, CloudConvertError> {
    if let Some(api) = &config.api {
        return Ok(api.clone());
    }
    Ok(Arc::new(HttpApi::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use std::time::Duration;

    fn config_with(api: Arc<FakeApi>) -> ConversionConfig {
        ConversionConfig::builder()
            .api(api)
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn convert_uses_injected_api() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        std::fs::write(&src, b"png").unwrap();
        let api = Arc::new(FakeApi::new());

        let outcome = convert(
            &ConversionRequest::new(&src, dir.path().join("b.webp")),
            &config_with(api.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ConversionOutcome::Converted { .. }));
        assert_eq!(api.create_calls(), 1);
    }

    #[tokio::test]
    async fn missing_format_fails_before_any_request() {
        let api = Arc::new(FakeApi::new());
        let req = ConversionRequest::new("a.png", "b");
        let err = convert(&req, &config_with(api.clone())).await.unwrap_err();
        assert!(matches!(err, CloudConvertError::MissingOutputFormat { .. }));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn is_possible_filters_types() {
        let config = config_with(Arc::new(FakeApi::new()));
        assert!(is_possible("png", "webp", &config).await.unwrap());
        assert!(!is_possible("webp", "docx", &config).await.unwrap());
        let from_png = conversion_types("png", "", &config).await.unwrap();
        assert_eq!(from_png.len(), 2);
    }

    #[tokio::test]
    async fn is_possible_needs_both_formats() {
        let api = Arc::new(FakeApi::new());
        let config = config_with(api.clone());
        assert!(!is_possible("png", "", &config).await.unwrap());
        assert!(!is_possible("", "webp", &config).await.unwrap());
        assert!(api.calls().is_empty());
    }

    #[test]
    fn convert_sync_reports_missing_source() {
        let config = config_with(Arc::new(FakeApi::new()));
        let req = ConversionRequest::new("/nope/a.png", "/nope/b.webp");
        let err = convert_sync(&req, &config).unwrap_err();
        assert!(matches!(err, CloudConvertError::FileNotFound { .. }));
    }
}
