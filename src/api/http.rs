//! [`ConversionApi`] over HTTP with reqwest.

use super::{ByteStream, ConversionApi};
use crate::config::{ConversionConfig, UploadOptions};
use crate::error::CloudConvertError;
use crate::model::{
    absolutize, scheme_of, ConversionType, HistoryEntry, Process, StatusResponse, Step,
};
use crate::pipeline::upload;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest response-body excerpt kept in an error message.
const BODY_EXCERPT: usize = 200;

/// HTTP client for the conversion service.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, CloudConvertError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("cloudconvert-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CloudConvertError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from the config's base URL, key and timeouts.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, CloudConvertError> {
        let api_key = config.resolve_api_key()?;
        Self::new(&config.base_url, api_key, config.connect_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<(StatusCode, Bytes), CloudConvertError> {
        debug!("GET {}", url);
        let mut req = self.client.get(url);
        if !query.is_empty() {
            req = req.query(query);
        }
        let sent = req.send().await;
        let response = sent.map_err(|source| CloudConvertError::Transport {
            url: url.to_string(),
            source,
        })?;
        read_body(url, response).await
    }
}

#[async_trait]
impl ConversionApi for HttpApi {
    async fn history(&self) -> Result<Vec<HistoryEntry>, CloudConvertError> {
        let url = self.endpoint("processes");
        let (status, body) = self.get(&url, &[("apikey", self.api_key.as_str())]).await?;
        if !status.is_success() {
            return Err(status_error(&url, status, &body));
        }
        let mut entries: Vec<HistoryEntry> = decode(&url, &body)?;
        let scheme = scheme_of(&self.base_url);
        for entry in &mut entries {
            entry.url = absolutize(&entry.url, scheme);
        }
        debug!("History lists {} processes", entries.len());
        Ok(entries)
    }

    async fn conversion_types(
        &self,
        input_format: &str,
        output_format: &str,
    ) -> Result<Vec<ConversionType>, CloudConvertError> {
        let url = self.endpoint("conversiontypes");
        let mut query = Vec::new();
        if !input_format.is_empty() {
            query.push(("inputformat", input_format));
        }
        if !output_format.is_empty() {
            query.push(("outputformat", output_format));
        }
        let (status, body) = self.get(&url, &query).await?;
        if !status.is_success() {
            return Err(status_error(&url, status, &body));
        }
        decode(&url, &body)
    }

    async fn create_process(
        &self,
        input_format: &str,
        output_format: &str,
    ) -> Result<Process, CloudConvertError> {
        let url = self.endpoint("process");
        let (status, body) = self
            .get(
                &url,
                &[
                    ("inputformat", input_format),
                    ("outputformat", output_format),
                    ("apikey", self.api_key.as_str()),
                ],
            )
            .await?;

        // Refusals arrive as a JSON `error` field, often with a 4xx status.
        let decoded = decode::<Process>(&url, &body);
        if let Ok(p) = &decoded {
            if p.rejection().is_some() {
                return Ok(p.clone());
            }
        }
        if !status.is_success() {
            return Err(status_error(&url, status, &body));
        }
        let mut process = decoded?;
        if process.url.is_empty() {
            return Err(CloudConvertError::Decode {
                url,
                reason: "response carries neither a process URL nor an error".into(),
            });
        }
        process.url = absolutize(&process.url, scheme_of(&self.base_url));
        info!("Created process {}", process.url);
        Ok(process)
    }

    async fn upload(
        &self,
        process_url: &str,
        file: &Path,
        output_format: &str,
        options: &UploadOptions,
    ) -> Result<StatusResponse, CloudConvertError> {
        let fields = upload::form_fields(output_format, options);
        let source = upload::file_body(file).await?;
        let (form, producer) = upload::multipart_form(fields, source);

        debug!("POST {} ({})", process_url, file.display());
        let sent = self.client.post(process_url).multipart(form).send().await;

        // A producer read failure outranks the request's own error.
        let produced = producer
            .await
            .map_err(|e| CloudConvertError::Internal(format!("upload task: {e}")))?;
        if let Err(source) = produced {
            return Err(CloudConvertError::SourceRead {
                path: file.to_path_buf(),
                source,
            });
        }

        let response = sent.map_err(|source| CloudConvertError::Transport {
            url: process_url.to_string(),
            source,
        })?;
        let (status, body) = read_body(process_url, response).await?;
        let mut snapshot = decode_status(process_url, status, &body)?;
        snapshot.absolutize_urls(scheme_of(process_url));
        info!("Uploaded {} to {}", file.display(), process_url);
        Ok(snapshot)
    }

    async fn status(&self, process_url: &str) -> Result<StatusResponse, CloudConvertError> {
        let (status, body) = self.get(process_url, &[]).await?;
        let mut snapshot = decode_status(process_url, status, &body)?;
        snapshot.absolutize_urls(scheme_of(process_url));
        Ok(snapshot)
    }

    async fn cancel(&self, process_url: &str) -> Result<(), CloudConvertError> {
        let url = format!("{process_url}/cancel");
        let (status, _) = self.get(&url, &[]).await?;
        if !status.is_success() {
            warn!("Cancel of {} answered HTTP {}", process_url, status);
        }
        Ok(())
    }

    async fn delete(&self, process_url: &str) -> Result<(), CloudConvertError> {
        let url = format!("{process_url}/delete");
        let (status, _) = self.get(&url, &[]).await?;
        if !status.is_success() {
            warn!("Delete of {} answered HTTP {}", process_url, status);
        }
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<ByteStream, CloudConvertError> {
        debug!("Begin downloading {}", url);
        let sent = self.client.get(url).send().await;
        let response = sent.map_err(|source| CloudConvertError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            let (_, body) = read_body(url, response).await?;
            return Err(status_error(url, status, &body));
        }
        let owned = url.to_string();
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|source| CloudConvertError::Transport {
                url: owned.clone(),
                source,
            })
        });
        Ok(Box::pin(stream))
    }
}

async fn read_body(
    url: &str,
    response: reqwest::Response,
) -> Result<(StatusCode, Bytes), CloudConvertError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|source| CloudConvertError::Transport {
            url: url.to_string(),
            source,
        })?;
    Ok((status, body))
}

fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, CloudConvertError> {
    serde_json::from_slice(body).map_err(|e| CloudConvertError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a status snapshot. Error status codes are accepted only when the
/// body reports a failed job, so its message reaches the caller.
fn decode_status(
    url: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<StatusResponse, CloudConvertError> {
    let decoded = decode::<StatusResponse>(url, body);
    if status.is_success() {
        return decoded;
    }
    match decoded {
        Ok(s) if s.step == Step::Error => Ok(s),
        _ => Err(status_error(url, status, body)),
    }
}

fn status_error(url: &str, status: StatusCode, body: &[u8]) -> CloudConvertError {
    let text = String::from_utf8_lossy(body);
    let mut excerpt: String = text.trim().chars().take(BODY_EXCERPT).collect();
    if text.trim().chars().count() > BODY_EXCERPT {
        excerpt.push('…');
    }
    CloudConvertError::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
        body: excerpt,
    }
}
