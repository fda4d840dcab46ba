//! Download of a finished conversion.
//!
//! The result is written to `<destination>.part` and renamed into place once
//! the last chunk is on disk, so a failed transfer never leaves a truncated
//! file under the destination name.

use crate::api::{ByteStream, ConversionApi};
use crate::error::CloudConvertError;
use crate::model::{DownloadSource, StatusResponse, Step};
use futures::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Resolve the result URL for `process_url`.
///
/// An explicit source wins. Otherwise the cached snapshot is used when it is
/// finished and carries an output URL; failing that, a fresh status is fetched.
pub async fn resolve_url(
    api: &dyn ConversionApi,
    process_url: &str,
    source: &DownloadSource,
    last_status: Option<&StatusResponse>,
) -> Result<String, CloudConvertError> {
    if let DownloadSource::Explicit(url) = source {
        return Ok(url.clone());
    }
    if let Some(s) = last_status {
        if s.step == Step::Finished && !s.output.url.is_empty() {
            return Ok(s.output.url.clone());
        }
    }
    let fresh = api.status(process_url).await?;
    if fresh.step == Step::Error {
        return Err(CloudConvertError::ConversionFailed {
            message: fresh.message,
        });
    }
    if fresh.output.url.is_empty() {
        return Err(CloudConvertError::NoOutputUrl {
            url: process_url.to_string(),
        });
    }
    Ok(fresh.output.url)
}

/// Fetch `url` and write it to `destination`. Returns the bytes written.
pub async fn download_to(
    api: &dyn ConversionApi,
    url: &str,
    destination: &Path,
) -> Result<u64, CloudConvertError> {
    info!("Downloading {} to {}", url, destination.display());
    let stream = api.download(url).await?;
    save_stream(stream, destination).await
}

/// Temporary sibling the download is written to.
pub fn partial_path(destination: &Path) -> Option<PathBuf> {
    let mut name = destination.file_name()?.to_os_string();
    name.push(".part");
    Some(destination.with_file_name(name))
}

/// Drain `stream` into `destination` atomically.
pub async fn save_stream(
    mut stream: ByteStream,
    destination: &Path,
) -> Result<u64, CloudConvertError> {
    let write_err = |source: io::Error| CloudConvertError::OutputWriteFailed {
        path: destination.to_path_buf(),
        source,
    };
    let tmp = partial_path(destination).ok_or_else(|| {
        write_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "destination has no file name",
        ))
    })?;

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
    let mut written = 0u64;
    let copied: Result<(), CloudConvertError> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)
    }
    .await;
    drop(file);

    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    tokio::fs::rename(&tmp, destination)
        .await
        .map_err(write_err)?;
    debug!("Wrote {} bytes to {}", written, destination.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use bytes::Bytes;

    fn chunks(parts: Vec<Result<&'static [u8], CloudConvertError>>) -> ByteStream {
        Box::pin(futures::stream::iter(
            parts.into_iter().map(|p| p.map(Bytes::from_static)),
        ))
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("out/b.webp")),
            Some(PathBuf::from("out/b.webp.part"))
        );
        assert_eq!(partial_path(Path::new("/")), None);
    }

    #[tokio::test]
    async fn writes_all_chunks_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/deeper/b.webp");
        let n = save_stream(chunks(vec![Ok(b"RIFF"), Ok(b"WEBP")]), &dest)
            .await
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(std::fs::read(&dest).unwrap(), b"RIFFWEBP");
        assert!(!partial_path(&dest).unwrap().exists());
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("b.webp");
        let err = save_stream(
            chunks(vec![
                Ok(b"RIFF"),
                Err(CloudConvertError::Internal("connection dropped".into())),
            ]),
            &dest,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("connection dropped"));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).unwrap().exists());
    }

    #[tokio::test]
    async fn explicit_source_skips_status() {
        let api = FakeApi::new();
        let url = resolve_url(
            &api,
            "https://fake.example/process/1",
            &DownloadSource::Explicit("https://dl.example/known".into()),
            None,
        )
        .await
        .unwrap();
        assert_eq!(url, "https://dl.example/known");
        assert_eq!(api.status_calls(), 0);
    }

    #[tokio::test]
    async fn cached_status_is_used() {
        let api = FakeApi::new();
        let last = FakeApi::finished("https://dl.example/cached");
        let url = resolve_url(
            &api,
            "https://fake.example/process/1",
            &DownloadSource::FromStatus,
            Some(&last),
        )
        .await
        .unwrap();
        assert_eq!(url, "https://dl.example/cached");
        assert_eq!(api.status_calls(), 0);
    }

    #[tokio::test]
    async fn fresh_status_error_fails() {
        let mut failed = FakeApi::step(Step::Error);
        failed.message = "expired".into();
        let api = FakeApi::new().with_statuses(vec![Ok(failed)]);
        let err = resolve_url(
            &api,
            "https://fake.example/process/1",
            &DownloadSource::FromStatus,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CloudConvertError::ConversionFailed { .. }));
    }

    #[tokio::test]
    async fn missing_output_url_fails() {
        let api = FakeApi::new().with_statuses(vec![Ok(FakeApi::step(Step::Finished))]);
        let err = resolve_url(
            &api,
            "https://fake.example/process/1",
            &DownloadSource::FromStatus,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CloudConvertError::NoOutputUrl { .. }));
    }
}
