//! Multipart upload body.
//!
//! The source file is read by a producer task into a bounded channel whose
//! receiving end is the request body, so reading and sending overlap and at
//! most [`PIPE_DEPTH`] chunks are held in memory at any time. When the
//! producer hits a read error it pushes that error into the body (failing the
//! request) and returns it from its join handle, where the caller picks it up.

use crate::config::UploadOptions;
use crate::error::CloudConvertError;
use bytes::{Bytes, BytesMut};
use reqwest::multipart::{Form, Part};
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

/// Bytes read from the source per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the reader and the request body.
pub const PIPE_DEPTH: usize = 4;

type Chunk = Result<Bytes, io::Error>;

/// The file part of an upload, ready to be attached to a form.
pub struct FileBody {
    pub body: reqwest::Body,
    pub len: Option<u64>,
    pub file_name: String,
    /// Resolves to the number of bytes read, or the read error.
    pub producer: JoinHandle<Result<u64, io::Error>>,
}

/// Metadata fields of the upload form, in send order.
///
/// Empty values are omitted. `email` is only sent when requested.
pub fn form_fields(output_format: &str, options: &UploadOptions) -> Vec<(String, String)> {
    let mut fields = vec![
        ("input".to_string(), "upload".to_string()),
        ("outputformat".to_string(), output_format.to_string()),
        (
            "output".to_string(),
            options.output.clone().unwrap_or_default(),
        ),
        (
            "callback".to_string(),
            options.callback.clone().unwrap_or_default(),
        ),
    ];
    if options.email {
        fields.push(("email".to_string(), "1".to_string()));
    }
    for (name, value) in &options.converter_options {
        fields.push((format!("options[{name}]"), value.clone()));
    }
    fields.retain(|(_, v)| !v.trim().is_empty());
    fields
}

/// Open `path` and start pumping it into a streaming request body.
pub async fn file_body(path: &Path) -> Result<FileBody, CloudConvertError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            CloudConvertError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            CloudConvertError::SourceRead {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    let len = file.metadata().await.ok().map(|m| m.len());
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let (body, producer) = pipe(file);
    Ok(FileBody {
        body,
        len,
        file_name,
        producer,
    })
}

/// Assemble the form: metadata fields first, then the `file` part.
pub fn multipart_form(
    fields: Vec<(String, String)>,
    file: FileBody,
) -> (Form, JoinHandle<Result<u64, io::Error>>) {
    // Field and file names go out verbatim; the history index matches on them.
    let mut form = Form::new().percent_encode_noop();
    for (name, value) in fields {
        form = form.text(name, value);
    }
    let part = match file.len {
        Some(len) => Part::stream_with_length(file.body, len),
        None => Part::stream(file.body),
    }
    .file_name(file.file_name);
    (form.part("file", part), file.producer)
}

/// Spawn a producer reading `reader` and return the consuming body.
pub fn pipe<R>(reader: R) -> (reqwest::Body, JoinHandle<Result<u64, io::Error>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Chunk>(PIPE_DEPTH);
    let producer = tokio::spawn(pump(reader, tx));
    let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
    (body, producer)
}

async fn pump<R>(mut reader: R, tx: mpsc::Sender<Chunk>) -> Result<u64, io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut sent = 0u64;
    loop {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!(bytes = sent, "Upload source drained");
                return Ok(sent);
            }
            Ok(n) => {
                sent += n as u64;
                if tx.send(Ok(buf.freeze())).await.is_err() {
                    // The request finished or failed without reading the rest.
                    debug!(bytes = sent, "Upload body dropped by the consumer");
                    return Ok(sent);
                }
            }
            Err(e) => {
                error!(bytes = sent, error = %e, "Reading upload source failed");
                let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio_stream::StreamExt;

    /// Yields `good` bytes, then fails.
    struct FailingReader {
        good: Vec<u8>,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.good.is_empty() {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk on fire")));
            }
            let n = self.good.len().min(buf.remaining());
            let chunk: Vec<u8> = self.good.drain(..n).collect();
            buf.put_slice(&chunk);
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn fields_skip_empty_values() {
        let opts = UploadOptions::default();
        let fields = form_fields("webp", &opts);
        assert_eq!(
            fields,
            vec![
                ("input".to_string(), "upload".to_string()),
                ("outputformat".to_string(), "webp".to_string()),
            ]
        );
    }

    #[test]
    fn fields_include_options() {
        let mut opts = UploadOptions {
            email: true,
            output: Some("dropbox".into()),
            callback: Some("https://hook.example/done".into()),
            ..Default::default()
        };
        opts.converter_options.insert("quality".into(), "80".into());
        opts.converter_options.insert("resize".into(), "".into());

        let fields = form_fields("jpg", &opts);
        let names: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        let expected = [
            "input",
            "outputformat",
            "output",
            "callback",
            "email",
            "options[quality]",
        ];
        assert_eq!(names, expected);
        assert!(fields.contains(&("email".to_string(), "1".to_string())));
        assert!(fields.contains(&("options[quality]".to_string(), "80".to_string())));
    }

    #[tokio::test]
    async fn pump_streams_all_chunks() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let (tx, rx) = mpsc::channel(PIPE_DEPTH);
        let producer = tokio::spawn(pump(std::io::Cursor::new(data.clone()), tx));

        let chunks: Vec<Chunk> = ReceiverStream::new(rx).collect().await;
        let received: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(received, data);
        assert_eq!(producer.await.unwrap().unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn pump_propagates_read_error() {
        let reader = FailingReader {
            good: b"partial".to_vec(),
        };
        let (tx, rx) = mpsc::channel(PIPE_DEPTH);
        let producer = tokio::spawn(pump(reader, tx));

        let chunks: Vec<Chunk> = ReceiverStream::new(rx).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0].as_ref().unwrap()[..], b"partial");
        assert!(chunks[1].is_err());

        let err = producer.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[tokio::test]
    async fn pump_stops_when_consumer_drops() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sent = pump(std::io::Cursor::new(vec![1u8; 10]), tx).await.unwrap();
        assert_eq!(sent, 10);
    }

    #[tokio::test]
    async fn file_body_missing_file() {
        let err = file_body(Path::new("/definitely/not/here.png"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CloudConvertError::FileNotFound { .. }));
    }
}
