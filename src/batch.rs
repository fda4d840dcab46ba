//! Bounded-concurrency conversion of many files.
//!
//! Every file is spawned as its own task; a shared [`Semaphore`] caps how many
//! of them hold a conversion in flight. A file keeps its permit from the moment
//! its conversion starts until it succeeds or fails. Failures are recorded per
//! file and never cancel siblings. The report lists files in input order.
//! When two sources map to the same destination only the first is converted;
//! the later ones fail with [`FileError::DuplicateDestination`].

use crate::api::ConversionApi;
use crate::config::ConversionConfig;
use crate::convert::resolve_api;
use crate::error::{CloudConvertError, FileError};
use crate::history::HistoryIndex;
use crate::output::{BatchReport, ConversionOutcome, FileResult};
use crate::process::{destination_for, Conversion, ConversionRequest, Stage};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Convert every file in `files` to `to_format`, next to its source.
///
/// Each destination is the source path with its extension replaced by
/// `to_format` (appended when the source has none).
pub async fn convert_batch<P: AsRef<Path>>(
    files: &[P],
    to_format: &str,
    config: &ConversionConfig,
) -> Result<BatchReport, CloudConvertError> {
    let api = resolve_api(config)?;
    let requests = files
        .iter()
        .map(|f| {
            let source = f.as_ref();
            ConversionRequest::new(source, destination_for(source, to_format))
                .destination_format(to_format)
        })
        .collect();
    Ok(run_batch(api, requests, config).await)
}

/// Run `requests` against `api` with at most `config.concurrency` in flight.
///
/// When `config.use_history` is set the history index is loaded first; if that
/// fails the batch proceeds without it.
pub async fn run_batch(
    api: Arc<dyn ConversionApi>,
    requests: Vec<ConversionRequest>,
    config: &ConversionConfig,
) -> BatchReport {
    let batch_start = Instant::now();
    let total = requests.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let history = if config.use_history {
        match HistoryIndex::load(api.as_ref(), config.concurrency).await {
            Ok(index) => index,
            Err(e) => {
                warn!(
                    "Could not load conversion history, converting everything: {}",
                    e
                );
                HistoryIndex::new()
            }
        }
    } else {
        HistoryIndex::new()
    };
    let history = Arc::new(history);
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let shared = Arc::new(config.clone());

    info!(
        "Converting {} files, {} at a time",
        total,
        config.concurrency.max(1)
    );

    let mut claimed = HashSet::new();
    let handles: Vec<_> = requests
        .into_iter()
        .enumerate()
        .map(|(index, request)| {
            let duplicate = !claimed.insert(request.destination.clone());
            let api = api.clone();
            let history = history.clone();
            let semaphore = semaphore.clone();
            let config = shared.clone();
            let source = request.source.clone();
            let destination = request.destination.clone();
            let handle = tokio::spawn(async move {
                if duplicate {
                    return duplicate_destination(index, total, &request, &config);
                }
                let permit = semaphore.acquire_owned().await;
                let _permit = match permit {
                    Ok(p) => p,
                    Err(e) => {
                        let err = FileError::Aborted {
                            path: request.source.clone(),
                            detail: e.to_string(),
                        };
                        return failed(&request, err, 0);
                    }
                };
                run_file(api, &history, index, total, &request, &config).await
            });
            (source, destination, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(total);
    for (index, (source, destination, handle)) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(result) => results.push(result),
            Err(join_err) => {
                let err = FileError::Aborted {
                    path: source.clone(),
                    detail: join_err.to_string(),
                };
                if let Some(ref cb) = config.progress_callback {
                    cb.on_file_error(index, total, &err);
                }
                results.push(FileResult {
                    source,
                    destination,
                    outcome: None,
                    error: Some(err),
                    duration_ms: 0,
                });
            }
        }
    }

    let report = BatchReport::from_results(results, batch_start.elapsed().as_millis() as u64);
    info!(
        "Batch complete: {}/{} succeeded ({} reused), {}ms",
        report.stats.succeeded(),
        report.stats.total_files,
        report.stats.reused,
        report.stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(&report.stats);
    }
    report
}

/// One file, from permit to terminal outcome.
async fn run_file(
    api: Arc<dyn ConversionApi>,
    history: &HistoryIndex,
    index: usize,
    total: usize,
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> FileResult {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_file_start(index, total, &request.source);
    }

    let result = convert_one(api, history, request, config).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(outcome) => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_file_complete(index, total, &request.source, &outcome);
            }
            FileResult {
                source: request.source.clone(),
                destination: request.destination.clone(),
                outcome: Some(outcome),
                error: None,
                duration_ms,
            }
        }
        Err((stage, e)) => {
            let err = FileError::at(stage, &request.source, &e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_file_error(index, total, &err);
            }
            failed(request, err, duration_ms)
        }
    }
}

/// Reuse a history hit, or run the full conversion.
async fn convert_one(
    api: Arc<dyn ConversionApi>,
    history: &HistoryIndex,
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, (Stage, CloudConvertError)> {
    if let Some(url) = history.lookup(&request.source) {
        info!(
            "{} was converted before, downloading {}",
            request.source.display(),
            url
        );
        let mut conversion = Conversion::from_history(api, request, url);
        return conversion
            .run(config)
            .await
            .map_err(|e| (Stage::Download, e));
    }

    let mut conversion = Conversion::new(api, request)
        .await
        .map_err(|e| (Stage::Create, e))?;
    let result = conversion.run(config).await;
    result.map_err(|e| (conversion.failed_stage().unwrap_or(Stage::Create), e))
}

fn duplicate_destination(
    index: usize,
    total: usize,
    request: &ConversionRequest,
    config: &ConversionConfig,
) -> FileResult {
    warn!(
        "Skipping {}: {} is already the destination of an earlier file",
        request.source.display(),
        request.destination.display()
    );
    let err = FileError::DuplicateDestination {
        path: request.source.clone(),
        destination: request.destination.clone(),
    };
    if let Some(ref cb) = config.progress_callback {
        cb.on_file_error(index, total, &err);
    }
    failed(request, err, 0)
}

fn failed(request: &ConversionRequest, err: FileError, duration_ms: u64) -> FileResult {
    FileResult {
        source: request.source.clone(),
        destination: request.destination.clone(),
        outcome: None,
        error: Some(err),
        duration_ms,
    }
}
