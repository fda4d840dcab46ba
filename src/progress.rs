//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the batch driver works through its files. The CLI uses this to
//! drive its progress bar.
//!
//! # Example
//!
//! ```rust
//! use cloudconvert::{BatchProgressCallback, ConversionConfig, ConversionOutcome};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, source: &Path, _outcome: &ConversionOutcome) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{}/{}] {} done", index + 1, total, source.display());
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::FileError;
use crate::output::{BatchStats, ConversionOutcome};
use std::path::Path;
use std::sync::Arc;

/// Called by the batch driver as files move through their conversions.
///
/// Files run concurrently, so `on_file_start`, `on_file_complete` and
/// `on_file_error` may be called from different tasks at once; protect shared
/// mutable state accordingly. `index` is the 0-based position of the file in
/// the input. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any file is started.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file has acquired its permit and its conversion begins.
    fn on_file_start(&self, index: usize, total_files: usize, source: &Path) {
        let _ = (index, total_files, source);
    }

    /// Called when a file finished successfully.
    fn on_file_complete(
        &self,
        index: usize,
        total_files: usize,
        source: &Path,
        outcome: &ConversionOutcome,
    ) {
        let _ = (index, total_files, source, outcome);
    }

    /// Called when a file failed.
    fn on_file_error(&self, index: usize, total_files: usize, error: &FileError) {
        let _ = (index, total_files, error);
    }

    /// Called once after every file has reached a terminal outcome.
    fn on_batch_complete(&self, stats: &BatchStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        total: AtomicUsize,
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        finished_failed: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total_files: usize) {
            self.total.store(total_files, Ordering::SeqCst);
        }

        fn on_file_start(&self, _index: usize, _total: usize, _source: &Path) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_complete(&self, _i: usize, _t: usize, _s: &Path, _o: &ConversionOutcome) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_error(&self, _index: usize, _total: usize, _error: &FileError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, stats: &BatchStats) {
            self.finished_failed.store(stats.failed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_file_start(0, 2, Path::new("a.png"));
        let converted = ConversionOutcome::Converted { bytes: 1 };
        cb.on_file_complete(0, 2, Path::new("a.png"), &converted);
        cb.on_file_error(
            1,
            2,
            &FileError::Aborted {
                path: "b.png".into(),
                detail: "panic".into(),
            },
        );
        cb.on_batch_complete(&BatchStats::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_batch_start(3);
        assert_eq!(tracker.total.load(Ordering::SeqCst), 3);

        for (i, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
            tracker.on_file_start(i, 3, Path::new(name));
        }
        let reused = ConversionOutcome::Reused { bytes: 9 };
        let converted = ConversionOutcome::Converted { bytes: 4 };
        tracker.on_file_complete(0, 3, Path::new("a.png"), &reused);
        tracker.on_file_complete(1, 3, Path::new("b.png"), &converted);
        tracker.on_file_error(
            2,
            3,
            &FileError::ConversionFailed {
                path: "c.png".into(),
                detail: "corrupt".into(),
            },
        );

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);

        tracker.on_batch_complete(&BatchStats {
            failed: 1,
            ..Default::default()
        });
        assert_eq!(tracker.finished_failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_file_start(0, 10, Path::new("x.docx"));
    }
}
