//! Progress-callback trait for per-document and per-page run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive events
//! as the orchestrator works through the batch. The CLI uses this to drive
//! its progress bar; library callers can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use lector_dj::{ClassificationResult, RunConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl RunProgressCallback for PageCounter {
//!     fn on_page_classified(&self, _label: &str, _page: usize, _result: &ClassificationResult) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = RunConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{ClassificationResult, RunStats};
use std::sync::Arc;

/// Called by the orchestrator as it processes the batch.
///
/// All methods default to no-ops so implementors only override what they
/// need.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after scanning, before the first document.
    fn on_run_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called before a document is rasterised.
    ///
    /// `index` is 1-based.
    fn on_document_start(&self, label: &str, index: usize, total_documents: usize) {
        let _ = (label, index, total_documents);
    }

    /// Called when one page has a result (including sentinel results).
    fn on_page_classified(&self, label: &str, page_num: usize, result: &ClassificationResult) {
        let _ = (label, page_num, result);
    }

    /// Called when a document yielded zero pages.
    fn on_document_error(&self, label: &str, error: &str) {
        let _ = (label, error);
    }

    /// Called once after every document has been attempted.
    fn on_run_complete(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Category;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        documents: AtomicUsize,
        pages: AtomicUsize,
        errors: AtomicUsize,
    }

    impl RunProgressCallback for TrackingCallback {
        fn on_document_start(&self, _label: &str, _index: usize, _total: usize) {
            self.documents.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_classified(&self, _label: &str, _page: usize, _result: &ClassificationResult) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _label: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(2);
        cb.on_document_start("a.pdf", 1, 2);
        cb.on_page_classified("a.pdf", 1, &ClassificationResult::unrecognized("x"));
        cb.on_document_error("b.pdf", "corrupt");
        cb.on_run_complete(&RunStats::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let result = ClassificationResult::new(Category::Invoice, 0.9, "total due");

        tracker.on_document_start("a.pdf", 1, 2);
        tracker.on_page_classified("a.pdf", 1, &result);
        tracker.on_page_classified("a.pdf", 2, &result);
        tracker.on_document_start("b.pdf", 2, 2);
        tracker.on_document_error("b.pdf", "corrupt");

        assert_eq!(tracker.documents.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
