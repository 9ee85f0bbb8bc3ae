//! Progress-observer trait for conversion lifecycle events.
//!
//! Inject an [`Arc<dyn ConversionProgress>`] via
//! [`crate::config::ConversionConfigBuilder::progress`] to receive real-time
//! events as a document moves through detection, extraction, normalisation
//! and validation.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a database record,
//! or a terminal progress bar — without the library knowing anything about how
//! the host application communicates. The trait is `Send + Sync` because the
//! heavy extraction work runs on a blocking worker thread, not on the caller's
//! task.
//!
//! # Example
//!
//! ```rust
//! use pdfmd::{ConversionProgress, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     pages_done: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgress for CountingObserver {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize) {
//!         self.pages_done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done", page_num, total_pages);
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver {
//!     pages_done: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress(observer as Arc<dyn ConversionProgress>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as a document is processed.
///
/// Implementations must be `Send + Sync`: page events fire from the blocking
/// extraction worker while normalisation and validation events fire from the
/// async caller. All methods have default no-op implementations so callers
/// only override what they care about.
pub trait ConversionProgress: Send + Sync {
    /// Called once after type detection, before any conversion work.
    ///
    /// # Arguments
    /// * `pdf_type`    — detected type (`native`, `scanned`, `mixed`, `unknown`)
    /// * `total_pages` — page count reported by the extraction backend
    fn on_type_detected(&self, pdf_type: &str, total_pages: usize) {
        let _ = (pdf_type, total_pages);
    }

    /// Called once when a conversion routine starts running.
    ///
    /// # Arguments
    /// * `strategy`    — routine that was dispatched (`native`, `ocr`, `hybrid`)
    /// * `total_pages` — pages the routine will process
    fn on_conversion_start(&self, strategy: &str, total_pages: usize) {
        let _ = (strategy, total_pages);
    }

    /// Called when a page has been reconstructed into Markdown.
    ///
    /// Only the native routine reports per-page progress; OCR backends
    /// convert whole documents in one call.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages in the document
    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called after the normaliser has run.
    ///
    /// # Arguments
    /// * `changes`        — number of edits the normaliser applied
    /// * `fidelity_score` — structural fidelity score, 0–100
    fn on_normalized(&self, changes: usize, fidelity_score: f32) {
        let _ = (changes, fidelity_score);
    }

    /// Called after the LLM validator has produced a report.
    ///
    /// Not called when validation is disabled or the endpoint is
    /// unreachable.
    ///
    /// # Arguments
    /// * `quality_score` — model-reported quality, 0–100, if it gave one
    fn on_validated(&self, quality_score: Option<f64>) {
        let _ = quality_score;
    }

    /// Called once when the conversion finishes successfully.
    ///
    /// # Arguments
    /// * `elapsed_ms` — wall-clock duration of the whole conversion
    fn on_complete(&self, elapsed_ms: u64) {
        let _ = elapsed_ms;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no observer is configured.
pub struct NoopProgress;

impl ConversionProgress for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressObserver = Arc<dyn ConversionProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingObserver {
        detected: Arc<AtomicUsize>,
        pages: Arc<AtomicUsize>,
        normalized: Arc<AtomicUsize>,
        completed_ms: Arc<AtomicUsize>,
    }

    impl ConversionProgress for TrackingObserver {
        fn on_type_detected(&self, _pdf_type: &str, total_pages: usize) {
            self.detected.store(total_pages, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_normalized(&self, changes: usize, _fidelity_score: f32) {
            self.normalized.store(changes, Ordering::SeqCst);
        }

        fn on_complete(&self, elapsed_ms: u64) {
            self.completed_ms.store(elapsed_ms as usize, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let obs = NoopProgress;
        obs.on_type_detected("native", 12);
        obs.on_conversion_start("native", 12);
        obs.on_page_complete(1, 12);
        obs.on_normalized(4, 80.0);
        obs.on_validated(Some(85.0));
        obs.on_complete(1500);
    }

    #[test]
    fn tracking_observer_receives_events() {
        let tracker = TrackingObserver {
            detected: Arc::new(AtomicUsize::new(0)),
            pages: Arc::new(AtomicUsize::new(0)),
            normalized: Arc::new(AtomicUsize::new(0)),
            completed_ms: Arc::new(AtomicUsize::new(0)),
        };

        tracker.on_type_detected("native", 3);
        assert_eq!(tracker.detected.load(Ordering::SeqCst), 3);

        tracker.on_page_complete(1, 3);
        tracker.on_page_complete(2, 3);
        tracker.on_page_complete(3, 3);
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 3);

        tracker.on_normalized(7, 100.0);
        assert_eq!(tracker.normalized.load(Ordering::SeqCst), 7);

        tracker.on_complete(950);
        assert_eq!(tracker.completed_ms.load(Ordering::SeqCst), 950);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let obs: Arc<dyn ConversionProgress> = Arc::new(NoopProgress);
        obs.on_type_detected("scanned", 40);
        obs.on_conversion_start("ocr", 40);
        obs.on_complete(60_000);
    }
}
