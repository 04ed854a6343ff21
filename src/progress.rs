//! Progress-callback trait for job and chapter events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::JobConfigBuilder::progress_callback`] to follow a job
//! from acceptance to its terminal state. The CLI turns these into an
//! indicatif progress bar; a chat front end would edit a status message.
//!
//! # Example
//!
//! ```rust
//! use chapter2zip::{JobConfig, JobProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_chapter_complete(&self, index: u32, pages: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chapter {index}: {pages} pages");
//!     }
//! }
//!
//! let config = JobConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as a job advances.
///
/// Chapters are processed one at a time, so chapter events for one job
/// never interleave. All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// The worker accepted the job and queued it.
    fn on_job_accepted(&self, job_id: &str) {
        let _ = job_id;
    }

    /// Chapter plan is final; `total_chapters` indices will be attempted at most.
    fn on_job_start(&self, total_chapters: usize) {
        let _ = total_chapters;
    }

    /// Called before rendering a chapter.
    ///
    /// # Arguments
    /// * `index`   : chapter index being fetched
    /// * `position`: 1-based position in the plan
    /// * `total`   : plan length
    fn on_chapter_start(&self, index: u32, position: usize, total: usize) {
        let _ = (index, position, total);
    }

    /// A chapter finished with `pages` files in its workspace.
    fn on_chapter_complete(&self, index: u32, pages: usize) {
        let _ = (index, pages);
    }

    /// A chapter failed; `terminal` is true when it ends the batch.
    fn on_chapter_error(&self, index: u32, error: &str, terminal: bool) {
        let _ = (index, error, terminal);
    }

    /// Something the caller should see that does not fail the job.
    fn on_warning(&self, message: &str) {
        let _ = message;
    }

    /// Archive built; upload is starting.
    fn on_publish_start(&self, archive_name: &str, bytes: u64) {
        let _ = (archive_name, bytes);
    }

    /// Batch finished. Called before publishing, with the success count.
    fn on_batch_complete(&self, processed: usize, attempted: usize) {
        let _ = (processed, attempted);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::JobConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
