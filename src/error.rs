//! Error types for the chapter2zip library.
//!
//! Errors are layered by how far they are allowed to travel:
//!
//! * [`JobError`] (**Fatal**): the job cannot produce an archive at all
//!   (bad request, zero chapters succeeded, upload failed). Returned as
//!   `Err(JobError)` from [`crate::job::ChapterArchiver::run`].
//!
//! * [`ChapterError`] (**Per chapter**): one chapter failed but the batch
//!   goes on. Stored inside [`crate::output::ChapterFailure`]. Only
//!   [`ChapterError::NotFound`] stops the sequencer early.
//!
//! * [`ResourceError`] (**Per image**): one page image was unusable. Logged
//!   and skipped by the chapter runner, never surfaced further.
//!
//! [`RenderError`] and [`StoreError`] are the vocabularies of the two
//! external collaborators (page renderer, object store); the pipeline maps
//! them into the layers above.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by a job.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The seed is not an absolute HTTP/HTTPS URL.
    #[error("Invalid seed URL '{input}': expected an absolute http:// or https:// URL")]
    InvalidInput { input: String },

    /// Output format outside the supported set.
    #[error("Unsupported output format '{format}'\nChoose one of: jpg, webp, png.")]
    UnsupportedFormat { format: String },

    /// Builder or request validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required environment variable is not set.
    #[error("Missing environment variable {name}\n{hint}")]
    MissingEnv { name: &'static str, hint: String },

    // ── Acquisition errors ────────────────────────────────────────────────
    /// The page renderer could not be started.
    #[error("Page renderer could not be started: {0}")]
    RendererUnavailable(String),

    /// Every attempted chapter failed; nothing to archive.
    #[error("No chapters were processed ({attempted} attempted).\nFirst error: {first_error}")]
    NoChaptersProcessed { attempted: usize, first_error: String },

    // ── Packaging / publishing errors ─────────────────────────────────────
    /// Staging directory could not be prepared.
    #[error("Failed to prepare staging directory '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Zip creation failed.
    #[error("Failed to build archive '{path}': {detail}")]
    Archive { path: PathBuf, detail: String },

    /// Upload or share-link creation failed.
    #[error("Failed to publish '{remote_path}': {detail}")]
    Publish { remote_path: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chapter.
///
/// The sequencer records it and moves on to the next index, except for
/// [`ChapterError::NotFound`] which ends the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChapterError {
    /// No image-bearing element appeared within the render timeout.
    #[error("Chapter {index}: no images appeared within {secs}s")]
    RenderTimeout { index: u32, secs: u64 },

    /// The page rendered but yielded zero image locators.
    #[error("Chapter {index}: no image resources found on page")]
    NoResourcesFound { index: u32 },

    /// Every locator failed to fetch, decode, or pass the width check.
    #[error("Chapter {index}: none of {attempted} images were usable")]
    NoValidImages { index: u32, attempted: usize },

    /// The source signalled that the chapter does not exist.
    #[error("Chapter {index}: not found ({reason})")]
    NotFound { index: u32, reason: String },

    /// Anything else that went wrong inside the chapter boundary.
    #[error("Chapter {index}: processing failed: {detail}")]
    Processing { index: u32, detail: String },
}

impl ChapterError {
    /// Chapter index the error belongs to.
    pub fn index(&self) -> u32 {
        match self {
            ChapterError::RenderTimeout { index, .. }
            | ChapterError::NoResourcesFound { index }
            | ChapterError::NoValidImages { index, .. }
            | ChapterError::NotFound { index, .. }
            | ChapterError::Processing { index, .. } => *index,
        }
    }

    /// Whether this error ends the batch instead of skipping one chapter.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChapterError::NotFound { .. })
    }
}

/// Why a single page image was skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("fetch failed for {url}: {detail}")]
    Fetch { url: String, detail: String },

    #[error("fetch timed out after {secs}s for {url}")]
    Timeout { url: String, secs: u64 },

    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("image is {width}px wide, minimum is {min}px")]
    TooNarrow { width: u32, min: u32 },

    #[error("could not encode image: {0}")]
    Encode(String),
}

/// Errors raised by a [`crate::renderer::PageRenderer`].
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("render timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("page not found (HTTP {status})")]
    NotFound { status: u16 },

    #[error("navigation to {url} failed: {detail}")]
    Navigation { url: String, detail: String },

    #[error("invalid selector '{0}'")]
    Selector(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("renderer launch failed: {0}")]
    Launch(String),

    #[error("no page loaded; call navigate() first")]
    NoPage,
}

/// Errors raised by a [`crate::store::ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A shared link for the path already exists. Recoverable: look it up.
    #[error("shared link already exists for '{path}'")]
    LinkAlreadyExists { path: String },

    #[error("'{path}' not found in store")]
    NotFound { path: String },

    #[error("store rejected credentials: {0}")]
    Unauthorized(String),

    #[error("store API error (HTTP {status}): {summary}")]
    Api { status: u16, summary: String },

    #[error("store request failed: {0}")]
    Request(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
