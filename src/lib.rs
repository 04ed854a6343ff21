//! # chapter2zip
//!
//! Fetch consecutive comic/webtoon chapters from a reader site, normalize
//! their page images, and publish them as one zip behind a temporary
//! share link.
//!
//! ## Why this crate?
//!
//! Reader sites serve one chapter per page, lazy-load the images as you
//! scroll, and mix in thumbnails and banners. Saving a run of chapters by
//! hand means scrolling every page, filtering out the junk, and zipping the
//! rest. This crate does it from a single chapter URL: it infers where the
//! chapter number lives in the URL, walks forward (or backward) chapter by
//! chapter, keeps only reading-width images, and hands back a link that
//! expires on its own.
//!
//! ## Pipeline Overview
//!
//! ```text
//! seed URL
//!  │
//!  ├─ 1. Pattern   find the chapter number in the URL → template
//!  ├─ 2. Sequence  plan indices; stop at the first not-found chapter
//!  ├─ 3. Chapter   render, wait, scroll, extract lazy image locators
//!  ├─ 4. Images    fetch, drop narrow ones, re-encode (jpg / webp / png)
//!  ├─ 5. Merge     stack page pairs vertically, renumber 001, 002, …
//!  ├─ 6. Archive   <index>/<NNN>.<ext> entries in one zip
//!  └─ 7. Publish   upload, share link, delete again after a delay
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chapter2zip::{
//!     ChapterArchiver, HtmlRendererFactory, HttpFetcher, JobConfig, JobRequest, LocalStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = JobConfig::default();
//!     let archiver = ChapterArchiver::new(
//!         config,
//!         Arc::new(HtmlRendererFactory::new(30)?),
//!         Arc::new(HttpFetcher::new(50)?),
//!         Arc::new(LocalStore::new("./published")),
//!     );
//!
//!     let request = JobRequest::new("https://reader.example.com/series/chapter-10", 3);
//!     let report = archiver.run(&request).await?;
//!     println!("{}", report.summary.publication.link);
//!
//!     // Keep the process alive until the archive is retracted.
//!     report.retraction.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `chapter2zip` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `browser` | off     | Headless Chrome renderer via chromiumoxide, for sites that build pages in JavaScript |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! chapter2zip = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Renderer
//!
//! | Renderer  | Needs        | Lazy images | Best for |
//! |-----------|--------------|-------------|----------|
//! | `html`    | nothing      | `data-src` style attributes only | Server-rendered readers |
//! | `browser` | Chrome/Chromium | scrolls until the page settles | Script-built viewers |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod renderer;
pub mod store;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    EnvSettings, JobConfig, JobConfigBuilder, NumberingDirection, NumberingTable, OutputFormat,
    DEFAULT_IMAGE_SELECTOR, MAX_RETRACTION_DELAY_SECS,
};
pub use error::{ChapterError, JobError, RenderError, ResourceError, StoreError};
pub use job::{ChapterArchiver, JobReport};
pub use output::{
    ArchiveInfo, ChapterFailure, ChapterSummary, JobRequest, JobStats, JobSummary, PublicationInfo,
};
pub use pipeline::fetch::{HttpFetcher, ResourceFetcher};
pub use pipeline::publish::{RetractionHandle, RetractionOutcome};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use renderer::html::HtmlRendererFactory;
pub use renderer::{PageRenderer, RendererFactory};
pub use store::{DropboxStore, LocalStore, ObjectStore};
pub use worker::{JobTicket, JobWorker};

#[cfg(feature = "browser")]
pub use renderer::browser::BrowserRendererFactory;
