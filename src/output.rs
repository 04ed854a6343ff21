//! Request and report types that cross the library boundary.

use crate::config::{NumberingDirection, OutputFormat};
use crate::error::{ChapterError, JobError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// URL of the first chapter; should embed the chapter number.
    pub seed_url: String,
    /// First chapter index. `None` uses the number found in the seed URL.
    pub start: Option<u32>,
    /// How many chapters to attempt (≥ 1).
    pub count: u32,
    /// Pairwise-merge lossy pages.
    pub merge: bool,
    /// Format pages are persisted in.
    pub format: OutputFormat,
    /// Overrides the per-label numbering table when set.
    pub direction: Option<NumberingDirection>,
}

impl JobRequest {
    /// A request for `count` chapters starting at the seed, merged JPEG output.
    pub fn new(seed_url: impl Into<String>, count: u32) -> Self {
        Self {
            seed_url: seed_url.into(),
            start: None,
            count,
            merge: true,
            format: OutputFormat::default(),
            direction: None,
        }
    }

    pub fn start(mut self, index: u32) -> Self {
        self.start = Some(index);
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn direction(mut self, direction: NumberingDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Reject requests that can never succeed, before a job is accepted.
    pub fn validate(&self) -> Result<(), JobError> {
        let url = self.seed_url.trim();
        let scheme_ok = url.starts_with("http://") || url.starts_with("https://");
        if !scheme_ok || reqwest::Url::parse(url).is_err() {
            return Err(JobError::InvalidInput {
                input: self.seed_url.clone(),
            });
        }
        if self.count == 0 {
            return Err(JobError::InvalidConfig(
                "chapter count must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// One successfully processed chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub index: u32,
    pub url: String,
    /// Files in the final, renumbered workspace.
    pub pages: usize,
    /// Locators that failed fetch, decode, or the width check.
    pub skipped_resources: usize,
    /// Pairs merged into single pages.
    pub merged_pairs: usize,
}

/// One failed chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub index: u32,
    pub url: String,
    pub error: ChapterError,
}

/// The uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// `<prefix>_<8 hex>.zip`
    pub name: String,
    pub bytes: u64,
    pub entries: usize,
}

/// Where the archive lives and when it disappears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationInfo {
    pub remote_path: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub retract_at: DateTime<Utc>,
}

/// Wall-clock timings for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_duration_ms: u64,
    pub acquire_duration_ms: u64,
    pub publish_duration_ms: u64,
}

/// Terminal success report for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub seed_url: String,
    /// Template with `{}` marking the chapter slot (or the seed itself).
    pub template: String,
    pub requested_chapters: u32,
    pub attempted_chapters: usize,
    /// True when a non-parametrizable seed forced the count down to 1.
    pub count_clamped: bool,
    /// Index whose not-found signal ended the batch, if any.
    pub stopped_at: Option<u32>,
    pub format: OutputFormat,
    pub merge: bool,
    pub chapters: Vec<ChapterSummary>,
    pub failures: Vec<ChapterFailure>,
    pub archive: ArchiveInfo,
    pub publication: PublicationInfo,
    pub stats: JobStats,
}

impl JobSummary {
    /// Number of chapters that made it into the archive.
    pub fn processed_count(&self) -> usize {
        self.chapters.len()
    }

    /// Some chapters succeeded, but not everything requested.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() || self.chapters.len() < self.requested_chapters as usize
    }

    /// Total pages across all archived chapters.
    pub fn total_pages(&self) -> usize {
        self.chapters.iter().map(|c| c.pages).sum()
    }
}
