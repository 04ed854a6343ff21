//! Chapter sequencing: plan the indices, then run them one by one.
//!
//! Chapters run strictly in plan order on a single renderer session. A
//! failed chapter is recorded and skipped, except for a not-found failure:
//! that means the batch has run past the last published chapter, so the
//! remaining indices are abandoned.

use crate::config::NumberingDirection;
use crate::error::ChapterError;
use crate::output::{ChapterFailure, ChapterSummary};
use crate::pipeline::url_pattern::UrlTemplate;
use crate::pipeline::workspace::ChapterWorkspace;
use crate::progress::JobProgressCallback;
use async_trait::async_trait;
use tracing::{info, warn};

/// Chapter indices to attempt, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub indices: Vec<u32>,
    /// The requested count was reduced to 1 because the template has no slot.
    pub clamped: bool,
}

/// Build the index plan for `count` chapters from `start`.
///
/// Descending plans stop before 0; ascending plans stop at `u32::MAX`.
pub fn plan_chapters(
    template: &UrlTemplate,
    start: u32,
    count: u32,
    direction: NumberingDirection,
) -> BatchPlan {
    let clamped = !template.is_parametrizable() && count > 1;
    let count = if template.is_parametrizable() {
        count
    } else {
        count.min(1)
    };
    if clamped {
        warn!(
            "Seed URL has no chapter number; requested count reduced to 1 ({})",
            template
        );
    }

    let indices = match direction {
        NumberingDirection::Ascending => (0..count).map_while(|i| start.checked_add(i)).collect(),
        NumberingDirection::Descending => (0..count)
            .map_while(|i| start.checked_sub(i).filter(|n| *n > 0))
            .collect(),
    };

    BatchPlan { indices, clamped }
}

/// A chapter that made it through the runner.
#[derive(Debug)]
pub struct ChapterOutcome {
    pub summary: ChapterSummary,
    pub workspace: ChapterWorkspace,
}

/// Runs one chapter. Implemented by the chapter runner; tests substitute
/// their own.
#[async_trait]
pub trait ChapterProcessor: Send {
    async fn process(&mut self, index: u32, url: &str) -> Result<ChapterOutcome, ChapterError>;
}

/// Everything the sequencer learned about one batch.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Successful chapters, in processing order.
    pub completed: Vec<ChapterOutcome>,
    pub failures: Vec<ChapterFailure>,
    pub attempted: usize,
    /// Index whose not-found failure ended the batch.
    pub stopped_at: Option<u32>,
}

impl BatchResult {
    pub fn processed_count(&self) -> usize {
        self.completed.len()
    }

    /// Display text of the first failure, for whole-job error reports.
    pub fn first_error(&self) -> String {
        self.failures
            .first()
            .map(|f| f.error.to_string())
            .unwrap_or_else(|| "no chapters were attempted".to_string())
    }
}

/// Run every index in `plan` through `processor`.
pub async fn run_batch(
    processor: &mut dyn ChapterProcessor,
    template: &UrlTemplate,
    plan: &BatchPlan,
    progress: &dyn JobProgressCallback,
) -> BatchResult {
    let mut result = BatchResult::default();
    let total = plan.indices.len();

    for (position, &index) in plan.indices.iter().enumerate() {
        let url = template.format(index);
        progress.on_chapter_start(index, position + 1, total);
        info!("Chapter {} ({}/{}): {}", index, position + 1, total, url);
        result.attempted += 1;

        match processor.process(index, &url).await {
            Ok(outcome) => {
                progress.on_chapter_complete(index, outcome.summary.pages);
                info!(
                    "Chapter {} done: {} page(s), {} skipped",
                    index, outcome.summary.pages, outcome.summary.skipped_resources
                );
                result.completed.push(outcome);
            }
            Err(error) => {
                let terminal = error.is_terminal();
                progress.on_chapter_error(index, &error.to_string(), terminal);
                if terminal {
                    info!("{}; stopping batch", error);
                    result.stopped_at = Some(index);
                } else {
                    warn!("{}", error);
                }
                result.failures.push(ChapterFailure { index, url, error });
                if terminal {
                    break;
                }
            }
        }
    }

    result
}
