//! One job end to end: seed URL in, published archive out.
//!
//! ## Cleanup
//!
//! All local artifacts (chapter workspaces and the zip) live in a per-job
//! [`tempfile::TempDir`]. It is removed when [`ChapterArchiver::run`]
//! returns, on success and on every error path alike. Jobs never share a
//! staging directory, so concurrent runs in one process cannot collide.

use crate::config::JobConfig;
use crate::error::JobError;
use crate::output::{ArchiveInfo, JobRequest, JobStats, JobSummary, PublicationInfo};
use crate::pipeline::archive::{archive_name, build_archive};
use crate::pipeline::chapter::{ChapterOptions, ChapterRunner};
use crate::pipeline::fetch::ResourceFetcher;
use crate::pipeline::publish::{publish, RetractionHandle};
use crate::pipeline::sequence::{plan_chapters, run_batch, BatchResult};
use crate::pipeline::url_pattern;
use crate::progress::{JobProgressCallback, NoopProgressCallback};
use crate::renderer::RendererFactory;
use crate::store::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Terminal success of a job.
#[derive(Debug)]
pub struct JobReport {
    pub summary: JobSummary,
    /// Pending deletion of the published archive.
    pub retraction: RetractionHandle,
}

/// Wires the pipeline to its collaborators.
pub struct ChapterArchiver {
    config: JobConfig,
    renderers: Arc<dyn RendererFactory>,
    fetcher: Arc<dyn ResourceFetcher>,
    store: Arc<dyn ObjectStore>,
}

impl ChapterArchiver {
    pub fn new(
        config: JobConfig,
        renderers: Arc<dyn RendererFactory>,
        fetcher: Arc<dyn ResourceFetcher>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            renderers,
            fetcher,
            store,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn progress(&self) -> &dyn JobProgressCallback {
        match &self.config.progress_callback {
            Some(cb) => cb.as_ref(),
            None => &NoopProgressCallback,
        }
    }

    /// Run one job.
    ///
    /// # Returns
    /// `Ok(JobReport)` when at least one chapter was archived and published,
    /// even if others failed (see [`JobSummary::is_partial`]).
    ///
    /// # Errors
    /// - invalid request
    /// - renderer could not be opened
    /// - zero chapters processed
    /// - archive or publish failure
    pub async fn run(&self, request: &JobRequest) -> Result<JobReport, JobError> {
        let total_start = Instant::now();
        request.validate()?;
        let progress = self.progress();

        // ── Step 1: Resolve template and plan ────────────────────────────
        let seed = url_pattern::resolve(request.seed_url.trim());
        let start = request.start.or(seed.start).unwrap_or(1);
        let direction = request.direction.unwrap_or_else(|| {
            seed.template
                .label()
                .map(|label| self.config.numbering.direction_for(label))
                .unwrap_or_default()
        });
        let plan = plan_chapters(&seed.template, start, request.count, direction);
        info!(
            "Job: template {} start {} count {} ({:?}) → {} chapter(s)",
            seed.template,
            start,
            request.count,
            direction,
            plan.indices.len()
        );
        if plan.clamped {
            progress.on_warning(
                "Seed URL has no recognizable chapter number; only one chapter will be fetched.",
            );
        }
        progress.on_job_start(plan.indices.len());

        // ── Step 2: Per-job staging ──────────────────────────────────────
        let staging = self.create_staging()?;
        debug!("Staging in {}", staging.path().display());

        // ── Step 3: Acquire chapters ─────────────────────────────────────
        let acquire_start = Instant::now();
        let mut renderer = self
            .renderers
            .open()
            .await
            .map_err(|e| JobError::RendererUnavailable(e.to_string()))?;

        let options = ChapterOptions {
            format: request.format,
            merge: request.merge,
        };
        let batch = {
            let mut runner = ChapterRunner::new(
                &self.config,
                renderer.as_mut(),
                self.fetcher.as_ref(),
                staging.path(),
                options,
            );
            run_batch(&mut runner, &seed.template, &plan, progress).await
        };
        if let Err(e) = renderer.close().await {
            warn!("Renderer did not close cleanly: {}", e);
        }
        drop(renderer);
        let acquire_duration_ms = acquire_start.elapsed().as_millis() as u64;

        progress.on_batch_complete(batch.processed_count(), batch.attempted);
        if batch.processed_count() == 0 {
            return Err(JobError::NoChaptersProcessed {
                attempted: batch.attempted,
                first_error: batch.first_error(),
            });
        }

        // ── Step 4: Archive ──────────────────────────────────────────────
        let publish_start = Instant::now();
        let name = archive_name(&self.config.archive_prefix);
        let dest = staging.path().join(&name);
        let chapters: Vec<(u32, PathBuf)> = batch
            .completed
            .iter()
            .map(|c| (c.summary.index, c.workspace.path().to_path_buf()))
            .collect();
        let archive = {
            let dest = dest.clone();
            tokio::task::spawn_blocking(move || build_archive(&dest, &chapters))
                .await
                .map_err(|e| JobError::Internal(format!("archive task: {e}")))??
        };

        // ── Step 5: Publish ──────────────────────────────────────────────
        progress.on_publish_start(&archive.name, archive.bytes);
        let bytes = tokio::fs::read(&archive.path)
            .await
            .map_err(|e| JobError::Archive {
                path: archive.path.clone(),
                detail: e.to_string(),
            })?;
        let remote_path = format!("/{}", archive.name);
        let (publication, retraction) = publish(
            &self.store,
            &remote_path,
            bytes,
            Duration::from_secs(self.config.retraction_delay_secs),
        )
        .await?;
        let publish_duration_ms = publish_start.elapsed().as_millis() as u64;

        let summary = summarize(
            request,
            seed.template.to_string(),
            plan.clamped,
            batch,
            ArchiveInfo {
                name: archive.name,
                bytes: archive.bytes,
                entries: archive.entries,
            },
            publication,
            JobStats {
                total_duration_ms: total_start.elapsed().as_millis() as u64,
                acquire_duration_ms,
                publish_duration_ms,
            },
        );
        info!(
            "Job complete: {}/{} chapter(s), {} page(s), link {}",
            summary.processed_count(),
            summary.attempted_chapters,
            summary.total_pages(),
            summary.publication.link
        );

        // `staging` drops here and takes every local artifact with it.
        Ok(JobReport {
            summary,
            retraction,
        })
    }

    fn create_staging(&self) -> Result<TempDir, JobError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chapter2zip-");
        match &self.config.staging_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|source| JobError::Staging {
                    path: root.clone(),
                    source,
                })?;
                builder.tempdir_in(root).map_err(|source| JobError::Staging {
                    path: root.clone(),
                    source,
                })
            }
            None => builder.tempdir().map_err(|source| JobError::Staging {
                path: std::env::temp_dir(),
                source,
            }),
        }
    }
}

fn summarize(
    request: &JobRequest,
    template: String,
    count_clamped: bool,
    batch: BatchResult,
    archive: ArchiveInfo,
    publication: PublicationInfo,
    stats: JobStats,
) -> JobSummary {
    JobSummary {
        seed_url: request.seed_url.clone(),
        template,
        requested_chapters: request.count,
        attempted_chapters: batch.attempted,
        count_clamped,
        stopped_at: batch.stopped_at,
        format: request.format,
        merge: request.merge,
        chapters: batch.completed.into_iter().map(|c| c.summary).collect(),
        failures: batch.failures,
        archive,
        publication,
        stats,
    }
}
