//! Background execution of jobs.
//!
//! A job takes minutes (page renders, scroll waits, dozens of downloads), so
//! whatever triggered it must not wait inline. [`JobWorker`] owns a bounded
//! queue and a single task that drains it one job at a time; callers get a
//! [`JobTicket`] back as soon as the request is accepted and await the
//! terminal result through it whenever they like.
//!
//! ```text
//! submit() ──validate──▶ queue ──▶ worker task ──▶ ChapterArchiver::run ──▶ ticket
//!    │                                 (one job at a time)
//!    └─ on_job_accepted(job id)
//! ```

use crate::error::JobError;
use crate::job::{ChapterArchiver, JobReport};
use crate::output::JobRequest;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct QueuedJob {
    id: String,
    request: JobRequest,
    reply: oneshot::Sender<Result<JobReport, JobError>>,
}

/// Serial job queue in front of a [`ChapterArchiver`].
pub struct JobWorker {
    archiver: Arc<ChapterArchiver>,
    tx: mpsc::Sender<QueuedJob>,
    task: JoinHandle<()>,
}

/// Claim on the result of one accepted job.
#[derive(Debug)]
pub struct JobTicket {
    id: String,
    rx: oneshot::Receiver<Result<JobReport, JobError>>,
}

impl JobWorker {
    /// Start the worker task. At most `queue_depth` jobs wait behind the
    /// running one; further submissions wait for a slot.
    pub fn spawn(archiver: Arc<ChapterArchiver>, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueuedJob>(queue_depth.max(1));
        let runner = Arc::clone(&archiver);

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                info!("Job {} started: {}", job.id, job.request.seed_url);
                let result = runner.run(&job.request).await;
                match &result {
                    Ok(report) => info!(
                        "Job {} finished: {} chapter(s)",
                        job.id,
                        report.summary.processed_count()
                    ),
                    Err(e) => warn!("Job {} failed: {}", job.id, e),
                }
                // A dropped ticket still leaves the retraction scheduled.
                if job.reply.send(result).is_err() {
                    debug!("Job {}: ticket dropped before completion", job.id);
                }
            }
            debug!("Job queue closed; worker exiting");
        });

        Self { archiver, tx, task }
    }

    /// Validate and enqueue a request.
    ///
    /// # Errors
    /// - [`JobError::InvalidInput`] / [`JobError::InvalidConfig`] for a
    ///   request that can never succeed; nothing is queued.
    /// - [`JobError::Internal`] if the worker has stopped.
    pub async fn submit(&self, request: JobRequest) -> Result<JobTicket, JobError> {
        request.validate()?;

        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| JobError::Internal("job worker has stopped".into()))?;

        let id = Uuid::new_v4().simple().to_string();
        if let Some(cb) = &self.archiver.config().progress_callback {
            cb.on_job_accepted(&id);
        }
        info!("Job {} accepted", id);

        let (reply, rx) = oneshot::channel();
        permit.send(QueuedJob {
            id: id.clone(),
            request,
            reply,
        });
        Ok(JobTicket { id, rx })
    }

    /// Stop accepting jobs, let queued ones finish, and wait for the task.
    pub async fn shutdown(self) {
        let Self { tx, task, .. } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!("Job worker ended abnormally: {}", e);
        }
    }
}

impl JobTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the job's terminal result.
    pub async fn outcome(self) -> Result<JobReport, JobError> {
        self.rx
            .await
            .map_err(|_| JobError::Internal(format!("job {} was dropped by the worker", self.id)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::error::RenderError;
    use crate::pipeline::fetch::HttpFetcher;
    use crate::progress::JobProgressCallback;
    use crate::renderer::{PageRenderer, RendererFactory};
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fails every open after a short pause, tracking overlap.
    #[derive(Default)]
    struct RefusingFactory {
        active: AtomicUsize,
        peak: AtomicUsize,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl RendererFactory for RefusingFactory {
        async fn open(&self) -> Result<Box<dyn PageRenderer>, RenderError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.opened.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Err(RenderError::Launch("no renderer in tests".into()))
        }

        fn name(&self) -> &'static str {
            "refusing"
        }
    }

    #[derive(Default)]
    struct Accepted(Mutex<Vec<String>>);

    impl JobProgressCallback for Accepted {
        fn on_job_accepted(&self, job_id: &str) {
            self.0.lock().unwrap().push(job_id.to_string());
        }
    }

    fn worker(
        tmp: &TempDir,
        factory: Arc<RefusingFactory>,
        accepted: Arc<Accepted>,
    ) -> JobWorker {
        let config = JobConfig::builder()
            .staging_root(tmp.path().join("staging"))
            .progress_callback(accepted)
            .build()
            .unwrap();
        let archiver = ChapterArchiver::new(
            config,
            factory,
            Arc::new(HttpFetcher::new(5).unwrap()),
            Arc::new(LocalStore::new(tmp.path().join("store"))),
        );
        JobWorker::spawn(Arc::new(archiver), 4)
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_acceptance() {
        let tmp = TempDir::new().unwrap();
        let accepted = Arc::new(Accepted::default());
        let w = worker(&tmp, Arc::new(RefusingFactory::default()), Arc::clone(&accepted));

        let err = w
            .submit(JobRequest::new("ftp://example.com/chapter-1", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidInput { .. }));
        assert!(w
            .submit(JobRequest::new("https://example.com/chapter-1", 0))
            .await
            .is_err());
        assert!(accepted.0.lock().unwrap().is_empty());
        w.shutdown().await;
    }

    #[tokio::test]
    async fn accepted_job_resolves_through_ticket() {
        let tmp = TempDir::new().unwrap();
        let accepted = Arc::new(Accepted::default());
        let w = worker(&tmp, Arc::new(RefusingFactory::default()), Arc::clone(&accepted));

        let ticket = w
            .submit(JobRequest::new("https://example.com/chapter-1", 2))
            .await
            .unwrap();
        assert_eq!(accepted.0.lock().unwrap().as_slice(), [ticket.id().to_string()]);
        assert_eq!(ticket.id().len(), 32);

        let err = ticket.outcome().await.unwrap_err();
        assert!(matches!(err, JobError::RendererUnavailable(_)), "got: {err}");
        w.shutdown().await;
    }

    #[tokio::test]
    async fn jobs_run_one_at_a_time() {
        let tmp = TempDir::new().unwrap();
        let factory = Arc::new(RefusingFactory::default());
        let w = worker(&tmp, Arc::clone(&factory), Arc::new(Accepted::default()));

        let mut tickets = Vec::new();
        for n in 1..=3 {
            let url = format!("https://example.com/chapter-{n}");
            tickets.push(w.submit(JobRequest::new(url, 1)).await.unwrap());
        }
        let ids: std::collections::HashSet<_> = tickets.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids.len(), 3);

        for ticket in tickets {
            assert!(ticket.outcome().await.is_err());
        }
        assert_eq!(factory.opened.load(Ordering::SeqCst), 3);
        assert_eq!(factory.peak.load(Ordering::SeqCst), 1);
        w.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_the_queue() {
        let tmp = TempDir::new().unwrap();
        let factory = Arc::new(RefusingFactory::default());
        let w = worker(&tmp, Arc::clone(&factory), Arc::new(Accepted::default()));

        let ticket = w
            .submit(JobRequest::new("https://example.com/chapter-5", 1))
            .await
            .unwrap();
        w.shutdown().await;
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        assert!(ticket.outcome().await.is_err());
    }
}
