//! Publishing: upload the archive, get a share link, schedule retraction.
//!
//! Retraction is an independent task that owns only the store handle and
//! the remote path. It survives the job that created it: dropping or
//! detaching the [`RetractionHandle`] leaves the deadline in force. Only
//! [`RetractionHandle::cancel`] prevents deletion.

use crate::config::MAX_RETRACTION_DELAY_SECS;
use crate::error::{JobError, StoreError};
use crate::output::PublicationInfo;
use crate::store::ObjectStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Upload `bytes` to `remote_path` and return a share link.
///
/// If no link can be obtained the blob is deleted again (best effort) so
/// nothing is left behind without a way to reach it.
pub async fn publish(
    store: &Arc<dyn ObjectStore>,
    remote_path: &str,
    bytes: Vec<u8>,
    retraction_delay: Duration,
) -> Result<(PublicationInfo, RetractionHandle), JobError> {
    let fail = |detail: String| JobError::Publish {
        remote_path: remote_path.to_string(),
        detail,
    };

    store
        .upload(remote_path, bytes)
        .await
        .map_err(|e| fail(format!("upload to {} failed: {e}", store.name())))?;

    let link = match obtain_link(store.as_ref(), remote_path).await {
        Ok(link) => link,
        Err(e) => {
            if let Err(cleanup) = store.delete(remote_path).await {
                warn!("Could not remove unlinked upload {}: {}", remote_path, cleanup);
            }
            return Err(fail(format!("share link failed: {e}")));
        }
    };
    info!("Published {} → {}", remote_path, link);

    let retraction_delay = capped(retraction_delay);
    let published_at = Utc::now();
    let retract_at = chrono::Duration::from_std(retraction_delay)
        .ok()
        .and_then(|d| published_at.checked_add_signed(d))
        .unwrap_or(published_at);

    let retraction = schedule_retraction(Arc::clone(store), remote_path.to_string(), retraction_delay);

    Ok((
        PublicationInfo {
            remote_path: remote_path.to_string(),
            link,
            published_at,
            retract_at,
        },
        retraction,
    ))
}

/// Create a share link, falling back to the existing one on conflict.
pub async fn obtain_link(store: &dyn ObjectStore, remote_path: &str) -> Result<String, StoreError> {
    match store.create_shared_link(remote_path).await {
        Ok(link) => Ok(link),
        Err(StoreError::LinkAlreadyExists { .. }) => {
            info!("Share link for {} already exists; reusing it", remote_path);
            store
                .existing_link(remote_path)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    path: remote_path.to_string(),
                })
        }
        Err(e) => Err(e),
    }
}

/// How a scheduled retraction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetractionOutcome {
    Deleted,
    /// The blob was already gone at deletion time.
    AlreadyGone,
    Cancelled,
    /// Deletion failed; it is not retried.
    Failed(String),
}

#[derive(Debug)]
enum Trigger {
    Now,
    Cancel,
}

/// Handle to a pending retraction.
#[derive(Debug)]
pub struct RetractionHandle {
    deadline: Instant,
    trigger: Option<oneshot::Sender<Trigger>>,
    task: JoinHandle<RetractionOutcome>,
}

/// Longest delay a retraction can be scheduled for.
pub const MAX_RETRACTION_DELAY: Duration = Duration::from_secs(MAX_RETRACTION_DELAY_SECS);

fn capped(delay: Duration) -> Duration {
    if delay > MAX_RETRACTION_DELAY {
        warn!(
            "Retraction delay of {}s capped to {}s",
            delay.as_secs(),
            MAX_RETRACTION_DELAY_SECS
        );
        MAX_RETRACTION_DELAY
    } else {
        delay
    }
}

/// Delete `path` from `store` once `delay` has elapsed.
///
/// Delays beyond [`MAX_RETRACTION_DELAY`] are capped.
pub fn schedule_retraction(
    store: Arc<dyn ObjectStore>,
    path: String,
    delay: Duration,
) -> RetractionHandle {
    let now = Instant::now();
    let deadline = now
        .checked_add(capped(delay))
        .unwrap_or(now + MAX_RETRACTION_DELAY);
    let (tx, rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let trigger = match tokio::time::timeout_at(deadline, rx).await {
            Err(_) => None,
            Ok(Ok(trigger)) => Some(trigger),
            // Handle dropped or detached: keep the deadline.
            Ok(Err(_)) => {
                tokio::time::sleep_until(deadline).await;
                None
            }
        };
        if matches!(trigger, Some(Trigger::Cancel)) {
            info!("Retraction of {} cancelled", path);
            return RetractionOutcome::Cancelled;
        }

        match store.delete(&path).await {
            Ok(()) => {
                info!("Retracted {}", path);
                RetractionOutcome::Deleted
            }
            Err(StoreError::NotFound { .. }) => {
                info!("{} was already gone at retraction time", path);
                RetractionOutcome::AlreadyGone
            }
            Err(e) => {
                warn!("Failed to retract {}: {}", path, e);
                RetractionOutcome::Failed(e.to_string())
            }
        }
    });

    RetractionHandle {
        deadline,
        trigger: Some(tx),
        task,
    }
}

impl RetractionHandle {
    /// Time left until the scheduled deletion.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Wait for the deadline and the deletion.
    pub async fn wait(mut self) -> RetractionOutcome {
        let _keep_alive = self.trigger.take();
        join(self.task).await
    }

    /// Delete immediately instead of at the deadline.
    pub async fn retract_now(mut self) -> RetractionOutcome {
        self.send(Trigger::Now);
        join(self.task).await
    }

    /// Call off the deletion; the blob stays published.
    pub async fn cancel(mut self) -> RetractionOutcome {
        self.send(Trigger::Cancel);
        join(self.task).await
    }

    /// Let the retraction run on its own.
    pub fn detach(self) {}

    fn send(&mut self, trigger: Trigger) {
        if let Some(tx) = self.trigger.take() {
            let _ = tx.send(trigger);
        }
    }
}

async fn join(task: JoinHandle<RetractionOutcome>) -> RetractionOutcome {
    task.await
        .unwrap_or_else(|e| RetractionOutcome::Failed(format!("retraction task: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<dyn ObjectStore> {
        Arc::new(LocalStore::new(dir.path()))
    }

    #[tokio::test]
    async fn existing_link_is_reused() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.upload("/a.zip", vec![1]).await.unwrap();
        let first = s.create_shared_link("/a.zip").await.unwrap();

        assert_eq!(obtain_link(s.as_ref(), "/a.zip").await.unwrap(), first);
    }

    #[tokio::test]
    async fn retraction_deletes_at_deadline() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let (info, handle) = publish(&s, "/b.zip", vec![1, 2, 3], Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(info.remote_path, "/b.zip");
        assert!(info.link.starts_with("file://"));
        assert_eq!((info.retract_at - info.published_at).num_milliseconds(), 200);
        assert!(tmp.path().join("b.zip").exists());

        assert_eq!(handle.wait().await, RetractionOutcome::Deleted);
        assert!(!tmp.path().join("b.zip").exists());
    }

    #[tokio::test]
    async fn detached_retraction_still_runs() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.upload("/c.zip", vec![1]).await.unwrap();

        schedule_retraction(Arc::clone(&s), "/c.zip".into(), Duration::from_millis(50)).detach();
        assert!(tmp.path().join("c.zip").exists());

        let blob = tmp.path().join("c.zip");
        let gone = tokio::time::timeout(Duration::from_secs(5), async {
            while blob.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(gone.is_ok(), "blob still present after deadline");
    }

    #[tokio::test]
    async fn cancel_keeps_the_blob() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.upload("/d.zip", vec![1]).await.unwrap();

        let handle = schedule_retraction(Arc::clone(&s), "/d.zip".into(), Duration::from_secs(60));
        assert_eq!(handle.cancel().await, RetractionOutcome::Cancelled);
        assert!(tmp.path().join("d.zip").exists());
    }

    #[tokio::test]
    async fn retract_now_skips_the_wait() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.upload("/e.zip", vec![1]).await.unwrap();

        let handle = schedule_retraction(Arc::clone(&s), "/e.zip".into(), Duration::from_secs(3600));
        assert!(handle.remaining() > Duration::from_secs(3500));
        assert_eq!(handle.retract_now().await, RetractionOutcome::Deleted);
    }

    #[tokio::test]
    async fn huge_delay_is_capped_instead_of_overflowing() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.upload("/f.zip", vec![1]).await.unwrap();

        let handle =
            schedule_retraction(Arc::clone(&s), "/f.zip".into(), Duration::from_secs(u64::MAX));
        assert!(handle.remaining() <= MAX_RETRACTION_DELAY);
        assert!(handle.remaining() > MAX_RETRACTION_DELAY - Duration::from_secs(60));
        assert_eq!(handle.retract_now().await, RetractionOutcome::Deleted);
    }

    #[tokio::test]
    async fn published_deadline_reflects_the_cap() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let (info, handle) = publish(&s, "/g.zip", vec![1], Duration::MAX).await.unwrap();
        assert_eq!(
            (info.retract_at - info.published_at).num_seconds(),
            MAX_RETRACTION_DELAY_SECS as i64
        );
        assert_eq!(handle.cancel().await, RetractionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn missing_blob_is_already_gone() {
        let tmp = TempDir::new().unwrap();
        let handle = schedule_retraction(store(&tmp), "/never.zip".into(), Duration::ZERO);
        assert_eq!(handle.wait().await, RetractionOutcome::AlreadyGone);
    }
}
