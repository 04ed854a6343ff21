//! Per-chapter on-disk page set.
//!
//! A workspace is a directory `<staging>/<chapter index>/` holding page files
//! named `NNN.<ext>`. Slots are handed out densely as pages are accepted, so
//! rejected resources never leave a gap. The merger may later thin the set
//! out; [`crate::pipeline::merge::renumber`] restores contiguity.

use crate::config::OutputFormat;
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Zero-pad width of page file names.
pub const PAGE_NAME_WIDTH: usize = 3;

/// File name for page `slot` (1-based).
pub fn page_file_name(slot: usize, extension: &str) -> String {
    format!("{slot:0width$}.{extension}", width = PAGE_NAME_WIDTH)
}

/// One chapter's page directory.
#[derive(Debug)]
pub struct ChapterWorkspace {
    index: u32,
    dir: PathBuf,
    persisted: usize,
}

impl ChapterWorkspace {
    /// Create (or reset) the workspace for chapter `index` under `staging`.
    pub async fn create(staging: &Path, index: u32) -> io::Result<Self> {
        let dir = staging.join(index.to_string());
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Workspace for chapter {} at {}", index, dir.display());
        Ok(Self {
            index,
            dir,
            persisted: 0,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Pages persisted so far.
    pub fn persisted(&self) -> usize {
        self.persisted
    }

    /// Write `bytes` into the next free slot.
    pub async fn persist(&mut self, bytes: &[u8], format: OutputFormat) -> io::Result<PathBuf> {
        let path = self
            .dir
            .join(page_file_name(self.persisted + 1, format.extension()));
        tokio::fs::write(&path, bytes).await?;
        self.persisted += 1;
        Ok(path)
    }

    /// Remove the workspace and everything in it.
    pub async fn discard(self) -> io::Result<()> {
        debug!("Discarding workspace for chapter {}", self.index);
        tokio::fs::remove_dir_all(&self.dir).await
    }
}

/// Page files in `dir`, in page order.
///
/// Only files with a recognized image extension count; bookkeeping files
/// (dot-files, temporaries) are ignored.
pub fn page_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name();
        let visible = name.to_str().is_some_and(|n| !n.starts_with('.'));
        if visible && page_extension(&path).is_some() {
            pages.push(path);
        }
    }
    pages.sort_by(|a, b| compare_page_names(a, b));
    Ok(pages)
}

/// Output format implied by a page file's extension.
pub fn page_extension(path: &Path) -> Option<OutputFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::from_extension)
}

/// Numeric stems sort numerically (`2` before `10`), then everything else by name.
fn compare_page_names(a: &Path, b: &Path) -> Ordering {
    let stem = |p: &Path| p.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
    let (sa, sb) = (stem(a), stem(b));
    match (sa.parse::<u64>(), sb.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
