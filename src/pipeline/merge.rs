//! Page merging and renumbering.
//!
//! Vertical-scroll webtoons are sliced into many short strips; stacking
//! consecutive pairs halves the page count without changing reading order.
//!
//! ```text
//! 001 002 003 004 005   ──merge──▶   001 003 005   ──renumber──▶   001 002 003
//!  └─┬─┘   └─┬─┘                    (1+2)(3+4)
//! ```
//!
//! Only lossy pages (`jpg`, `webp`) take part in merging. PNG pages are
//! renumbered alongside them but never touched otherwise. A `.merged`
//! marker in the workspace records that merging already happened, so
//! finalising a workspace twice leaves it unchanged.
//!
//! All functions here do blocking file and image I/O; run them inside
//! `spawn_blocking`.

use crate::config::OutputFormat;
use crate::pipeline::image::encode_lossy;
use crate::pipeline::workspace::{page_extension, page_file_name, page_files};
use image::{imageops, RgbImage};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bookkeeping file written once a workspace has been merged.
pub const MERGED_MARKER: &str = ".merged";

/// What [`finalize`] did to one workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Pairs stacked into a single page.
    pub merged_pairs: usize,
    /// Mergeable pages left alone (odd trailing page or failed pair).
    pub unmerged: usize,
    /// Files renamed by the renumbering pass.
    pub renamed: usize,
    /// Pages in the workspace afterwards.
    pub pages: usize,
}

/// Merge (when enabled) and renumber the pages in `dir`.
pub fn finalize(dir: &Path, merge: bool, quality: u8) -> io::Result<MergeReport> {
    let mut report = MergeReport::default();
    if merge {
        let (merged_pairs, unmerged) = merge_pairs(dir, quality)?;
        report.merged_pairs = merged_pairs;
        report.unmerged = unmerged;
    }
    report.renamed = renumber(dir)?;
    report.pages = page_files(dir)?.len();
    Ok(report)
}

/// Stack consecutive mergeable pages pairwise.
///
/// Returns `(merged pairs, unmerged mergeable pages)`. A workspace that
/// carries [`MERGED_MARKER`] is left as is.
pub fn merge_pairs(dir: &Path, quality: u8) -> io::Result<(usize, usize)> {
    let marker = dir.join(MERGED_MARKER);
    if marker.exists() {
        debug!("{} already merged; skipping", dir.display());
        return Ok((0, 0));
    }

    let mergeable: Vec<PathBuf> = page_files(dir)?
        .into_iter()
        .filter(|p| page_extension(p).is_some_and(OutputFormat::is_lossy))
        .collect();

    let mut merged = 0;
    let mut unmerged = mergeable.len() % 2;

    for pair in mergeable.chunks_exact(2) {
        let (top, bottom) = (&pair[0], &pair[1]);
        match merge_one(top, bottom, quality) {
            Ok(()) => merged += 1,
            Err(e) => {
                warn!(
                    "Could not merge {} + {}: {}",
                    top.display(),
                    bottom.display(),
                    e
                );
                unmerged += 2;
            }
        }
    }

    std::fs::write(&marker, b"")?;
    debug!(
        "Merged {} pair(s) in {} ({} unmerged)",
        merged,
        dir.display(),
        unmerged
    );
    Ok((merged, unmerged))
}

fn merge_one(top: &Path, bottom: &Path, quality: u8) -> Result<(), String> {
    let format = page_extension(top).ok_or_else(|| "unknown page format".to_string())?;
    let upper = image::open(top).map_err(|e| e.to_string())?.to_rgb8();
    let lower = image::open(bottom).map_err(|e| e.to_string())?.to_rgb8();

    let width = upper.width().max(lower.width());
    let height = upper
        .height()
        .checked_add(lower.height())
        .ok_or_else(|| "combined height overflows".to_string())?;

    // Narrower page leaves a black strip on the right.
    let mut canvas = RgbImage::new(width, height);
    imageops::replace(&mut canvas, &upper, 0, 0);
    imageops::replace(&mut canvas, &lower, 0, i64::from(upper.height()));

    let bytes = encode_lossy(&canvas, format, quality).map_err(|e| e.to_string())?;
    commit_merge(top, bottom, &bytes).map_err(|e| e.to_string())
}

/// Replace `top` with `merged` and drop `bottom`.
///
/// The canvas is staged next to `top` and `bottom` is removed before the
/// swap, so a failure leaves either both original pages or just the merged
/// one.
fn commit_merge(top: &Path, bottom: &Path, merged: &[u8]) -> io::Result<()> {
    let staged = top.with_file_name(".merge.tmp");
    std::fs::write(&staged, merged)?;

    let original_bottom = match std::fs::read(bottom) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }
    };
    if let Err(e) = std::fs::remove_file(bottom) {
        let _ = std::fs::remove_file(&staged);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&staged, top) {
        let _ = std::fs::remove_file(&staged);
        if let Err(restore) = std::fs::write(bottom, &original_bottom) {
            warn!("Lost page {} while undoing a merge: {}", bottom.display(), restore);
        }
        return Err(e);
    }
    Ok(())
}

/// Rename every page to `001.<ext> .. NNN.<ext>` in page order, keeping
/// each file's own extension. Returns how many files moved.
pub fn renumber(dir: &Path) -> io::Result<usize> {
    let pages = page_files(dir)?;
    let targets: Vec<PathBuf> = pages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or_default();
            dir.join(page_file_name(i + 1, ext))
        })
        .collect();

    let moves: Vec<(usize, &PathBuf)> = pages
        .iter()
        .enumerate()
        .filter(|(i, p)| **p != targets[*i])
        .collect();
    if moves.is_empty() {
        return Ok(0);
    }

    // Two phases so a target name can't clobber a page not yet moved.
    let mut staged = Vec::with_capacity(moves.len());
    for (i, page) in &moves {
        let tmp = dir.join(format!(".renumber-{i}.tmp"));
        if let Err(e) = std::fs::rename(page, &tmp) {
            restore_staged(&staged);
            return Err(e);
        }
        staged.push((tmp, page.as_path(), targets[*i].as_path()));
    }
    for (done, (tmp, _, target)) in staged.iter().enumerate() {
        if let Err(e) = std::fs::rename(tmp, target) {
            restore_staged(&staged[done..]);
            return Err(e);
        }
    }

    Ok(staged.len())
}

/// Move staged pages back to their original names. Temp files are hidden
/// from [`page_files`], so anything that can't go back is logged.
fn restore_staged(staged: &[(PathBuf, &Path, &Path)]) {
    for (tmp, original, _) in staged {
        let restored = !original.exists() && std::fs::rename(tmp, original).is_ok();
        if !restored {
            warn!(
                "Page stranded at {} (was {})",
                tmp.display(),
                original.display()
            );
        }
    }
}
