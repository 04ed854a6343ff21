//! Archive building: every finished chapter workspace into one zip.
//!
//! Entries are `<chapter index>/<page file>`, so pages from different
//! chapters never collide. Only page files are packed; workspace
//! bookkeeping stays behind.

use crate::error::JobError;
use crate::pipeline::workspace::page_files;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A zip written to the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    pub path: PathBuf,
    pub name: String,
    pub bytes: u64,
    pub entries: usize,
}

/// `<prefix>_<8 hex chars>.zip`, random per call.
pub fn archive_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}.zip", prefix, &id[..8])
}

/// Pack `chapters` (index, workspace dir) into `dest`.
///
/// Blocking; call from `spawn_blocking`.
pub fn build_archive(dest: &Path, chapters: &[(u32, PathBuf)]) -> Result<BuiltArchive, JobError> {
    let fail = |detail: String| JobError::Archive {
        path: dest.to_path_buf(),
        detail,
    };

    let file = File::create(dest).map_err(|e| fail(e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0;
    for (index, dir) in chapters {
        let pages = page_files(dir).map_err(|e| fail(format!("{}: {e}", dir.display())))?;
        for page in pages {
            let Some(file_name) = page.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let entry = format!("{index}/{file_name}");
            let data = std::fs::read(&page).map_err(|e| fail(format!("{}: {e}", page.display())))?;
            zip.start_file(entry.as_str(), options)
                .map_err(|e| fail(e.to_string()))?;
            zip.write_all(&data).map_err(|e| fail(e.to_string()))?;
            debug!("Archived {}", entry);
            entries += 1;
        }
    }

    let mut writer = zip.finish().map_err(|e| fail(e.to_string()))?;
    writer.flush().map_err(|e| fail(e.to_string()))?;
    drop(writer);

    let bytes = std::fs::metadata(dest)
        .map_err(|e| fail(e.to_string()))?
        .len();
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    info!("Built {} ({} entries, {} bytes)", name, entries, bytes);
    Ok(BuiltArchive {
        path: dest.to_path_buf(),
        name,
        bytes,
        entries,
    })
}
