//! Configuration types for chapter acquisition and publishing.
//!
//! Per-job behaviour is controlled through [`JobConfig`], built via its
//! [`JobConfigBuilder`]. Process-wide settings that come from the
//! environment (store credentials, browser location) live in
//! [`EnvSettings`] and are read once at startup.

use crate::error::JobError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration shared by every job an archiver runs.
///
/// # Example
/// ```rust
/// use chapter2zip::JobConfig;
///
/// let config = JobConfig::builder()
///     .min_width(720)
///     .render_timeout_secs(20)
///     .quality(85)
///     .build()
///     .unwrap();
/// assert_eq!(config.min_width, 720);
/// ```
#[derive(Clone)]
pub struct JobConfig {
    /// Minimum decoded pixel width for a page image. Default: 800.
    ///
    /// Thumbnails, banners and spacer GIFs embedded next to the real pages
    /// are all narrower than a reading-width page; this is the only filter
    /// that separates them.
    pub min_width: u32,

    /// Bounded wait for the first image-bearing element, in seconds. Default: 30.
    pub render_timeout_secs: u64,

    /// Pause after each scroll step while lazy images load, in milliseconds. Default: 3000.
    pub scroll_settle_ms: u64,

    /// Maximum scroll steps before giving up on the page height settling. Default: 8.
    pub max_scroll_attempts: u32,

    /// Per-image download timeout in seconds. Default: 50.
    pub fetch_timeout_secs: u64,

    /// Image downloads in flight per chapter. Default: 4.
    ///
    /// Results are consumed in page order regardless of completion order,
    /// so this never reorders pages.
    pub fetch_concurrency: usize,

    /// Encoder quality for lossy outputs and merged canvases (1–100). Default: 90.
    pub quality: u8,

    /// Delay between publishing and deleting the archive, in seconds. Default: 3000.
    /// At most [`MAX_RETRACTION_DELAY_SECS`].
    pub retraction_delay_secs: u64,

    /// Archive name prefix; names are `<prefix>_<8 hex>.zip`. Default: "manga".
    pub archive_prefix: String,

    /// CSS selector for image-bearing elements.
    pub image_selector: String,

    /// Page-source substrings that mean "this chapter does not exist".
    pub not_found_markers: Vec<String>,

    /// Per-label numbering direction.
    pub numbering: NumberingTable,

    /// Parent directory for per-job staging directories. Default: system temp dir.
    pub staging_root: Option<PathBuf>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

/// Default selector: reader pages, CDN-hosted images (eager or lazy), and
/// the Naver webtoon viewer container.
pub const DEFAULT_IMAGE_SELECTOR: &str =
    r#"img.page-image, img[src*="cdn"], img[data-src*="cdn"], #toon_view_detail img"#;

/// Upper bound on the retraction delay: one week.
pub const MAX_RETRACTION_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            min_width: 800,
            render_timeout_secs: 30,
            scroll_settle_ms: 3000,
            max_scroll_attempts: 8,
            fetch_timeout_secs: 50,
            fetch_concurrency: 4,
            quality: 90,
            retraction_delay_secs: 3000,
            archive_prefix: "manga".to_string(),
            image_selector: DEFAULT_IMAGE_SELECTOR.to_string(),
            not_found_markers: vec![
                "페이지를 찾을 수 없습니다".to_string(),
                "Page Not Found".to_string(),
            ],
            numbering: NumberingTable::default(),
            staging_root: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("min_width", &self.min_width)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("scroll_settle_ms", &self.scroll_settle_ms)
            .field("max_scroll_attempts", &self.max_scroll_attempts)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("quality", &self.quality)
            .field("retraction_delay_secs", &self.retraction_delay_secs)
            .field("archive_prefix", &self.archive_prefix)
            .field("image_selector", &self.image_selector)
            .field("numbering", &self.numbering)
            .field("staging_root", &self.staging_root)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl JobConfig {
    /// Create a new builder for `JobConfig`.
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `html` contains any configured not-found marker.
    pub fn is_not_found_page(&self, html: &str) -> bool {
        self.not_found_markers
            .iter()
            .any(|m| !m.is_empty() && html.contains(m.as_str()))
    }
}

/// Builder for [`JobConfig`].
#[derive(Debug)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn min_width(mut self, px: u32) -> Self {
        self.config.min_width = px;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs.max(1);
        self
    }

    pub fn scroll_settle_ms(mut self, ms: u64) -> Self {
        self.config.scroll_settle_ms = ms;
        self
    }

    pub fn max_scroll_attempts(mut self, n: u32) -> Self {
        self.config.max_scroll_attempts = n;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n.max(1);
        self
    }

    pub fn quality(mut self, q: u8) -> Self {
        self.config.quality = q.clamp(1, 100);
        self
    }

    /// Capped at [`MAX_RETRACTION_DELAY_SECS`].
    pub fn retraction_delay_secs(mut self, secs: u64) -> Self {
        self.config.retraction_delay_secs = secs.min(MAX_RETRACTION_DELAY_SECS);
        self
    }

    pub fn archive_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.archive_prefix = prefix.into();
        self
    }

    pub fn image_selector(mut self, selector: impl Into<String>) -> Self {
        self.config.image_selector = selector.into();
        self
    }

    pub fn not_found_markers(mut self, markers: Vec<String>) -> Self {
        self.config.not_found_markers = markers;
        self
    }

    pub fn numbering(mut self, table: NumberingTable) -> Self {
        self.config.numbering = table;
        self
    }

    pub fn staging_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_root = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<JobConfig, JobError> {
        let c = &self.config;
        if c.image_selector.trim().is_empty() {
            return Err(JobError::InvalidConfig(
                "image selector must not be empty".into(),
            ));
        }
        if c.archive_prefix.is_empty()
            || !c
                .archive_prefix
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(JobError::InvalidConfig(format!(
                "archive prefix must be non-empty ASCII [A-Za-z0-9_-], got '{}'",
                c.archive_prefix
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Image format pages are persisted in.
///
/// Lossy formats are re-encoded at [`JobConfig::quality`] and are the only
/// ones the page merger touches; PNG keeps alpha and is passed through
/// renumbering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// JPEG (default).
    #[default]
    #[serde(rename = "jpg")]
    Jpeg,
    /// Lossy WebP.
    #[serde(rename = "webp")]
    WebP,
    /// Lossless PNG, alpha preserved.
    #[serde(rename = "png")]
    Png,
}

impl OutputFormat {
    /// File extension used for persisted pages.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
            OutputFormat::Png => "png",
        }
    }

    /// Whether the format is re-encoded lossily (and therefore mergeable).
    pub fn is_lossy(self) -> bool {
        matches!(self, OutputFormat::Jpeg | OutputFormat::WebP)
    }

    /// Map a file extension back to a format (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "webp" => Some(OutputFormat::WebP),
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::from_extension(s.trim()).ok_or_else(|| JobError::UnsupportedFormat {
            format: s.to_string(),
        })
    }
}

/// Direction chapter indices advance in from the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberingDirection {
    /// `start, start+1, …` (default)
    #[default]
    Ascending,
    /// `start, start-1, …`, stopping before 0
    Descending,
}

/// Which way each recognized URL label counts.
///
/// Sources disagree: reader sites number `chapter-N` upward from the first
/// chapter, while the Naver list dialect (`no=N`) is usually browsed newest
/// first. There is no reliable way to infer this from the URL, so it is a
/// table the caller owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingTable {
    entries: Vec<(String, NumberingDirection)>,
}

impl Default for NumberingTable {
    fn default() -> Self {
        Self {
            entries: vec![
                ("chapter".to_string(), NumberingDirection::Ascending),
                ("no".to_string(), NumberingDirection::Descending),
                ("epi".to_string(), NumberingDirection::Ascending),
            ],
        }
    }
}

impl NumberingTable {
    /// An empty table: every label ascends.
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// Set (or replace) the direction for `label`.
    pub fn with(mut self, label: impl Into<String>, direction: NumberingDirection) -> Self {
        let label = label.into().to_ascii_lowercase();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = direction,
            None => self.entries.push((label, direction)),
        }
        self
    }

    /// Direction for `label`; unknown labels ascend.
    pub fn direction_for(&self, label: &str) -> NumberingDirection {
        self.entries
            .iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(label))
            .map(|(_, d)| *d)
            .unwrap_or_default()
    }
}

// ── Environment ──────────────────────────────────────────────────────────

/// Settings read once from the process environment.
#[derive(Clone, Default)]
pub struct EnvSettings {
    /// `DROPBOX_ACCESS_TOKEN`
    pub dropbox_token: Option<String>,
    /// `CHROME_BIN`, falling back to `GOOGLE_CHROME_BIN`
    pub chrome_bin: Option<PathBuf>,
    /// `CHAPTER2ZIP_STAGING_DIR`
    pub staging_root: Option<PathBuf>,
}

impl fmt::Debug for EnvSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSettings")
            .field("dropbox_token", &self.dropbox_token.as_ref().map(|_| "<redacted>"))
            .field("chrome_bin", &self.chrome_bin)
            .field("staging_root", &self.staging_root)
            .finish()
    }
}

impl EnvSettings {
    /// Read settings from the real process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup (empty values count as unset).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            dropbox_token: get("DROPBOX_ACCESS_TOKEN"),
            chrome_bin: get("CHROME_BIN")
                .or_else(|| get("GOOGLE_CHROME_BIN"))
                .map(PathBuf::from),
            staging_root: get("CHAPTER2ZIP_STAGING_DIR").map(PathBuf::from),
        }
    }

    /// The Dropbox token, or a startup-fatal error if absent.
    pub fn require_dropbox_token(&self) -> Result<&str, JobError> {
        self.dropbox_token
            .as_deref()
            .ok_or_else(|| JobError::MissingEnv {
                name: "DROPBOX_ACCESS_TOKEN",
                hint: "Create an app token at https://www.dropbox.com/developers/apps \
                       and export it, or use --store local."
                    .to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let c = JobConfig::default();
        assert_eq!(c.min_width, 800);
        assert_eq!(c.render_timeout_secs, 30);
        assert_eq!(c.fetch_timeout_secs, 50);
        assert_eq!(c.quality, 90);
        assert_eq!(c.retraction_delay_secs, 3000);
        assert_eq!(c.archive_prefix, "manga");
    }

    #[test]
    fn builder_clamps_quality_and_concurrency() {
        let c = JobConfig::builder()
            .quality(0)
            .fetch_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.quality, 1);
        assert_eq!(c.fetch_concurrency, 1);

        let c = JobConfig::builder().quality(250).build().unwrap();
        assert_eq!(c.quality, 100);
    }

    #[test]
    fn builder_caps_retraction_delay() {
        let c = JobConfig::builder()
            .retraction_delay_secs(u64::MAX)
            .build()
            .unwrap();
        assert_eq!(c.retraction_delay_secs, MAX_RETRACTION_DELAY_SECS);

        let c = JobConfig::builder().retraction_delay_secs(0).build().unwrap();
        assert_eq!(c.retraction_delay_secs, 0);
    }

    #[test]
    fn builder_rejects_bad_prefix() {
        assert!(JobConfig::builder().archive_prefix("a/b").build().is_err());
        assert!(JobConfig::builder().archive_prefix("").build().is_err());
        assert!(JobConfig::builder().archive_prefix("web-toon_1").build().is_ok());
    }

    #[test]
    fn builder_rejects_empty_selector() {
        assert!(JobConfig::builder().image_selector("  ").build().is_err());
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("jpg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("JPEG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("webp".parse::<OutputFormat>().unwrap(), OutputFormat::WebP);
        assert_eq!("png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert!(matches!(
            "tiff".parse::<OutputFormat>(),
            Err(JobError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn only_lossy_formats_merge() {
        assert!(OutputFormat::Jpeg.is_lossy());
        assert!(OutputFormat::WebP.is_lossy());
        assert!(!OutputFormat::Png.is_lossy());
    }

    #[test]
    fn numbering_table_defaults_and_override() {
        let t = NumberingTable::default();
        assert_eq!(t.direction_for("chapter"), NumberingDirection::Ascending);
        assert_eq!(t.direction_for("NO"), NumberingDirection::Descending);
        assert_eq!(t.direction_for("unknown"), NumberingDirection::Ascending);

        let t = t.with("no", NumberingDirection::Ascending);
        assert_eq!(t.direction_for("no"), NumberingDirection::Ascending);
    }

    #[test]
    fn not_found_markers_match() {
        let c = JobConfig::default();
        assert!(c.is_not_found_page("<h1>Page Not Found</h1>"));
        assert!(!c.is_not_found_page("<img src=x>"));
    }

    #[test]
    fn env_settings_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("DROPBOX_ACCESS_TOKEN", "sl.abc"),
            ("GOOGLE_CHROME_BIN", "/opt/chrome"),
            ("CHAPTER2ZIP_STAGING_DIR", ""),
        ]
        .into_iter()
        .collect();
        let env = EnvSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(env.require_dropbox_token().unwrap(), "sl.abc");
        assert_eq!(env.chrome_bin, Some(PathBuf::from("/opt/chrome")));
        assert!(env.staging_root.is_none());
        assert!(!format!("{env:?}").contains("sl.abc"));
    }

    #[test]
    fn missing_token_is_fatal() {
        let env = EnvSettings::from_lookup(|_| None);
        assert!(matches!(
            env.require_dropbox_token(),
            Err(JobError::MissingEnv { name: "DROPBOX_ACCESS_TOKEN", .. })
        ));
    }
}
