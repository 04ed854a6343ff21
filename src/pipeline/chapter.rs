//! The chapter runner: one chapter from URL to a finished workspace.
//!
//! ```text
//! navigate ─▶ wait for images ─▶ scroll until settled ─▶ extract locators
//!     ─▶ fetch (ordered, bounded) ─▶ validate/convert ─▶ persist ─▶ merge/renumber
//! ```
//!
//! Every failure inside this boundary becomes a [`ChapterError`]; per-image
//! failures are logged and skipped without using a page slot.

use crate::config::{JobConfig, OutputFormat};
use crate::error::{ChapterError, RenderError, ResourceError};
use crate::output::ChapterSummary;
use crate::pipeline::extract::extract_locators;
use crate::pipeline::fetch::ResourceFetcher;
use crate::pipeline::image::{validate_and_convert, ImagePolicy};
use crate::pipeline::merge;
use crate::pipeline::sequence::{ChapterOutcome, ChapterProcessor};
use crate::pipeline::workspace::ChapterWorkspace;
use crate::progress::{JobProgressCallback, NoopProgressCallback};
use crate::renderer::PageRenderer;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Interval between image-presence checks while waiting for a page.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-request chapter options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterOptions {
    pub format: OutputFormat,
    pub merge: bool,
}

/// Drives chapters through one renderer session.
pub struct ChapterRunner<'a> {
    config: &'a JobConfig,
    renderer: &'a mut dyn PageRenderer,
    fetcher: &'a dyn ResourceFetcher,
    staging: &'a Path,
    options: ChapterOptions,
}

impl<'a> ChapterRunner<'a> {
    pub fn new(
        config: &'a JobConfig,
        renderer: &'a mut dyn PageRenderer,
        fetcher: &'a dyn ResourceFetcher,
        staging: &'a Path,
        options: ChapterOptions,
    ) -> Self {
        Self {
            config,
            renderer,
            fetcher,
            staging,
            options,
        }
    }

    fn progress(&self) -> &dyn JobProgressCallback {
        match &self.config.progress_callback {
            Some(cb) => cb.as_ref(),
            None => &NoopProgressCallback,
        }
    }

    /// Run chapter `index` located at `url`.
    pub async fn run(&mut self, index: u32, url: &str) -> Result<ChapterOutcome, ChapterError> {
        let secs = self.config.render_timeout_secs;
        let render_timeout = Duration::from_secs(secs);

        // 1. Render
        match timeout(render_timeout, self.renderer.navigate(url)).await {
            Err(_) => return Err(ChapterError::RenderTimeout { index, secs }),
            Ok(Err(e)) => return Err(map_render_error(index, secs, e)),
            Ok(Ok(())) => {}
        }

        let appeared = self
            .wait_for_images(render_timeout)
            .await
            .map_err(|e| map_render_error(index, secs, e))?;
        if !appeared {
            let fallback = ChapterError::RenderTimeout { index, secs };
            return Err(self.classify_empty_page(index, fallback).await);
        }

        // 2. Lazy loading
        if !self.renderer.is_static() {
            self.settle_lazy_images()
                .await
                .map_err(|e| map_render_error(index, secs, e))?;
        }

        // 3. Extract
        let elements = self
            .renderer
            .image_elements(&self.config.image_selector)
            .await
            .map_err(|e| map_render_error(index, secs, e))?;
        let base = self
            .renderer
            .current_url()
            .and_then(|u| Url::parse(&u).ok())
            .or_else(|| Url::parse(url).ok());
        let locators = extract_locators(&elements, base.as_ref());
        debug!("Chapter {}: {} locator(s)", index, locators.len());

        if locators.is_empty() {
            let fallback = ChapterError::NoResourcesFound { index };
            return Err(self.classify_empty_page(index, fallback).await);
        }

        // 4. Fetch, validate, persist
        let mut workspace = ChapterWorkspace::create(self.staging, index)
            .await
            .map_err(|e| processing(index, e))?;

        let skipped = match self.acquire_pages(&mut workspace, &locators, url).await {
            Ok(skipped) => skipped,
            Err(e) => {
                discard(workspace).await;
                return Err(processing(index, e));
            }
        };

        if workspace.persisted() == 0 {
            discard(workspace).await;
            return Err(ChapterError::NoValidImages {
                index,
                attempted: locators.len(),
            });
        }

        // 5. Merge and renumber
        let dir = workspace.path().to_path_buf();
        let (do_merge, quality) = (self.options.merge, self.config.quality);
        let finalized =
            tokio::task::spawn_blocking(move || merge::finalize(&dir, do_merge, quality)).await;
        let report = match finalized {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                discard(workspace).await;
                return Err(processing(index, e));
            }
            Err(e) => {
                discard(workspace).await;
                return Err(processing(index, e));
            }
        };

        Ok(ChapterOutcome {
            summary: ChapterSummary {
                index,
                url: url.to_string(),
                pages: report.pages,
                skipped_resources: skipped,
                merged_pairs: report.merged_pairs,
            },
            workspace,
        })
    }

    /// Poll until an image-bearing element appears. `Ok(false)` on timeout.
    async fn wait_for_images(&mut self, limit: Duration) -> Result<bool, RenderError> {
        let selector = self.config.image_selector.as_str();
        if self.renderer.is_static() {
            return self.renderer.has_images(selector).await;
        }

        let renderer = &mut *self.renderer;
        let polled = timeout(limit, async {
            loop {
                if renderer.has_images(selector).await? {
                    return Ok::<_, RenderError>(());
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await;

        match polled {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Scroll to the bottom until the document height stops changing.
    async fn settle_lazy_images(&mut self) -> Result<(), RenderError> {
        let settle = Duration::from_millis(self.config.scroll_settle_ms);
        let mut last_height = None;
        for attempt in 1..=self.config.max_scroll_attempts {
            let height = self.renderer.scroll_to_bottom().await?;
            sleep(settle).await;
            if last_height == Some(height) {
                debug!("Page height settled at {}px after {} scroll(s)", height, attempt);
                return Ok(());
            }
            last_height = Some(height);
        }
        debug!(
            "Page height still changing after {} scroll(s)",
            self.config.max_scroll_attempts
        );
        Ok(())
    }

    /// A page with no usable images is either a missing chapter (marker in
    /// the source) or a genuine `fallback` failure.
    async fn classify_empty_page(&mut self, index: u32, fallback: ChapterError) -> ChapterError {
        match self.renderer.page_source().await {
            Ok(source) if self.config.is_not_found_page(&source) => ChapterError::NotFound {
                index,
                reason: "not-found marker in page".to_string(),
            },
            Ok(_) => fallback,
            Err(e) => {
                debug!("Chapter {}: page source unavailable: {}", index, e);
                fallback
            }
        }
    }

    /// Fetch, convert and persist every locator in order. Returns the
    /// number of skipped resources.
    async fn acquire_pages(
        &mut self,
        workspace: &mut ChapterWorkspace,
        locators: &[String],
        referer: &str,
    ) -> std::io::Result<usize> {
        let fetcher = self.fetcher;
        let fetch_secs = self.config.fetch_timeout_secs.max(1);
        let fetch_timeout = Duration::from_secs(fetch_secs);
        let format = self.options.format;
        let policy = ImagePolicy {
            min_width: self.config.min_width,
            quality: self.config.quality,
        };

        let mut fetched = stream::iter(locators.iter().cloned())
            .map(|locator| async move {
                let result = match timeout(fetch_timeout, fetcher.fetch(&locator, Some(referer))).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ResourceError::Timeout {
                        url: locator.clone(),
                        secs: fetch_secs,
                    }),
                };
                (locator, result)
            })
            .buffered(self.config.fetch_concurrency.max(1));

        let mut skipped = 0;
        while let Some((locator, result)) = fetched.next().await {
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Chapter {}: skipping {}: {}", workspace.index(), locator, e);
                    skipped += 1;
                    continue;
                }
            };

            let converted =
                tokio::task::spawn_blocking(move || validate_and_convert(&bytes, format, &policy))
                    .await
                    .map_err(std::io::Error::other)?;

            match converted {
                Ok(image) => {
                    let path = workspace.persist(&image.bytes, format).await?;
                    debug!(
                        "Chapter {}: {} → {} ({}x{})",
                        workspace.index(),
                        locator,
                        path.display(),
                        image.width,
                        image.height
                    );
                }
                Err(e) => {
                    warn!("Chapter {}: skipping {}: {}", workspace.index(), locator, e);
                    self.progress()
                        .on_warning(&format!("chapter {}: skipped image ({e})", workspace.index()));
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            info!(
                "Chapter {}: {} of {} image(s) skipped",
                workspace.index(),
                skipped,
                locators.len()
            );
        }
        Ok(skipped)
    }
}

#[async_trait]
impl ChapterProcessor for ChapterRunner<'_> {
    async fn process(&mut self, index: u32, url: &str) -> Result<ChapterOutcome, ChapterError> {
        self.run(index, url).await
    }
}

fn map_render_error(index: u32, secs: u64, e: RenderError) -> ChapterError {
    match e {
        RenderError::NotFound { status } => ChapterError::NotFound {
            index,
            reason: format!("HTTP {status}"),
        },
        RenderError::Timeout { .. } => ChapterError::RenderTimeout { index, secs },
        other => processing(index, other),
    }
}

fn processing(index: u32, e: impl std::fmt::Display) -> ChapterError {
    ChapterError::Processing {
        index,
        detail: e.to_string(),
    }
}

async fn discard(workspace: ChapterWorkspace) {
    let index = workspace.index();
    if let Err(e) = workspace.discard().await {
        warn!("Chapter {}: failed to remove workspace: {}", index, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::ImageElement;
    use crate::pipeline::workspace::page_files;
    use image::{Rgb, RgbImage};
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// A renderer with canned pages keyed by URL.
    #[derive(Default)]
    struct CannedRenderer {
        pages: HashMap<String, Vec<ImageElement>>,
        sources: HashMap<String, String>,
        current: Option<String>,
        scrolls: u32,
    }

    #[async_trait]
    impl PageRenderer for CannedRenderer {
        async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
            self.current = Some(url.to_string());
            Ok(())
        }
        async fn has_images(&mut self, _selector: &str) -> Result<bool, RenderError> {
            let url = self.current.clone().ok_or(RenderError::NoPage)?;
            Ok(self.pages.get(&url).is_some_and(|p| !p.is_empty()))
        }
        async fn scroll_to_bottom(&mut self) -> Result<u64, RenderError> {
            self.scrolls += 1;
            Ok(4000)
        }
        async fn image_elements(&mut self, _selector: &str) -> Result<Vec<ImageElement>, RenderError> {
            let url = self.current.clone().ok_or(RenderError::NoPage)?;
            Ok(self.pages.get(&url).cloned().unwrap_or_default())
        }
        async fn page_source(&mut self) -> Result<String, RenderError> {
            let url = self.current.clone().ok_or(RenderError::NoPage)?;
            Ok(self.sources.get(&url).cloned().unwrap_or_default())
        }
        fn current_url(&self) -> Option<String> {
            self.current.clone()
        }
    }

    struct MapFetcher(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl ResourceFetcher for MapFetcher {
        async fn fetch(&self, url: &str, _referer: Option<&str>) -> Result<Vec<u8>, ResourceError> {
            self.0.get(url).cloned().ok_or(ResourceError::Http {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    /// Never answers for `stalled`; serves everything else from the map.
    struct StallingFetcher {
        stalled: String,
        images: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ResourceFetcher for StallingFetcher {
        async fn fetch(&self, url: &str, _referer: Option<&str>) -> Result<Vec<u8>, ResourceError> {
            if url == self.stalled {
                return futures::future::pending().await;
            }
            self.images.get(url).cloned().ok_or(ResourceError::Http {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn jpeg(w: u32, h: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 90)
            .encode_image(&RgbImage::from_pixel(w, h, Rgb([90, 90, 90])))
            .unwrap();
        buf
    }

    fn element(url: &str) -> ImageElement {
        ImageElement {
            src: Some(url.to_string()),
            deferred_src: None,
        }
    }

    fn config() -> JobConfig {
        JobConfig::builder()
            .render_timeout_secs(1)
            .scroll_settle_ms(0)
            .build()
            .unwrap()
    }

    const URL: &str = "https://reader.example/chapter-3/";

    fn jpeg_options(merge: bool) -> ChapterOptions {
        ChapterOptions {
            format: OutputFormat::Jpeg,
            merge,
        }
    }

    #[tokio::test]
    async fn skipped_images_leave_no_gaps() {
        let urls: Vec<String> = (1..=4).map(|i| format!("https://cdn.example/{i}.jpg")).collect();
        let mut renderer = CannedRenderer::default();
        renderer
            .pages
            .insert(URL.into(), urls.iter().map(|u| element(u)).collect());

        let mut images = HashMap::new();
        images.insert(urls[0].clone(), jpeg(800, 20));
        images.insert(urls[1].clone(), jpeg(300, 20)); // too narrow
        images.insert(urls[3].clone(), jpeg(900, 20)); // urls[2] is missing
        let fetcher = MapFetcher(images);

        let staging = TempDir::new().unwrap();
        let config = config();
        let mut runner = ChapterRunner::new(
            &config,
            &mut renderer,
            &fetcher,
            staging.path(),
            jpeg_options(false),
        );
        let outcome = runner.run(3, URL).await.unwrap();

        assert_eq!(outcome.summary.pages, 2);
        assert_eq!(outcome.summary.skipped_resources, 2);
        let names: Vec<_> = page_files(outcome.workspace.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["001.jpg", "002.jpg"]);
        assert!(renderer.scrolls >= 2);
    }

    #[tokio::test]
    async fn all_images_rejected_is_no_valid_images() {
        let mut renderer = CannedRenderer::default();
        renderer
            .pages
            .insert(URL.into(), vec![element("https://cdn.example/tiny.jpg")]);
        let fetcher = MapFetcher(
            [("https://cdn.example/tiny.jpg".to_string(), jpeg(100, 100))]
                .into_iter()
                .collect(),
        );

        let staging = TempDir::new().unwrap();
        let config = config();
        let mut runner = ChapterRunner::new(
            &config,
            &mut renderer,
            &fetcher,
            staging.path(),
            jpeg_options(true),
        );
        let err = runner.run(3, URL).await.unwrap_err();

        assert_eq!(err, ChapterError::NoValidImages { index: 3, attempted: 1 });
        assert!(!staging.path().join("3").exists());
    }

    #[tokio::test]
    async fn stalled_download_is_skipped_after_fetch_timeout() {
        let stalled = "https://cdn.example/stuck.jpg".to_string();
        let good = "https://cdn.example/ok.jpg".to_string();
        let mut renderer = CannedRenderer::default();
        renderer
            .pages
            .insert(URL.into(), vec![element(&stalled), element(&good)]);
        let fetcher = StallingFetcher {
            stalled: stalled.clone(),
            images: [(good.clone(), jpeg(800, 20))].into_iter().collect(),
        };

        let staging = TempDir::new().unwrap();
        let config = JobConfig::builder()
            .render_timeout_secs(1)
            .scroll_settle_ms(0)
            .fetch_timeout_secs(1)
            .build()
            .unwrap();
        let mut runner = ChapterRunner::new(
            &config,
            &mut renderer,
            &fetcher,
            staging.path(),
            jpeg_options(false),
        );

        let outcome = tokio::time::timeout(Duration::from_secs(10), runner.run(3, URL))
            .await
            .expect("chapter blocked on a stalled download")
            .unwrap();
        assert_eq!(outcome.summary.pages, 1);
        assert_eq!(outcome.summary.skipped_resources, 1);
    }

    #[tokio::test]
    async fn inline_only_images_are_no_resources_found() {
        let mut renderer = CannedRenderer::default();
        renderer.pages.insert(
            URL.into(),
            vec![
                element("data:image/gif;base64,R0lGODlhAQABAAAAACw="),
                ImageElement {
                    src: Some("data:image/png;base64,iVBORw0KGgo=".into()),
                    deferred_src: Some("data:image/png;base64,AAAA".into()),
                },
            ],
        );
        let fetcher = MapFetcher(HashMap::new());

        let staging = TempDir::new().unwrap();
        let config = config();
        let mut runner = ChapterRunner::new(
            &config,
            &mut renderer,
            &fetcher,
            staging.path(),
            jpeg_options(true),
        );
        let err = runner.run(3, URL).await.unwrap_err();

        assert_eq!(err, ChapterError::NoResourcesFound { index: 3 });
        assert!(!err.is_terminal());
        assert!(!staging.path().join("3").exists());
    }

    #[tokio::test]
    async fn marker_page_is_not_found() {
        let mut renderer = CannedRenderer::default();
        renderer
            .sources
            .insert(URL.into(), "<h1>페이지를 찾을 수 없습니다</h1>".into());
        let fetcher = MapFetcher(HashMap::new());

        let staging = TempDir::new().unwrap();
        let config = config();
        let mut runner = ChapterRunner::new(
            &config,
            &mut renderer,
            &fetcher,
            staging.path(),
            jpeg_options(true),
        );
        let err = runner.run(3, URL).await.unwrap_err();
        assert!(err.is_terminal(), "got: {err:?}");
    }

    #[tokio::test]
    async fn blank_page_times_out() {
        let mut renderer = CannedRenderer::default();
        let fetcher = MapFetcher(HashMap::new());

        let staging = TempDir::new().unwrap();
        let config = config();
        let mut runner = ChapterRunner::new(
            &config,
            &mut renderer,
            &fetcher,
            staging.path(),
            jpeg_options(true),
        );
        let err = runner.run(3, URL).await.unwrap_err();
        assert_eq!(err, ChapterError::RenderTimeout { index: 3, secs: 1 });
    }

    #[test]
    fn render_not_found_maps_to_terminal_error() {
        let e = map_render_error(5, 30, RenderError::NotFound { status: 404 });
        assert!(e.is_terminal());
        let e = map_render_error(5, 30, RenderError::Script("boom".into()));
        assert!(matches!(e, ChapterError::Processing { index: 5, .. }));
    }
}
