//! Headless Chrome renderer (cargo feature `browser`).
//!
//! One Chrome process per job, one tab reused for every chapter. The CDP
//! handler loop runs on its own task; it is aborted when the session is
//! closed or dropped, and dropping the `Browser` kills the child process.

use crate::error::RenderError;
use crate::pipeline::extract::{ImageElement, DEFERRED_ATTRIBUTES};
use crate::renderer::{PageRenderer, RendererFactory};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SCROLL_SCRIPT: &str = r#"(() => {
    const h = Math.max(document.body ? document.body.scrollHeight : 0,
                       document.documentElement.scrollHeight);
    window.scrollTo(0, h);
    return h;
})()"#;

const STATUS_SCRIPT: &str = r#"(() => {
    const nav = performance.getEntriesByType('navigation')[0];
    return nav && nav.responseStatus ? nav.responseStatus : 0;
})()"#;

/// Launches headless Chrome sessions.
#[derive(Debug, Clone)]
pub struct BrowserRendererFactory {
    chrome_bin: Option<PathBuf>,
    request_timeout: Duration,
}

impl BrowserRendererFactory {
    /// `chrome_bin` overrides executable discovery (`CHROME_BIN`).
    pub fn new(chrome_bin: Option<PathBuf>, request_timeout_secs: u64) -> Self {
        Self {
            chrome_bin,
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }
}

#[async_trait]
impl RendererFactory for BrowserRendererFactory {
    async fn open(&self) -> Result<Box<dyn PageRenderer>, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .request_timeout(self.request_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(bin) = &self.chrome_bin {
            builder = builder.chrome_executable(bin);
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;
        debug!("Headless browser session opened");

        Ok(Box::new(BrowserRenderer {
            browser: Some(browser),
            page: Some(page),
            loaded_url: None,
            handler_task,
        }))
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

/// A headless Chrome tab.
pub struct BrowserRenderer {
    browser: Option<Browser>,
    page: Option<Page>,
    loaded_url: Option<String>,
    handler_task: JoinHandle<()>,
}

impl BrowserRenderer {
    fn page(&self) -> Result<&Page, RenderError> {
        self.page.as_ref().ok_or(RenderError::NoPage)
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, RenderError> {
        self.page()?
            .evaluate(script)
            .await
            .map_err(|e| RenderError::Script(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| RenderError::Script(e.to_string()))
    }
}

#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        self.loaded_url = None;
        self.page()?
            .goto(url)
            .await
            .map_err(|e| RenderError::Navigation {
                url: url.to_string(),
                detail: e.to_string(),
            })?;

        let status: u16 = self.eval(STATUS_SCRIPT.to_string()).await.unwrap_or(0);
        if status == 404 || status == 410 {
            return Err(RenderError::NotFound { status });
        }
        self.loaded_url = self.page()?.url().await.ok().flatten();
        Ok(())
    }

    async fn has_images(&mut self, selector: &str) -> Result<bool, RenderError> {
        let sel = js_string(selector)?;
        self.eval(format!("document.querySelectorAll({sel}).length > 0"))
            .await
    }

    async fn scroll_to_bottom(&mut self) -> Result<u64, RenderError> {
        self.eval(SCROLL_SCRIPT.to_string()).await
    }

    async fn image_elements(&mut self, selector: &str) -> Result<Vec<ImageElement>, RenderError> {
        let sel = js_string(selector)?;
        let names = serde_json::to_string(
            &std::iter::once("src")
                .chain(DEFERRED_ATTRIBUTES)
                .collect::<Vec<_>>(),
        )
        .map_err(|e| RenderError::Script(e.to_string()))?;

        let rows: Vec<Vec<(String, Option<String>)>> = self
            .eval(format!(
                "Array.from(document.querySelectorAll({sel})).map(e => {names}.map(n => [n, e.getAttribute(n)]))"
            ))
            .await?;

        Ok(rows
            .into_iter()
            .map(|attrs| {
                ImageElement::from_lookup(|name| {
                    attrs
                        .iter()
                        .find(|(k, _)| k == name)
                        .and_then(|(_, v)| v.clone())
                })
            })
            .collect())
    }

    async fn page_source(&mut self) -> Result<String, RenderError> {
        self.page()?
            .content()
            .await
            .map_err(|e| RenderError::Script(e.to_string()))
    }

    fn current_url(&self) -> Option<String> {
        self.loaded_url.clone()
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close browser tab: {}", e);
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser: {}", e);
            }
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
        debug!("Headless browser session closed");
        Ok(())
    }
}

impl Drop for BrowserRenderer {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

fn js_string(s: &str) -> Result<String, RenderError> {
    serde_json::to_string(s).map_err(|e| RenderError::Script(e.to_string()))
}
