//! Static HTML renderer: one GET per chapter, parsed with kuchiki.
//!
//! Works for readers that ship every page image in the initial markup
//! (eagerly or behind `data-src`). Pages assembled by client-side script
//! need the browser renderer instead.
//!
//! kuchiki trees are `!Send`, so only the response text is kept between
//! calls and each query re-parses it inside a synchronous helper.

use crate::error::RenderError;
use crate::pipeline::extract::ImageElement;
use crate::pipeline::fetch::DEFAULT_USER_AGENT;
use crate::renderer::{PageRenderer, RendererFactory};
use async_trait::async_trait;
use kuchiki::traits::TendrilSink;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Opens [`HtmlRenderer`] sessions sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct HtmlRendererFactory {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HtmlRendererFactory {
    /// Requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self, RenderError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RenderError::Launch(e.to_string()))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl RendererFactory for HtmlRendererFactory {
    async fn open(&self) -> Result<Box<dyn PageRenderer>, RenderError> {
        Ok(Box::new(HtmlRenderer {
            client: self.client.clone(),
            timeout_secs: self.timeout_secs,
            page: None,
        }))
    }

    fn name(&self) -> &'static str {
        "html"
    }
}

struct LoadedPage {
    url: String,
    html: String,
}

/// A session over static HTML snapshots.
pub struct HtmlRenderer {
    client: reqwest::Client,
    timeout_secs: u64,
    page: Option<LoadedPage>,
}

impl HtmlRenderer {
    /// Session over an already-fetched document; used by tests and callers
    /// that obtain markup elsewhere.
    pub fn from_html(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout_secs: 0,
            page: Some(LoadedPage {
                url: url.into(),
                html: html.into(),
            }),
        }
    }

    fn loaded(&self) -> Result<&LoadedPage, RenderError> {
        self.page.as_ref().ok_or(RenderError::NoPage)
    }
}

#[async_trait]
impl PageRenderer for HtmlRenderer {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        self.page = None;
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                RenderError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                RenderError::Navigation {
                    url: url.to_string(),
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(RenderError::NotFound {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                detail: format!("HTTP {status}"),
            });
        }

        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| RenderError::Navigation {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        debug!("Loaded {} ({} bytes of HTML)", final_url, html.len());

        self.page = Some(LoadedPage {
            url: final_url,
            html,
        });
        Ok(())
    }

    async fn has_images(&mut self, selector: &str) -> Result<bool, RenderError> {
        let page = self.loaded()?;
        Ok(!select_images(&page.html, selector)?.is_empty())
    }

    async fn scroll_to_bottom(&mut self) -> Result<u64, RenderError> {
        let page = self.loaded()?;
        Ok(page.html.len() as u64)
    }

    async fn image_elements(&mut self, selector: &str) -> Result<Vec<ImageElement>, RenderError> {
        let page = self.loaded()?;
        select_images(&page.html, selector)
    }

    async fn page_source(&mut self) -> Result<String, RenderError> {
        Ok(self.loaded()?.html.clone())
    }

    fn current_url(&self) -> Option<String> {
        self.page.as_ref().map(|p| p.url.clone())
    }

    fn is_static(&self) -> bool {
        true
    }
}

/// Parse `html` and collect the elements matching `selector`.
pub fn select_images(html: &str, selector: &str) -> Result<Vec<ImageElement>, RenderError> {
    let document = kuchiki::parse_html().one(html);
    let matches = document
        .select(selector)
        .map_err(|()| RenderError::Selector(selector.to_string()))?;

    Ok(matches
        .map(|element| {
            let attrs = element.attributes.borrow();
            ImageElement::from_lookup(|name| attrs.get(name).map(str::to_string))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_IMAGE_SELECTOR;
    use crate::pipeline::extract::extract_locators;

    const CHAPTER: &str = r#"
        <html><body>
          <img src="/logo.png" class="site-logo">
          <div id="reader">
            <img class="page-image" src="/spinner.gif" data-src="https://cdn.example/c10/001.jpg">
            <img class="page-image" src="https://cdn.example/c10/002.jpg">
            <img class="page-image" src="data:image/gif;base64,R0lGOD" data-lazy-src="https://cdn.example/c10/003.jpg">
          </div>
        </body></html>
    "#;

    #[test]
    fn default_selector_skips_site_chrome() {
        let elements = select_images(CHAPTER, DEFAULT_IMAGE_SELECTOR).unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(
            elements[0].deferred_src.as_deref(),
            Some("https://cdn.example/c10/001.jpg")
        );
    }

    #[test]
    fn naver_viewer_container_matches() {
        let html = r#"<div id="toon_view_detail"><img src="https://image-comic.example/1.jpg"></div>"#;
        assert_eq!(select_images(html, DEFAULT_IMAGE_SELECTOR).unwrap().len(), 1);
    }

    #[test]
    fn invalid_selector_is_reported() {
        assert!(matches!(
            select_images(CHAPTER, "img[[["),
            Err(RenderError::Selector(_))
        ));
    }

    #[tokio::test]
    async fn session_over_fixed_html() {
        let mut r = HtmlRenderer::from_html("https://reader.example/chapter-10/", CHAPTER);
        assert!(r.is_static());
        assert!(r.has_images("img.page-image").await.unwrap());
        assert!(!r.has_images("video").await.unwrap());

        let elements = r.image_elements("img.page-image").await.unwrap();
        let base = reqwest::Url::parse(&r.current_url().unwrap()).unwrap();
        assert_eq!(
            extract_locators(&elements, Some(&base)),
            vec![
                "https://cdn.example/c10/001.jpg",
                "https://cdn.example/c10/002.jpg",
                "https://cdn.example/c10/003.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn queries_before_navigation_fail() {
        let factory = HtmlRendererFactory::new(5).unwrap();
        let mut r = factory.open().await.unwrap();
        assert!(matches!(r.page_source().await, Err(RenderError::NoPage)));
        assert!(r.current_url().is_none());
    }
}
