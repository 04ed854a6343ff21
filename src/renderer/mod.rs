//! Page renderer boundary.
//!
//! The chapter runner drives a [`PageRenderer`] session: navigate, wait for
//! image elements, scroll until lazy loading settles, enumerate images. One
//! session is opened per job through a [`RendererFactory`] and reused for
//! every chapter in the batch.
//!
//! Two implementations ship with the crate:
//!
//! * [`html::HtmlRendererFactory`]: plain HTTP fetch parsed with kuchiki.
//!   A static snapshot: nothing loads after the first response.
//! * `browser::BrowserRendererFactory`: headless Chrome via chromiumoxide
//!   (cargo feature `browser`).

use crate::error::RenderError;
use crate::pipeline::extract::ImageElement;
use async_trait::async_trait;

#[cfg(feature = "browser")]
pub mod browser;
pub mod html;

/// A live page session.
#[async_trait]
pub trait PageRenderer: Send {
    /// Load `url`, replacing the current page.
    ///
    /// Returns [`RenderError::NotFound`] when the source answers with a
    /// not-found status.
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError>;

    /// Whether at least one element matches `selector` right now.
    async fn has_images(&mut self, selector: &str) -> Result<bool, RenderError>;

    /// Scroll to the bottom of the document and report its height.
    async fn scroll_to_bottom(&mut self) -> Result<u64, RenderError>;

    /// Elements matching `selector`, in document order.
    async fn image_elements(&mut self, selector: &str) -> Result<Vec<ImageElement>, RenderError>;

    /// Current page source.
    async fn page_source(&mut self) -> Result<String, RenderError>;

    /// URL of the loaded page after redirects, used to resolve relative locators.
    fn current_url(&self) -> Option<String>;

    /// True when the page cannot change after navigation, so waiting and
    /// scrolling are pointless.
    fn is_static(&self) -> bool {
        false
    }

    /// Release the session. Called once, on every exit path of a job.
    async fn close(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Opens renderer sessions.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageRenderer>, RenderError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
