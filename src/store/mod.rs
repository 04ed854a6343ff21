//! Object store boundary.
//!
//! A store holds published archives by path (`/manga_1a2b3c4d.zip`) and
//! hands out share links for them. Link creation is idempotent from the
//! caller's point of view: a second request for the same path reports
//! [`StoreError::LinkAlreadyExists`] and the existing link is then looked up.

use crate::error::StoreError;
use async_trait::async_trait;

pub mod dropbox;
pub mod local;

pub use dropbox::DropboxStore;
pub use local::LocalStore;

/// Blob storage with share links.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Check credentials and reachability. Returns a description of the
    /// account or location, for the startup log line.
    async fn verify(&self) -> Result<String, StoreError>;

    /// Store `bytes` at `path`, overwriting anything already there.
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Create a share link for `path`.
    async fn create_shared_link(&self, path: &str) -> Result<String, StoreError>;

    /// Look up an existing share link for `path`.
    async fn existing_link(&self, path: &str) -> Result<Option<String>, StoreError>;

    /// Remove the blob at `path`.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}
