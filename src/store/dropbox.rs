//! Dropbox store over the v2 HTTP API.
//!
//! | Operation     | Endpoint                                          |
//! |---------------|---------------------------------------------------|
//! | verify        | `users/get_current_account`                       |
//! | upload        | `files/upload` (content host, `mode: overwrite`)  |
//! | share link    | `sharing/create_shared_link_with_settings`        |
//! | link lookup   | `sharing/list_shared_links` (`direct_only`)       |
//! | delete        | `files/delete_v2`                                 |
//!
//! Dropbox reports endpoint-specific failures as HTTP 409 with a JSON body
//! whose `error_summary` starts with a stable tag, e.g.
//! `shared_link_already_exists/..`. Those tags are mapped onto
//! [`StoreError`] variants here.

use crate::error::StoreError;
use crate::store::ObjectStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Dropbox-backed [`ObjectStore`].
pub struct DropboxStore {
    client: reqwest::Client,
    token: String,
}

impl std::fmt::Debug for DropboxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxStore").finish_non_exhaustive()
    }
}

impl DropboxStore {
    /// Store authenticated with a long-lived or app access token.
    pub fn new(token: impl Into<String>, timeout_secs: u64) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    async fn rpc(&self, route: &str, body: serde_json::Value) -> Result<serde_json::Value, StoreError> {
        let response = self
            .client
            .post(format!("{API_BASE}/{route}"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        read_json(route, response).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_summary: String,
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListSharedLinks {
    #[serde(default)]
    links: Vec<SharedLink>,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    name: AccountName,
    #[serde(default)]
    email: String,
}

/// Decode a successful response or classify the failure.
async fn read_json(route: &str, response: reqwest::Response) -> Result<serde_json::Value, StoreError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| StoreError::Request(e.to_string()))?;

    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        return serde_json::from_str(&text)
            .map_err(|e| StoreError::Request(format!("{route}: bad response body: {e}")));
    }

    debug!("Dropbox {} failed: HTTP {} {}", route, status, text);
    Err(classify_failure(status, &text))
}

/// Map a Dropbox error response onto [`StoreError`].
fn classify_failure(status: StatusCode, body: &str) -> StoreError {
    let summary = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error_summary)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED => StoreError::Unauthorized(summary),
        StatusCode::CONFLICT if summary.starts_with("shared_link_already_exists") => {
            StoreError::LinkAlreadyExists {
                path: String::new(),
            }
        }
        StatusCode::CONFLICT
            if summary.contains("not_found") && summary.starts_with("path_lookup") =>
        {
            StoreError::NotFound {
                path: String::new(),
            }
        }
        _ => StoreError::Api {
            status: status.as_u16(),
            summary,
        },
    }
}

/// Attach the path to path-less variants produced by [`classify_failure`].
fn with_path(e: StoreError, path: &str) -> StoreError {
    match e {
        StoreError::LinkAlreadyExists { .. } => StoreError::LinkAlreadyExists {
            path: path.to_string(),
        },
        StoreError::NotFound { .. } => StoreError::NotFound {
            path: path.to_string(),
        },
        other => other,
    }
}

/// `Dropbox-API-Arg` must be ASCII; escape everything else as `\uXXXX`.
fn api_arg_header(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[async_trait]
impl ObjectStore for DropboxStore {
    fn name(&self) -> &'static str {
        "dropbox"
    }

    async fn verify(&self) -> Result<String, StoreError> {
        // No request body for this route.
        let response = self
            .client
            .post(format!("{API_BASE}/users/get_current_account"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let value = read_json("users/get_current_account", response).await?;
        let account: Account = serde_json::from_value(value)
            .map_err(|e| StoreError::Request(format!("account response: {e}")))?;
        Ok(if account.email.is_empty() {
            account.name.display_name
        } else {
            format!("{} <{}>", account.name.display_name, account.email)
        })
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let arg = json!({ "path": path, "mode": "overwrite", "mute": true });
        let size = bytes.len();
        let response = self
            .client
            .post(format!("{CONTENT_BASE}/files/upload"))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", api_arg_header(&arg))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        read_json("files/upload", response)
            .await
            .map_err(|e| with_path(e, path))?;
        debug!("Uploaded {} ({} bytes) to Dropbox", path, size);
        Ok(())
    }

    async fn create_shared_link(&self, path: &str) -> Result<String, StoreError> {
        let body = json!({
            "path": path,
            "settings": { "requested_visibility": "public" }
        });
        let value = self
            .rpc("sharing/create_shared_link_with_settings", body)
            .await
            .map_err(|e| with_path(e, path))?;
        let link: SharedLink = serde_json::from_value(value)
            .map_err(|e| StoreError::Request(format!("shared link response: {e}")))?;
        Ok(link.url)
    }

    async fn existing_link(&self, path: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .rpc(
                "sharing/list_shared_links",
                json!({ "path": path, "direct_only": true }),
            )
            .await
            .map_err(|e| with_path(e, path))?;
        let list: ListSharedLinks = serde_json::from_value(value)
            .map_err(|e| StoreError::Request(format!("list links response: {e}")))?;
        Ok(list.links.into_iter().next().map(|l| l.url))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.rpc("files/delete_v2", json!({ "path": path }))
            .await
            .map_err(|e| with_path(e, path))?;
        Ok(())
    }
}
