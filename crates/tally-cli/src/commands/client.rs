//! HTTP client for the Tally API
//!
//! Client commands talk to a running server rather than the database so that
//! uploads go through the same processing and audit path as the web UI.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{multipart, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use tally_core::models::Document;
use tally_server::DEFAULT_AUTH_HEADER;

/// Thin JSON client that attaches the identity header to every request
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    email: Option<String>,
    auth_header: String,
}

impl ApiClient {
    pub fn new(base_url: &str, email: Option<&str>) -> Self {
        let auth_header = std::env::var("TALLY_AUTH_HEADER")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string());

        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.map(str::to_string),
            auth_header,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "API request");
        let builder = self.http.request(method, url);
        match self.email {
            Some(ref email) => builder.header(self.auth_header.as_str(), email),
            None => builder,
        }
    }

    /// GET a JSON resource
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        decode(response).await
    }

    /// POST a JSON body and decode the JSON answer
    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let response = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        decode(response).await
    }

    /// Upload a document as multipart `file` plus optional `user_note`
    pub async fn upload(&self, file: &Path, note: Option<&str>) -> Result<Document> {
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let part = multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str(guess_mime(file))
            .context("Invalid MIME type")?;
        let mut form = multipart::Form::new().part("file", part);
        if let Some(note) = note {
            form = form.text("user_note", note.to_string());
        }

        let response = self
            .request(Method::POST, "/api/documents/upload")
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        decode(response).await
    }
}

/// Decode a JSON response, turning non-2xx answers into errors that carry the
/// server's `error` message
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await.context("Failed to read response")?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        bail!("{} ({})", message, status);
    }

    serde_json::from_str(&body).with_context(|| format!("Unexpected response: {}", body))
}

/// Content type from the file extension
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}
