use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use anyhow::{Context, Result, anyhow, bail};

/// Header carrying the API key on downloads.
pub const DOWNLOAD_API_KEY_HEADER: &str = "x-api-key";
/// Header carrying the API key on uploads.
pub const UPLOAD_API_KEY_HEADER: &str = "X-Api-Key";
/// Multipart form field holding the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

/// HTTP file transfer over one pooled client.
///
/// Cloning is cheap and shares the underlying connection pool, so a
/// process builds one `HttpTransfer` at startup and hands out clones.
#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Download `url` into `local_path`.
    ///
    /// The local file is created (or truncated) before the request is sent,
    /// so a failed download can leave an empty or partial file behind.
    /// A non-empty `api_key` is sent in the `x-api-key` header.
    ///
    /// Returns the number of bytes written.
    pub async fn download(&self, local_path: &Path, url: &str, api_key: &str) -> Result<u64> {
        let mut out = fs::File::create(local_path)
            .await
            .with_context(|| format!("Failed to create {}", local_path.display()))?;

        let mut request = self.client.get(url);
        if !api_key.is_empty() {
            request = request.header(DOWNLOAD_API_KEY_HEADER, api_key);
        }

        debug!(url, path = %local_path.display(), "sending download request");
        let mut resp = request.send().await?;

        if resp.status() != StatusCode::OK {
            bail!("bad status: {}", resp.status());
        }

        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            out.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", local_path.display()))?;
            written += chunk.len() as u64;
        }
        out.flush().await?;

        info!(url, path = %local_path.display(), bytes = written, "download complete");
        Ok(written)
    }

    /// Upload `local_path` to `url` as multipart field `file`.
    ///
    /// The part's filename is the base name of `local_path`. A non-empty
    /// `api_key` is sent in the `X-Api-Key` header.
    pub async fn upload(&self, url: &str, local_path: &Path, api_key: &str) -> Result<()> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("No file name in {}", local_path.display()))?;

        let data = fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;
        let size = data.len();

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let mut request = self.client.post(url).multipart(form);
        if !api_key.is_empty() {
            request = request.header(UPLOAD_API_KEY_HEADER, api_key);
        }

        debug!(url, path = %local_path.display(), bytes = size, "sending upload request");
        let resp = request.send().await?;

        if resp.status() != StatusCode::OK {
            bail!("bad status: {}", resp.status());
        }

        info!(url, path = %local_path.display(), bytes = size, "upload complete");
        Ok(())
    }
}
