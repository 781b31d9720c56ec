//! HTTP client for the follow server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Success body, matching the server's `ApiResponse`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

/// Error body, matching the server's `ErrorResponse`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    error_code: String,
    #[serde(default)]
    retryable: bool,
}

/// HTTP client for the follow API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a path and unwrap the `data` field of the response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        Self::unwrap_data(&url, resp).await
    }

    /// POST raw bytes (an envelope) and unwrap the `data` field of the response.
    pub async fn post_bytes<T: DeserializeOwned>(&self, path: &str, body: Vec<u8>) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        Self::unwrap_data(&url, resp).await
    }

    /// GET a path and return the whole JSON body.
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let resp = Self::check_status(resp).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    async fn unwrap_data<T: DeserializeOwned>(url: &str, resp: Response) -> Result<T> {
        let resp = Self::check_status(resp).await?;
        let api_resp: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;

        if !api_resp.success {
            anyhow::bail!("API reported failure for {}", url);
        }
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
    }

    async fn check_status(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) if body.retryable => anyhow::bail!(
                "API error ({}) [{}]: {} (retryable)",
                status,
                body.error_code,
                body.error
            ),
            Ok(body) => anyhow::bail!("API error ({}) [{}]: {}", status, body.error_code, body.error),
            Err(_) => anyhow::bail!("API error ({}): {}", status, text),
        }
    }
}
