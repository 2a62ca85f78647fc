//! Network transport used to replay queued requests

use anyhow::{bail, Context, Result};
use reqwest::Method;
use std::time::Duration;
use tracing::debug;

use super::queue::RequestDescriptor;

/// Re-issues a request. `Ok(true)` means a 2xx response.
#[async_trait::async_trait]
pub trait NetworkTransport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<bool>;
}

/// reqwest-backed transport; relative URLs resolve against `base_url`
pub struct HttpTransport {
    base_url: Option<String>,
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn resolve(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match self.base_url {
            Some(ref base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )),
            None => bail!("Relative URL {} needs a base URL", url),
        }
    }
}

#[async_trait::async_trait]
impl NetworkTransport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<bool> {
        let url = self.resolve(&request.url)?;
        let method = Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("Invalid HTTP method: {}", request.method))?;

        let mut builder = self.http_client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", request.method, url))?;
        debug!("Replayed {} {} -> {}", request.method, url, response.status());
        Ok(response.status().is_success())
    }
}
