use crate::config::HttpConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_retry::Retry;
use tracing::{debug, warn};
use url::Url;

/// One JSON request, rebuilt on every attempt.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub url: Url,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl JsonRequest {
    pub fn get(url: Url) -> Self {
        Self { url, body: None, headers: BTreeMap::new() }
    }

    pub fn post(url: Url, body: Value) -> Self {
        Self { url, body: Some(body), headers: BTreeMap::new() }
    }
}

/// Delay before retry `n` (1-based) is `n * base`.
pub fn linear_backoff(base: Duration, retries: u32) -> impl Iterator<Item = Duration> {
    (1..=retries).map(move |n| base * n)
}

pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: u32,
    retry_base: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
        })
    }

    /// Send `request` and decode its JSON body, retrying transport errors and
    /// non-2xx answers up to `max_retries` more times with linear backoff.
    pub async fn fetch_json(&self, request: &JsonRequest) -> Result<Value> {
        let strategy = linear_backoff(self.retry_base, self.max_retries);

        Retry::start(strategy, || async move {
            let result = self.attempt(request).await;
            if let Err(e) = &result {
                warn!("Request to {} failed: {:#}", request.url, e);
            }
            result
        })
        .await
        .with_context(|| {
            format!("All {} attempts exhausted for {}", self.max_retries + 1, request.url)
        })
    }

    async fn attempt(&self, request: &JsonRequest) -> Result<Value> {
        let builder = match &request.body {
            Some(body) => {
                debug!("POST {}", request.url);
                self.inner.post(request.url.clone()).json(body)
            }
            None => {
                debug!("GET {}", request.url);
                self.inner.get(request.url.clone())
            }
        };
        let builder = request
            .headers
            .iter()
            .fold(builder, |b, (name, value)| b.header(name.as_str(), value.as_str()));

        let resp = builder.send().await.context("Request error")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(500).collect();
            anyhow::bail!("HTTP {}: {}", status, snippet);
        }

        resp.json::<Value>()
            .await
            .context("Failed to decode response body as JSON")
    }
}

#[cfg(test)]
pub(crate) fn test_client(max_retries: u32) -> HttpClient {
    let config = HttpConfig {
        max_retries,
        retry_base_ms: 1,
        timeout_secs: 5,
        ..HttpConfig::default()
    };
    HttpClient::new(&config).unwrap()
}
