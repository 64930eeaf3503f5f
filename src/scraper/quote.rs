use crate::models::{RawPage, Window};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use super::http_client::{HttpClient, JsonRequest};
use super::{fetch_or_none, parse_url, SourceAdapter};

/// Single-quote endpoint (e.g. AwesomeAPI `USD-BRL`): one object under `root`.
pub struct QuoteAdapter {
    client: Arc<HttpClient>,
    url: Url,
    root: String,
}

impl QuoteAdapter {
    pub fn new(client: Arc<HttpClient>, url: &str, root: &str) -> Result<Self> {
        Ok(Self { client, url: parse_url(url)?, root: root.to_string() })
    }
}

#[async_trait]
impl SourceAdapter for QuoteAdapter {
    async fn fetch_page(&self, _window: Window) -> Result<Option<RawPage>> {
        let mut request = JsonRequest::get(self.url.clone());
        request.headers.insert("accept".into(), "application/json".into());

        let Some(body) = fetch_or_none(&self.client, &request).await else {
            return Ok(None);
        };
        let row = body.get(&self.root).and_then(|q| q.as_object()).cloned();
        Ok(row.map(|r| RawPage::new(vec![r])))
    }
}
