use crate::models::{RawPage, Window};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::http_client::{HttpClient, JsonRequest};
use super::{fetch_or_none, object_rows, parse_url, SourceAdapter};

/// InfoMoney-style ranking: 1-based `pageIndex`, rows under `Data`, and the
/// page count in `TotalPages`.
pub struct RankingAdapter {
    client: Arc<HttpClient>,
    url: Url,
    params: BTreeMap<String, String>,
}

impl RankingAdapter {
    pub fn new(client: Arc<HttpClient>, url: &str, params: BTreeMap<String, String>) -> Result<Self> {
        Ok(Self { client, url: parse_url(url)?, params })
    }

    pub fn page_url(&self, window: Window) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in &self.params {
                query.append_pair(k, v);
            }
            query.append_pair("pageIndex", &window.page.to_string());
            query.append_pair("pageSize", &window.size().to_string());
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for RankingAdapter {
    async fn fetch_page(&self, window: Window) -> Result<Option<RawPage>> {
        debug!("Ranking page {}", window.page);
        let request = JsonRequest::get(self.page_url(window));

        let Some(body) = fetch_or_none(&self.client, &request).await else {
            return Ok(None);
        };
        let Some(rows) = object_rows(&body, "Data") else {
            return Ok(None);
        };
        let total_pages = body
            .get("TotalPages")
            .and_then(|v| v.as_u64())
            .map(|n| n.min(u32::MAX as u64) as u32);

        Ok(Some(RawPage { rows, total_pages }))
    }
}
