use crate::models::{RawPage, Window};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::http_client::{HttpClient, JsonRequest};
use super::{fetch_or_none, object_rows, parse_url, SourceAdapter};

/// Investing-style asset listing: GET with query parameters, rows under `data`.
pub struct ListingAdapter {
    client: Arc<HttpClient>,
    url: Url,
    params: BTreeMap<String, String>,
    page_param: String,
    page_size_param: String,
}

impl ListingAdapter {
    pub fn new(
        client: Arc<HttpClient>,
        url: &str,
        params: BTreeMap<String, String>,
        page_param: &str,
        page_size_param: &str,
    ) -> Result<Self> {
        Ok(Self {
            client,
            url: parse_url(url)?,
            params,
            page_param: page_param.to_string(),
            page_size_param: page_size_param.to_string(),
        })
    }

    pub fn page_url(&self, window: Window) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in &self.params {
                query.append_pair(k, v);
            }
            query.append_pair(&self.page_param, &window.page.to_string());
            query.append_pair(&self.page_size_param, &window.size().to_string());
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for ListingAdapter {
    async fn fetch_page(&self, window: Window) -> Result<Option<RawPage>> {
        debug!("Listing page {} ({} rows)", window.page, window.size());
        let request = JsonRequest::get(self.page_url(window));

        let Some(body) = fetch_or_none(&self.client, &request).await else {
            return Ok(None);
        };
        Ok(object_rows(&body, "data").map(RawPage::new))
    }
}
