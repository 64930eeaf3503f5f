pub mod cleaner;
pub mod http_client;
pub mod listing;
pub mod quote;
pub mod ranking;
pub mod screener;

use crate::config::catalog::{Protocol, SourceSpec};
use crate::models::{RawPage, RawRow, Window};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use self::http_client::{HttpClient, JsonRequest};
use self::listing::ListingAdapter;
use self::quote::QuoteAdapter;
use self::ranking::RankingAdapter;
use self::screener::ScreenerAdapter;

// ── Source trait ──────────────────────────────────────────────────────────────

/// One upstream protocol.
///
/// `Ok(None)` means the page is unavailable: either the request kept failing
/// after its retries or the body did not carry the expected rows.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_page(&self, window: Window) -> Result<Option<RawPage>>;
}

/// Build the adapter matching a source's protocol.
pub fn build_adapter(spec: &SourceSpec, client: Arc<HttpClient>) -> Result<Arc<dyn SourceAdapter>> {
    let adapter: Arc<dyn SourceAdapter> = match &spec.protocol {
        Protocol::Screener { url, columns, body } => {
            Arc::new(ScreenerAdapter::new(client, url, columns.clone(), body.clone())?)
        }
        Protocol::Listing { url, params, page_param, page_size_param } => Arc::new(
            ListingAdapter::new(client, url, params.clone(), page_param, page_size_param)?,
        ),
        Protocol::Quote { url, root } => Arc::new(QuoteAdapter::new(client, url, root)?),
        Protocol::Ranking { url, params } => {
            Arc::new(RankingAdapter::new(client, url, params.clone())?)
        }
    };
    Ok(adapter)
}

pub(crate) fn parse_url(url: &str) -> Result<url::Url> {
    url::Url::parse(url).with_context(|| format!("Invalid upstream URL {}", url))
}

/// Run a request through the client's retry loop, collapsing exhaustion
/// into "unavailable".
pub(crate) async fn fetch_or_none(client: &HttpClient, request: &JsonRequest) -> Option<Value> {
    match client.fetch_json(request).await {
        Ok(body) => Some(body),
        Err(e) => {
            warn!("Page unavailable: {:#}", e);
            None
        }
    }
}

/// Array of objects stored under `key`, or `None` when absent.
pub(crate) fn object_rows(body: &Value, key: &str) -> Option<Vec<RawRow>> {
    let items = body.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
    )
}
