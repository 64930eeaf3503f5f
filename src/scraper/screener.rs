//! TradingView-style screener: POST a filter body, get positional rows back.
//!
//! The column list is the single source of truth for the row layout. It is
//! sent as `columns` in every request and zipped with each returned `d`
//! array, so downstream code reads fields by name and never by index.

use crate::models::{RawPage, RawRow, Window};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::http_client::{HttpClient, JsonRequest};
use super::{fetch_or_none, parse_url, SourceAdapter};

/// Key under which the upstream's exchange-qualified ticker is kept.
pub const TICKER_FIELD: &str = "ticker";

pub struct ScreenerAdapter {
    client: Arc<HttpClient>,
    url: Url,
    columns: Vec<String>,
    body: Value,
}

impl ScreenerAdapter {
    pub fn new(client: Arc<HttpClient>, url: &str, columns: Vec<String>, body: Value) -> Result<Self> {
        Ok(Self { client, url: parse_url(url)?, columns, body })
    }

    pub fn payload(&self, window: Window) -> Value {
        let mut body = self.body.clone();
        body["columns"] = json!(self.columns);
        body["range"] = json!([window.start, window.end]);
        body
    }

    /// Zip every `d` array with the column list.
    pub fn decode(&self, body: &Value) -> Option<Vec<RawRow>> {
        let items = body.get("data")?.as_array()?;
        let rows = items
            .iter()
            .filter_map(|item| {
                let values = item.get("d")?.as_array()?;
                if values.len() != self.columns.len() {
                    warn!(
                        "Row has {} values for {} columns",
                        values.len(),
                        self.columns.len()
                    );
                }
                let mut row: RawRow = Map::new();
                for (column, value) in self.columns.iter().zip(values) {
                    row.insert(column.clone(), value.clone());
                }
                if let Some(ticker) = item.get("s") {
                    row.insert(TICKER_FIELD.to_string(), ticker.clone());
                }
                Some(row)
            })
            .collect();
        Some(rows)
    }
}

#[async_trait]
impl SourceAdapter for ScreenerAdapter {
    async fn fetch_page(&self, window: Window) -> Result<Option<RawPage>> {
        debug!("Screener range {}-{}", window.start, window.end);
        let request = JsonRequest::post(self.url.clone(), self.payload(window));

        let Some(body) = fetch_or_none(&self.client, &request).await else {
            return Ok(None);
        };
        Ok(self.decode(&body).map(RawPage::new))
    }
}
