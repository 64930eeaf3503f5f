use crate::config::{HttpConfig, StoreConfig};
use crate::models::{CanonicalRecord, KeyField, LatestRecord, LogoCandidate, RunSummary, TableStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{checked_table, RecordStore, StoreError};

/// PostgREST-compatible table API (Supabase and friends).
pub struct RestStore {
    client: Client,
    base: Option<Url>,
    api_key: Option<String>,
    run_log_table: Option<String>,
    recency_column: String,
}

impl RestStore {
    pub fn new(store: &StoreConfig, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&http.user_agent)
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()
            .context("Failed to build store HTTP client")?;

        let base = store
            .url
            .as_deref()
            .map(|u| Url::parse(u).with_context(|| format!("Invalid store URL {}", u)))
            .transpose()?;

        Ok(Self {
            client,
            base,
            api_key: store.api_key.clone(),
            run_log_table: store.run_log_table.clone(),
            recency_column: store.recency_column.clone(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        let base = self.base.as_ref().ok_or(StoreError::NotConfigured)?;
        let table = checked_table(table)?;
        let root = base.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/rest/v1/{}", root, table))
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            req = req
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }
        req
    }

    async fn send(req: RequestBuilder) -> Result<Response, StoreError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Rejected { status: status.as_u16(), body })
    }

    async fn post_records(
        &self,
        url: Url,
        prefer: &str,
        records: &[CanonicalRecord],
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let body = serde_json::to_value(records).map_err(|e| StoreError::Decode(e.to_string()))?;
        let mut url = url;
        url.query_pairs_mut().append_pair("columns", &column_list(&body));
        let req = self
            .request(Method::POST, url)
            .header("Prefer", prefer)
            .json(&body);
        Self::send(req).await?;
        Ok(records.len())
    }
}

/// PostgREST `in.(...)` list; symbols are quoted, ids are bare.
fn in_filter(key: KeyField, keys: &[String]) -> String {
    let items: Vec<String> = match key {
        KeyField::Id => keys.to_vec(),
        KeyField::Symbol => keys
            .iter()
            .map(|k| format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect(),
    };
    format!("in.({})", items.join(","))
}

/// Union of the keys of a JSON array of objects. Records skip empty
/// extension fields, so a batch may not share one key set.
fn column_list(body: &Value) -> String {
    let mut columns = BTreeSet::new();
    for obj in body.as_array().into_iter().flatten().filter_map(Value::as_object) {
        columns.extend(obj.keys().map(String::as_str));
    }
    columns.into_iter().collect::<Vec<_>>().join(",")
}

/// Total from a `Content-Range: 0-0/42` header.
fn range_total(header: Option<&str>) -> Option<i64> {
    header?.rsplit('/').next()?.trim().parse().ok()
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn upsert(
        &self,
        table: &str,
        key: KeyField,
        records: &[CanonicalRecord],
    ) -> Result<usize, StoreError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair("on_conflict", key.column());
        self.post_records(url, "resolution=merge-duplicates,return=minimal", records)
            .await
    }

    async fn insert(&self, table: &str, records: &[CanonicalRecord]) -> Result<usize, StoreError> {
        let url = self.table_url(table)?;
        self.post_records(url, "return=minimal", records).await
    }

    async fn delete_keys(&self, table: &str, key: KeyField, keys: &[String]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair(key.column(), &in_filter(key, keys));
        debug!("DELETE {} ({} keys)", table, keys.len());
        Self::send(self.request(Method::DELETE, url).header("Prefer", "return=minimal")).await?;
        Ok(keys.len())
    }

    async fn stats(&self, table: &str, flag: &str) -> Result<TableStats, StoreError> {
        let recency = checked_table(&self.recency_column)?;
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("flag", &format!("eq.{}", flag))
            .append_pair("select", &format!("symbol,name,last,chg_pct,{}", recency))
            .append_pair("order", &format!("{}.desc", recency))
            .append_pair("limit", "1");

        let resp = Self::send(self.request(Method::GET, url).header("Prefer", "count=exact")).await?;
        let rows = range_total(
            resp.headers()
                .get("content-range")
                .and_then(|h| h.to_str().ok()),
        )
        .ok_or_else(|| StoreError::Decode("missing Content-Range total".into()))?;

        let body: Vec<Value> = resp.json().await?;
        let latest = body.into_iter().next().map(|row| LatestRecord {
            symbol: row.get("symbol").and_then(value_text).unwrap_or_default(),
            name: row.get("name").and_then(value_text),
            last: row.get("last").and_then(Value::as_f64),
            chg_pct: row.get("chg_pct").and_then(Value::as_f64),
            written_at: row.get(recency).and_then(value_text),
        });

        Ok(TableStats { rows, latest })
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        let Some(table) = &self.run_log_table else {
            return Ok(());
        };
        let mut body =
            serde_json::to_value(summary).map_err(|e| StoreError::Decode(e.to_string()))?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("status".into(), Value::from(summary.status()));
        }
        let req = self
            .request(Method::POST, self.table_url(table)?)
            .header("Prefer", "return=minimal")
            .json(&body);
        Self::send(req).await?;
        Ok(())
    }

    async fn missing_logos(&self, table: &str, key: KeyField) -> Result<Vec<LogoCandidate>, StoreError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", &format!("{},symbol", key.column()))
            .append_pair("or", "(logo_url.is.null,logo_url.eq.)")
            .append_pair("order", "symbol.asc");

        let resp = Self::send(self.request(Method::GET, url)).await?;
        let rows: Vec<Value> = resp.json().await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(LogoCandidate {
                    key: row.get(key.column()).and_then(value_text)?,
                    symbol: row.get("symbol").and_then(value_text)?,
                })
            })
            .collect())
    }

    async fn set_logo(
        &self,
        table: &str,
        key: KeyField,
        key_value: &str,
        logo_url: &str,
    ) -> Result<(), StoreError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair(key.column(), &format!("eq.{}", key_value));
        let req = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "logo_url": logo_url }));
        Self::send(req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(url: Option<String>) -> RestStore {
        let cfg = StoreConfig {
            url,
            api_key: Some("anon-key".into()),
            run_log_table: Some("scrape_runs".into()),
            ..Default::default()
        };
        RestStore::new(&cfg, &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_in_filter() {
        let keys = vec!["PETR4".to_string(), "A\"B".to_string()];
        assert_eq!(in_filter(KeyField::Symbol, &keys), r#"in.("PETR4","A\"B")"#);
        assert_eq!(in_filter(KeyField::Id, &["1".into(), "32".into()]), "in.(1,32)");
    }

    #[test]
    fn test_column_list_is_union() {
        let body = json!([{"symbol": "A", "flag": "BR"}, {"symbol": "B", "aum": 1.0}]);
        assert_eq!(column_list(&body), "aum,flag,symbol");
    }

    #[test]
    fn test_range_total() {
        assert_eq!(range_total(Some("0-0/1234")), Some(1234));
        assert_eq!(range_total(Some("*/0")), Some(0));
        assert_eq!(range_total(Some("0-0/*")), None);
        assert_eq!(range_total(None), None);
    }

    #[tokio::test]
    async fn test_unconfigured_store_fails_on_use() {
        let s = store(None);
        let err = s.insert("b3_data", &[CanonicalRecord::new("PETR4", "BR")]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotConfigured));
    }

    #[tokio::test]
    async fn test_upsert_posts_merge_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/b3_data"))
            .and(query_param("on_conflict", "symbol"))
            .and(header("apikey", "anon-key"))
            .and(header_exists("Prefer"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let s = store(Some(server.uri()));
        let written = s
            .upsert(
                "b3_data",
                KeyField::Symbol,
                &[CanonicalRecord::new("PETR4", "BR"), CanonicalRecord::new("VALE3", "BR")],
            )
            .await
            .unwrap();
        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn test_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key"))
            .mount(&server)
            .await;

        let s = store(Some(server.uri()));
        let err = s.insert("fii_data", &[CanonicalRecord::new("HGLG11", "BR")]).await.unwrap_err();
        match err {
            StoreError::Rejected { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "duplicate key");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stats_reads_count_and_latest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/tradingview_data"))
            .and(query_param("flag", "eq.US"))
            .and(query_param("order", "created_at.desc"))
            .and(header("Prefer", "count=exact"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "0-0/511")
                    .set_body_json(json!([{
                        "symbol": "AAPL", "name": "Apple Inc.", "last": 190.1,
                        "chg_pct": 1.6, "created_at": "2025-03-14T18:00:00"
                    }])),
            )
            .mount(&server)
            .await;

        let stats = store(Some(server.uri())).stats("tradingview_data", "US").await.unwrap();
        assert_eq!(stats.rows, 511);
        let latest = stats.latest.unwrap();
        assert_eq!(latest.symbol, "AAPL");
        assert_eq!(latest.written_at.as_deref(), Some("2025-03-14T18:00:00"));
    }

    #[tokio::test]
    async fn test_missing_logos_and_patch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/investing_data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 7, "symbol": "PETR4"},
                {"id": null, "symbol": "BROKEN"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/investing_data"))
            .and(query_param("id", "eq.7"))
            .and(body_partial_json(json!({"logo_url": "https://logo/petrobras.svg"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let s = store(Some(server.uri()));
        let missing = s.missing_logos("investing_data", KeyField::Id).await.unwrap();
        assert_eq!(missing, vec![LogoCandidate { key: "7".into(), symbol: "PETR4".into() }]);
        s.set_logo("investing_data", KeyField::Id, "7", "https://logo/petrobras.svg")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_run_posts_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/scrape_runs"))
            .and(body_partial_json(json!({"source": "usd-brl", "status": "partial"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let now = chrono::Utc::now().naive_utc();
        let summary = RunSummary {
            source: "usd-brl".into(),
            table: "cotacoes_cache".into(),
            started_at: now,
            finished_at: now,
            rows_fetched: 1,
            records_mapped: 1,
            records_discarded: 0,
            succeeded: 0,
            failed: 1,
            error: None,
        };
        store(Some(server.uri())).record_run(&summary).await.unwrap();
    }
}
