//! Logo backfill: fill `logo_url` on rows that lack one by matching their
//! ticker root against a screener listing.

use crate::config::catalog::TRADINGVIEW_LOGO_TEMPLATE;
use crate::models::{KeyField, RawRow, Window};
use crate::scraper::cleaner::{logo_url, parse_text};
use crate::scraper::SourceAdapter;
use crate::storage::RecordStore;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{info, warn};

const PREFIX_LEN: usize = 4;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LogoReport {
    pub candidates: usize,
    pub updated: usize,
    pub failed: usize,
}

fn ticker_root(symbol: &str) -> String {
    symbol.chars().take(PREFIX_LEN).collect()
}

/// Ticker root → logo id. Later rows overwrite earlier ones.
pub fn prefix_map(rows: &[RawRow]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for row in rows {
        let name = row.get("name").and_then(parse_text);
        let logoid = row.get("logoid").and_then(parse_text);
        if let (Some(name), Some(logoid)) = (name, logoid) {
            map.insert(ticker_root(&name), logoid);
        }
    }
    map
}

pub async fn backfill_logos(
    store: &dyn RecordStore,
    table: &str,
    key: KeyField,
    screener: &dyn SourceAdapter,
    window: Window,
) -> Result<LogoReport> {
    let candidates = store
        .missing_logos(table, key)
        .await
        .with_context(|| format!("Listing rows without logo in {}", table))?;

    let mut report = LogoReport { candidates: candidates.len(), ..Default::default() };
    if candidates.is_empty() {
        info!("{}: no rows without logo", table);
        return Ok(report);
    }

    let rows = screener
        .fetch_page(window)
        .await?
        .map(|p| p.rows)
        .unwrap_or_default();
    if rows.is_empty() {
        warn!("Screener returned no rows, nothing to match");
        return Ok(report);
    }
    let logos = prefix_map(&rows);

    for c in &candidates {
        let Some(logoid) = logos.get(&ticker_root(&c.symbol)) else {
            continue;
        };
        let url = logo_url(TRADINGVIEW_LOGO_TEMPLATE, logoid);
        match store.set_logo(table, key, &c.key, &url).await {
            Ok(()) => {
                info!("{} → {}", c.symbol, url);
                report.updated += 1;
            }
            Err(e) => {
                warn!("{}: logo update failed: {}", c.symbol, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "{}: {} of {} logos filled ({} failed)",
        table, report.updated, report.candidates, report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalRecord, RawPage};
    use crate::testing::{row, MemoryStore, ScriptedAdapter};
    use serde_json::json;

    fn with_id(symbol: &str, id: i64, logo: Option<&str>) -> CanonicalRecord {
        let mut r = CanonicalRecord::new(symbol, "BR");
        r.id = Some(id);
        r.logo_url = logo.map(String::from);
        r
    }

    #[test]
    fn test_prefix_map() {
        let rows = vec![
            row(json!({"name": "PETR3", "logoid": "brasileiro-petrobras"})),
            row(json!({"name": "VALE3", "logoid": null})),
            row(json!({"name": "PETR4", "logoid": "petrobras"})),
        ];
        let map = prefix_map(&rows);
        assert_eq!(map.len(), 1);
        assert_eq!(map["PETR"], "petrobras");
    }

    #[tokio::test]
    async fn test_backfill_updates_matching_rows() {
        let store = MemoryStore::new();
        store.seed(
            "investing_data",
            KeyField::Id,
            vec![
                with_id("PETR4", 1, None),
                with_id("ITUB4", 2, Some("")),
                with_id("VALE3", 3, Some("https://existing.svg")),
            ],
        );
        let screener = ScriptedAdapter::new().page(
            0,
            vec![Some(RawPage::new(vec![
                row(json!({"name": "PETR3", "logoid": "petrobras"})),
                row(json!({"name": "VALE3", "logoid": "vale"})),
            ]))],
        );

        let report = backfill_logos(
            &store,
            "investing_data",
            KeyField::Id,
            &screener,
            Window { page: 0, start: 0, end: 2000 },
        )
        .await
        .unwrap();

        assert_eq!(report, LogoReport { candidates: 2, updated: 1, failed: 0 });
        let table = store.table("investing_data");
        assert_eq!(
            table["1"].logo_url.as_deref(),
            Some("https://s3-symbol-logo.tradingview.com/petrobras.svg")
        );
        assert_eq!(table["2"].logo_url.as_deref(), Some(""));
        assert_eq!(table["3"].logo_url.as_deref(), Some("https://existing.svg"));
    }

    #[tokio::test]
    async fn test_no_candidates_skips_screener() {
        let store = MemoryStore::new();
        let screener = ScriptedAdapter::new();
        let report = backfill_logos(
            &store,
            "investing_data",
            KeyField::Id,
            &screener,
            Window { page: 0, start: 0, end: 2000 },
        )
        .await
        .unwrap();
        assert_eq!(report.candidates, 0);
        assert!(screener.calls().is_empty());
    }
}
