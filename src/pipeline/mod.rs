//! One source's run: paginate → map → write → record.
//!
//! Every catalog entry goes through the same `Pipeline`; what differs is
//! the adapter picked for its protocol and the `SourceSpec` it carries.
//! Re-running with unchanged upstream data leaves the table unchanged
//! (writes are keyed upserts or a keyed delete-then-insert).

pub mod logos;
pub mod paginator;
pub mod upserter;

use crate::config::{PipelineConfig, SourceSpec};
use crate::models::{RawRow, RunSummary};
use crate::scraper::cleaner::map_rows;
use crate::scraper::SourceAdapter;
use crate::storage::RecordStore;
use crate::utils::Timer;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use self::paginator::{PageSettings, Paginator};
use self::upserter::BatchWriter;

pub struct Pipeline {
    spec: SourceSpec,
    paginator: Paginator,
    writer: BatchWriter,
    store: Arc<dyn RecordStore>,
}

impl Pipeline {
    pub fn new(
        spec: SourceSpec,
        adapter: Arc<dyn SourceAdapter>,
        store: Arc<dyn RecordStore>,
        settings: &PipelineConfig,
    ) -> Self {
        let mut pages = PageSettings::from(settings);
        pages.window_delay = spec.window_delay(pages.window_delay);
        let paginator = Paginator::new(adapter, spec.pagination, pages);
        let writer = BatchWriter::new(
            Arc::clone(&store),
            spec.table.clone(),
            spec.key,
            spec.write_mode,
            spec.batch_size,
            spec.batch_delay(settings.batch_delay()),
        );
        Self { spec, paginator, writer, store }
    }

    pub fn source(&self) -> &str {
        &self.spec.name
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let _t = Timer::start(format!("{} → {}", self.spec.name, self.spec.table));
        let started_at = Utc::now().naive_utc();

        let rows = self.paginator.fetch_all().await;
        let (records, discarded) = map_rows(&self.spec.fields, self.spec.key, &rows, started_at);
        if discarded > 0 {
            warn!("{}: {} rows discarded", self.spec.name, discarded);
        }

        let outcome = self.writer.write_all(&records).await;

        if let Some(path) = &self.spec.snapshot_path {
            if !rows.is_empty() {
                if let Err(e) = write_snapshot(path, &rows) {
                    warn!("{}: snapshot failed: {:#}", self.spec.name, e);
                }
            }
        }

        let summary = RunSummary {
            source: self.spec.name.clone(),
            table: self.spec.table.clone(),
            started_at,
            finished_at: Utc::now().naive_utc(),
            rows_fetched: rows.len(),
            records_mapped: records.len(),
            records_discarded: discarded,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            error: rows.is_empty().then(|| "no rows fetched".to_string()),
        };

        info!(
            "{}: status={} fetched={} mapped={} written={} failed={}",
            summary.source,
            summary.status(),
            summary.rows_fetched,
            summary.records_mapped,
            summary.succeeded,
            summary.failed
        );

        if let Err(e) = self.store.record_run(&summary).await {
            warn!("{}: could not record run: {}", self.spec.name, e);
        }

        Ok(summary)
    }
}

/// Pretty JSON dump of a sweep's raw rows, overwritten each run.
fn write_snapshot(path: &Path, rows: &[RawRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let body = json!({
        "fetched_at": Utc::now().to_rfc3339(),
        "count": rows.len(),
        "rows": rows,
    });
    let text = serde_json::to_string_pretty(&body)?;
    std::fs::write(path, text).with_context(|| format!("Could not write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::catalog::Pagination;
    use crate::models::{KeyField, RawPage, WriteMode};
    use crate::storage::Repository;
    use crate::testing::{fast_settings as settings, row, source_spec as spec, MemoryStore, ScriptedAdapter};
    use serde_json::json;
    use std::time::Duration;

    fn adapter() -> ScriptedAdapter {
        ScriptedAdapter::new()
            .page(
                0,
                vec![Some(RawPage::new(vec![
                    row(json!({"sym": "PETR4", "desc": "Petrobras", "px": 38.5, "pct": "1,25"})),
                    row(json!({"sym": null, "desc": "Ghost", "px": 1.0})),
                ]))],
            )
            .page(
                1,
                vec![Some(RawPage::new(vec![
                    row(json!({"sym": "VALE3", "desc": "Vale", "px": 61.0, "pct": -0.5})),
                ]))],
            )
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(adapter());
        let pipeline = Pipeline::new(spec("b3_data"), adapter.clone(), store.clone(), &settings());

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.rows_fetched, 3);
        assert_eq!(summary.records_mapped, 2);
        assert_eq!(summary.records_discarded, 1);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.status(), "success");
        // Second window came back short, so the walk stopped.
        assert_eq!(adapter.calls().len(), 2);

        let table = store.table("b3_data");
        assert_eq!(table["PETR4"].chg_pct, Some(1.25));
        assert_eq!(table["VALE3"].name.as_deref(), Some("Vale"));
        assert_eq!(store.runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_twice_is_idempotent_on_duckdb() {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations(&[("b3_data".to_string(), KeyField::Symbol)]).unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(repo);

        for _ in 0..2 {
            let pipeline =
                Pipeline::new(spec("b3_data"), Arc::new(adapter()), Arc::clone(&store), &settings());
            pipeline.run().await.unwrap();
        }

        let stats = store.stats("b3_data", "BR").await.unwrap();
        assert_eq!(stats.rows, 2);
    }

    #[tokio::test]
    async fn test_replace_run_twice_is_idempotent_on_duckdb() {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations(&[("fii_data".to_string(), KeyField::Symbol)]).unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(repo);
        let mut spec = spec("fii_data");
        spec.write_mode = WriteMode::Replace;

        let mut counts = Vec::new();
        for _ in 0..2 {
            let pipeline =
                Pipeline::new(spec.clone(), Arc::new(adapter()), Arc::clone(&store), &settings());
            let summary = pipeline.run().await.unwrap();
            assert_eq!(summary.succeeded, 2);
            assert_eq!(summary.failed, 0);
            counts.push(store.stats("fii_data", "BR").await.unwrap().rows);
        }
        assert_eq!(counts, vec![2, 2]);
    }

    #[tokio::test]
    async fn test_source_delays_override_pipeline_defaults() {
        let mut slow = settings();
        slow.window_delay_ms = 60_000;
        slow.batch_delay_ms = 60_000;
        let mut spec = spec("b3_data");
        spec.batch_size = 1;
        spec.window_delay_ms = Some(1);
        spec.batch_delay_ms = Some(1);

        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(spec, Arc::new(adapter()), store.clone(), &slow);
        let summary = tokio::time::timeout(Duration::from_secs(5), pipeline.run())
            .await
            .expect("source delays should apply")
            .unwrap();
        assert_eq!(summary.succeeded, 2);
    }

    #[tokio::test]
    async fn test_no_rows_is_reported_as_error() {
        let store = Arc::new(MemoryStore::new());
        let mut spec = spec("b3_data");
        spec.pagination = Pagination::Sequential { window_size: 2, total: 2, first_page: 0 };
        let pipeline = Pipeline::new(spec, Arc::new(ScriptedAdapter::new()), store.clone(), &settings());

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.status(), "error");
        assert!(store.table("b3_data").is_empty());
        assert_eq!(store.runs.lock().unwrap()[0].status(), "error");
    }

    #[tokio::test]
    async fn test_snapshot_is_written() {
        let dir = std::env::temp_dir().join(format!("market_feed_snap_{}", std::process::id()));
        let path = dir.join("fiis_data.json");
        let mut spec = spec("fii_data");
        spec.snapshot_path = Some(path.clone());

        let store = Arc::new(MemoryStore::new());
        Pipeline::new(spec, Arc::new(adapter()), store, &settings()).run().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let body: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["count"], 3);
        assert_eq!(body["rows"][0]["sym"], "PETR4");
        std::fs::remove_dir_all(&dir).ok();
    }
}
