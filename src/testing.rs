//! In-process doubles for the adapter and store seams.

use crate::config::catalog::{
    ChangeRule, Extras, FieldMap, LogoRule, Pagination, Protocol, SourceSpec,
};
use crate::config::PipelineConfig;
use crate::models::{
    CanonicalRecord, KeyField, LogoCandidate, RawPage, RawRow, RunSummary, TableStats, Window,
    WriteMode,
};
use crate::schedule::TimeWindow;
use crate::storage::{RecordStore, StoreError};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

pub fn row(v: Value) -> RawRow {
    v.as_object().cloned().unwrap_or_default()
}

/// `n` rows `{"sym": "<prefix><i>", "px": i}`.
pub fn rows(prefix: &str, n: usize) -> Vec<RawRow> {
    (0..n)
        .map(|i| row(json!({"sym": format!("{prefix}{i}"), "px": i as f64 + 1.0})))
        .collect()
}

/// Pipeline settings with millisecond delays.
pub fn fast_settings() -> PipelineConfig {
    PipelineConfig {
        window_delay_ms: 1,
        page_retry_base_ms: 1,
        batch_delay_ms: 1,
        ..PipelineConfig::default()
    }
}

/// Source reading `{"sym", "desc", "px", "pct"}` rows in windows of two.
pub fn source_spec(table: &str) -> SourceSpec {
    SourceSpec {
        name: "test-source".into(),
        enabled: true,
        protocol: Protocol::Quote { url: "http://unused.test".into(), root: "x".into() },
        pagination: Pagination::Sequential { window_size: 2, total: 10, first_page: 0 },
        fields: FieldMap {
            symbol: "sym".into(),
            name: vec!["desc".into()],
            last: "px".into(),
            change: ChangeRule::Percent { field: "pct".into() },
            precision: 2,
            flag: "BR".into(),
            logo: LogoRule::None,
            id: None,
            opening_price: None,
            require_price: false,
            extras: Extras::default(),
        },
        table: table.into(),
        key: KeyField::Symbol,
        write_mode: WriteMode::Upsert,
        batch_size: 100,
        window: TimeWindow::from_hours(0.0, 24.0),
        interval_minutes: 10,
        snapshot_path: None,
        window_delay_ms: None,
        batch_delay_ms: None,
    }
}

/// Adapter answering from a per-page script; unscripted pages are
/// unavailable. Each call pops the next answer for that page, the last one
/// repeating.
#[derive(Default)]
pub struct ScriptedAdapter {
    pages: Mutex<HashMap<u32, Vec<Option<RawPage>>>>,
    calls: Mutex<Vec<Window>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, page: u32, answers: Vec<Option<RawPage>>) -> Self {
        if let Ok(mut pages) = self.pages.lock() {
            pages.insert(page, answers);
        }
        self
    }

    pub fn calls(&self) -> Vec<Window> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, page: u32) -> usize {
        self.calls().iter().filter(|w| w.page == page).count()
    }
}

#[async_trait]
impl crate::scraper::SourceAdapter for ScriptedAdapter {
    async fn fetch_page(&self, window: Window) -> Result<Option<RawPage>> {
        self.calls.lock().expect("calls lock").push(window);
        let mut pages = self.pages.lock().expect("pages lock");
        let Some(answers) = pages.get_mut(&window.page) else {
            return Ok(None);
        };
        if answers.len() > 1 {
            Ok(answers.remove(0))
        } else {
            Ok(answers.first().cloned().flatten())
        }
    }
}

/// Store keeping each table as a key → record map. `fail_on_write` makes
/// the n-th write call (1-based, across upsert and insert) fail.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, BTreeMap<String, CanonicalRecord>>>,
    writes: Mutex<usize>,
    fail_on_write: Option<usize>,
    fail_delete: bool,
    pub runs: Mutex<Vec<RunSummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_write(n: usize) -> Self {
        Self { fail_on_write: Some(n), ..Self::default() }
    }

    pub fn failing_delete() -> Self {
        Self { fail_delete: true, ..Self::default() }
    }

    pub fn seed(&self, table: &str, key: KeyField, records: Vec<CanonicalRecord>) {
        let mut tables = self.tables.lock().expect("tables lock");
        let t = tables.entry(table.to_string()).or_default();
        for r in records {
            if let Some(k) = key.value_of(&r) {
                t.insert(k, r);
            }
        }
    }

    pub fn table(&self, table: &str) -> BTreeMap<String, CanonicalRecord> {
        self.tables
            .lock()
            .expect("tables lock")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn write_calls(&self) -> usize {
        *self.writes.lock().expect("writes lock")
    }

    fn next_write(&self) -> Result<(), StoreError> {
        let mut writes = self.writes.lock().expect("writes lock");
        *writes += 1;
        if Some(*writes) == self.fail_on_write {
            return Err(StoreError::Rejected { status: 500, body: "scripted failure".into() });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(
        &self,
        table: &str,
        key: KeyField,
        records: &[CanonicalRecord],
    ) -> Result<usize, StoreError> {
        self.next_write()?;
        self.seed(table, key, records.to_vec());
        Ok(records.len())
    }

    async fn insert(&self, table: &str, records: &[CanonicalRecord]) -> Result<usize, StoreError> {
        self.next_write()?;
        let mut tables = self.tables.lock().expect("tables lock");
        let t = tables.entry(table.to_string()).or_default();
        for r in records {
            if t.contains_key(&r.symbol) {
                return Err(StoreError::Rejected { status: 409, body: r.symbol.clone() });
            }
        }
        for r in records {
            t.insert(r.symbol.clone(), r.clone());
        }
        Ok(records.len())
    }

    async fn delete_keys(&self, table: &str, _key: KeyField, keys: &[String]) -> Result<usize, StoreError> {
        if self.fail_delete {
            return Err(StoreError::Rejected { status: 500, body: "scripted failure".into() });
        }
        let mut tables = self.tables.lock().expect("tables lock");
        let t = tables.entry(table.to_string()).or_default();
        Ok(keys.iter().filter(|k| t.remove(*k).is_some()).count())
    }

    async fn stats(&self, table: &str, flag: &str) -> Result<TableStats, StoreError> {
        let t = self.table(table);
        let rows = t.values().filter(|r| r.flag == flag).count() as i64;
        Ok(TableStats { rows, latest: None })
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        self.runs.lock().expect("runs lock").push(summary.clone());
        Ok(())
    }

    async fn missing_logos(&self, table: &str, key: KeyField) -> Result<Vec<LogoCandidate>, StoreError> {
        Ok(self
            .table(table)
            .values()
            .filter(|r| r.logo_url.as_deref().unwrap_or("").is_empty())
            .filter_map(|r| Some(LogoCandidate { key: key.value_of(r)?, symbol: r.symbol.clone() }))
            .collect())
    }

    async fn set_logo(
        &self,
        table: &str,
        _key: KeyField,
        key_value: &str,
        logo_url: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().expect("tables lock");
        if let Some(r) = tables.get_mut(table).and_then(|t| t.get_mut(key_value)) {
            r.logo_url = Some(logo_url.to_string());
        }
        Ok(())
    }
}
