pub mod rest;

use crate::config::{HttpConfig, StoreBackend, StoreConfig};
use crate::models::{CanonicalRecord, KeyField, LatestRecord, LogoCandidate, RunSummary, TableStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use duckdb::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

use self::rest::RestStore;

// ── Store abstraction ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid table name '{0}'")]
    InvalidTable(String),
    #[error("store endpoint is not configured")]
    NotConfigured,
    #[error("duckdb: {0}")]
    Duck(#[from] duckdb::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected store response: {0}")]
    Decode(String),
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Keyed tables the pipeline writes into.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert-or-overwrite one batch keyed on `key`. Returns rows written.
    async fn upsert(
        &self,
        table: &str,
        key: KeyField,
        records: &[CanonicalRecord],
    ) -> Result<usize, StoreError>;

    /// Plain insert of one batch.
    async fn insert(&self, table: &str, records: &[CanonicalRecord]) -> Result<usize, StoreError>;

    /// Delete every row whose key is in `keys`.
    async fn delete_keys(&self, table: &str, key: KeyField, keys: &[String]) -> Result<usize, StoreError>;

    /// Row count and most recent row for one flag.
    async fn stats(&self, table: &str, flag: &str) -> Result<TableStats, StoreError>;

    async fn record_run(&self, summary: &RunSummary) -> Result<(), StoreError>;

    /// Rows with a null or empty `logo_url`.
    async fn missing_logos(&self, table: &str, key: KeyField) -> Result<Vec<LogoCandidate>, StoreError>;

    async fn set_logo(
        &self,
        table: &str,
        key: KeyField,
        key_value: &str,
        logo_url: &str,
    ) -> Result<(), StoreError>;
}

/// Table names end up inside SQL text and URL paths.
pub fn checked_table(table: &str) -> Result<&str, StoreError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid { Ok(table) } else { Err(StoreError::InvalidTable(table.to_string())) }
}

/// Open the configured backend. DuckDB tables are created for every
/// `(table, key)` pair when migrations are enabled.
pub fn open_store(
    store: &StoreConfig,
    http: &HttpConfig,
    tables: &[(String, KeyField)],
) -> Result<Arc<dyn RecordStore>> {
    match store.backend {
        StoreBackend::Duckdb => {
            let repo = Repository::open(&store.db_path).context("Failed to open DuckDB")?;
            if store.run_migrations {
                repo.run_migrations(tables)?;
            }
            Ok(Arc::new(repo))
        }
        StoreBackend::Postgrest => Ok(Arc::new(RestStore::new(store, http)?)),
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

const RUN_LOG_DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS scrape_runs_seq;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  INTEGER PRIMARY KEY DEFAULT nextval('scrape_runs_seq'),
    source              VARCHAR NOT NULL,
    target_table        VARCHAR NOT NULL,
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP NOT NULL,
    status              VARCHAR NOT NULL,
    rows_fetched        INTEGER DEFAULT 0,
    records_mapped      INTEGER DEFAULT 0,
    records_discarded   INTEGER DEFAULT 0,
    succeeded           INTEGER DEFAULT 0,
    failed              INTEGER DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

/// Column order shared by every record table and every insert statement.
const RECORD_COLUMNS: [&str; 15] = [
    "id", "symbol", "name", "last", "chg_pct", "flag", "logo_url", "market_cap", "aum",
    "\"type\"", "typespecs", "opening_price", "country", "quoted_at", "scraped_at",
];

fn record_table_ddl(table: &str, key: KeyField) -> String {
    let (id_pk, symbol_pk) = match key {
        KeyField::Id => (" PRIMARY KEY", ""),
        KeyField::Symbol => ("", " PRIMARY KEY"),
    };
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id             BIGINT{id_pk},
    symbol         VARCHAR NOT NULL{symbol_pk},
    name           VARCHAR,
    last           DOUBLE,
    chg_pct        DOUBLE,
    flag           VARCHAR NOT NULL,
    logo_url       VARCHAR,
    market_cap     DOUBLE,
    aum            DOUBLE,
    "type"         VARCHAR,
    typespecs      VARCHAR,
    opening_price  DOUBLE,
    country        VARCHAR,
    quoted_at      VARCHAR,
    scraped_at     TIMESTAMP NOT NULL
);
"#
    )
}

fn insert_sql(table: &str) -> String {
    let placeholders = vec!["?"; RECORD_COLUMNS.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        RECORD_COLUMNS.join(", "),
        placeholders
    )
}

fn upsert_sql(table: &str, key: KeyField) -> String {
    let updates: Vec<String> = RECORD_COLUMNS
        .iter()
        .filter(|c| **c != key.column())
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {}",
        insert_sql(table),
        key.column(),
        updates.join(", ")
    )
}

// ── Repository ────────────────────────────────────────────────────────────────

/// Local DuckDB store.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    pub fn run_migrations(&self, tables: &[(String, KeyField)]) -> Result<()> {
        info!("Running migrations…");
        let conn = self.lock()?;
        conn.execute_batch(RUN_LOG_DDL).context("Run log DDL failed")?;
        for (table, key) in tables {
            let table = checked_table(table)?;
            conn.execute_batch(&record_table_ddl(table, *key))
                .with_context(|| format!("DDL failed for {}", table))?;
        }
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn write_batch(&self, sql: &str, records: &[CanonicalRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(sql)?;
            for r in records {
                let typespecs = r
                    .typespecs
                    .as_ref()
                    .map(|t| serde_json::to_string(t).unwrap_or_default());
                let scraped_at = r.scraped_at.unwrap_or_else(|| Utc::now().naive_utc());
                stmt.execute(params![
                    r.id, r.symbol, r.name, r.last, r.chg_pct, r.flag, r.logo_url,
                    r.market_cap, r.aum, r.asset_type, typespecs, r.opening_price,
                    r.country, r.quoted_at, scraped_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    #[cfg(test)]
    pub fn run_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM scrape_runs")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }
}

#[async_trait]
impl RecordStore for Repository {
    async fn upsert(
        &self,
        table: &str,
        key: KeyField,
        records: &[CanonicalRecord],
    ) -> Result<usize, StoreError> {
        let table = checked_table(table)?;
        self.write_batch(&upsert_sql(table, key), records)
    }

    async fn insert(&self, table: &str, records: &[CanonicalRecord]) -> Result<usize, StoreError> {
        let table = checked_table(table)?;
        self.write_batch(&insert_sql(table), records)
    }

    async fn delete_keys(&self, table: &str, key: KeyField, keys: &[String]) -> Result<usize, StoreError> {
        let table = checked_table(table)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!("DELETE FROM {} WHERE {} IN ({})", table, key.column(), placeholders);
        let conn = self.lock()?;
        let deleted = match key {
            KeyField::Symbol => conn.execute(&sql, params_from_iter(keys.iter()))?,
            KeyField::Id => {
                let ids: Vec<i64> = keys.iter().filter_map(|k| k.parse().ok()).collect();
                if ids.len() != keys.len() {
                    return Err(StoreError::Decode("non-numeric id in key set".into()));
                }
                conn.execute(&sql, params_from_iter(ids.iter()))?
            }
        };
        Ok(deleted)
    }

    async fn stats(&self, table: &str, flag: &str) -> Result<TableStats, StoreError> {
        let table = checked_table(table)?;
        let conn = self.lock()?;

        let mut s = conn.prepare(&format!("SELECT COUNT(*) FROM {} WHERE flag = ?", table))?;
        let rows: i64 = s.query_row(params![flag], |r| r.get(0))?;

        let mut s = conn.prepare(&format!(
            "SELECT symbol, name, last, chg_pct, CAST(scraped_at AS VARCHAR) FROM {} \
             WHERE flag = ? ORDER BY scraped_at DESC LIMIT 1",
            table
        ))?;
        let latest = s
            .query_map(params![flag], |r| {
                Ok(LatestRecord {
                    symbol: r.get(0)?,
                    name: r.get(1)?,
                    last: r.get(2)?,
                    chg_pct: r.get(3)?,
                    written_at: r.get(4)?,
                })
            })?
            .next()
            .transpose()?;

        Ok(TableStats { rows, latest })
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"INSERT INTO scrape_runs
               (source, target_table, started_at, finished_at, status, rows_fetched,
                records_mapped, records_discarded, succeeded, failed, error_msg)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                summary.source,
                summary.table,
                summary.started_at,
                summary.finished_at,
                summary.status(),
                summary.rows_fetched as i64,
                summary.records_mapped as i64,
                summary.records_discarded as i64,
                summary.succeeded as i64,
                summary.failed as i64,
                summary.error
            ],
        )?;
        Ok(())
    }

    async fn missing_logos(&self, table: &str, key: KeyField) -> Result<Vec<LogoCandidate>, StoreError> {
        let table = checked_table(table)?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT CAST({} AS VARCHAR), symbol FROM {} WHERE logo_url IS NULL OR logo_url = '' ORDER BY symbol",
            key.column(),
            table
        ))?;
        let candidates = stmt
            .query_map([], |r| Ok(LogoCandidate { key: r.get(0)?, symbol: r.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(candidates)
    }

    async fn set_logo(
        &self,
        table: &str,
        key: KeyField,
        key_value: &str,
        logo_url: &str,
    ) -> Result<(), StoreError> {
        let table = checked_table(table)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "UPDATE {} SET logo_url = ? WHERE CAST({} AS VARCHAR) = ?",
                table,
                key.column()
            ),
            params![logo_url, key_value],
        )?;
        Ok(())
    }
}
