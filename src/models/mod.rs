use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Raw upstream data ─────────────────────────────────────────────────────────

/// One upstream row, addressed by field name.
///
/// Screener rows arrive as positional arrays and are zipped with the
/// declared column list before they reach the mapper.
pub type RawRow = Map<String, Value>;

/// Result of one successful page request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub rows: Vec<RawRow>,
    /// Only reported by sources that advertise their page count.
    pub total_pages: Option<u32>,
}

impl RawPage {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows, total_pages: None }
    }
}

/// One requested slice of an upstream result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Page index as the upstream counts it.
    pub page: u32,
    /// Offset range `[start, end)`.
    pub start: u32,
    pub end: u32,
}

impl Window {
    pub fn size(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

// ── Canonical record ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub symbol: String,
    pub name: Option<String>,
    pub last: Option<f64>,
    pub chg_pct: Option<f64>,
    pub flag: String,
    pub logo_url: Option<String>,

    // Source-specific extensions, carried through as received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aum: Option<f64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typespecs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_at: Option<String>,

    #[serde(skip)]
    pub scraped_at: Option<NaiveDateTime>,
}

impl CanonicalRecord {
    pub fn new(symbol: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            name: None,
            last: None,
            chg_pct: None,
            flag: flag.into(),
            logo_url: None,
            market_cap: None,
            aum: None,
            asset_type: None,
            typespecs: None,
            opening_price: None,
            country: None,
            quoted_at: None,
            scraped_at: None,
        }
    }
}

// ── Key / write mode ──────────────────────────────────────────────────────────

/// Unique column a table is keyed on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    Symbol,
    Id,
}

impl KeyField {
    pub fn column(&self) -> &'static str {
        match self {
            KeyField::Symbol => "symbol",
            KeyField::Id => "id",
        }
    }

    /// Key value of a record as text, `None` when the record lacks it.
    pub fn value_of(&self, record: &CanonicalRecord) -> Option<String> {
        match self {
            KeyField::Symbol => Some(record.symbol.clone()).filter(|s| !s.is_empty()),
            KeyField::Id => record.id.map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert-or-overwrite by key; never prunes.
    #[default]
    Upsert,
    /// Delete the run's key set, then insert fresh rows.
    Replace,
}

// ── Run bookkeeping ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub table: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub rows_fetched: usize,
    pub records_mapped: usize,
    pub records_discarded: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn status(&self) -> &'static str {
        if self.error.is_some() {
            "error"
        } else if self.failed > 0 {
            "partial"
        } else {
            "success"
        }
    }
}

/// Snapshot printed by `--stats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStats {
    pub rows: i64,
    pub latest: Option<LatestRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LatestRecord {
    pub symbol: String,
    pub name: Option<String>,
    pub last: Option<f64>,
    pub chg_pct: Option<f64>,
    /// Rendered timestamp of the row's last write.
    pub written_at: Option<String>,
}

/// Row lacking a logo, as seen by the logo backfill.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogoCandidate {
    pub key: String,
    pub symbol: String,
}
