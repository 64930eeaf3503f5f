//! Built-in upstream sources.
//!
//! Every source shares one pipeline; what differs between them lives here:
//! the wire protocol, how the result set is paged, how a raw row maps onto a
//! `CanonicalRecord`, where the records go and when the source may run.

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::SourceOverride;
use crate::models::{KeyField, WriteMode};
use crate::schedule::TimeWindow;

pub const TRADINGVIEW_LOGO_TEMPLATE: &str = "https://s3-symbol-logo.tradingview.com/{logoid}.svg";
const USD_LOGO_URL: &str = "https://icons.veryicon.com/png/o/miscellaneous/alan-ui/logo-usd-3.png";

const TV_BRAZIL_STOCKS: &str = "https://scanner.tradingview.com/brazil/scan?label-product=screener-stock";
const TV_BRAZIL_ETFS: &str = "https://scanner.tradingview.com/brazil/scan?label-product=screener-etf";
const TV_AMERICA_STOCKS: &str = "https://scanner.tradingview.com/america/scan?label-product=screener-stock";
const TV_AMERICA_ETFS: &str = "https://scanner.tradingview.com/america/scan?label-product=screener-etf";
const INVESTING_EQUITIES: &str =
    "https://api.investing.com/api/financialdata/assets/equitiesByCountry/default";
const AWESOME_USD_BRL: &str = "https://economia.awesomeapi.com.br/json/last/USD-BRL";
const INFOMONEY_RANKING: &str = "https://api.infomoney.com.br/ativos/top-alta-baixa-por-ativo";

const INVESTING_FIELDS: &str = "id,name,symbol,isCFD,high,low,last,lastPairDecimal,change,changePercent,volume,time,isOpen,url,flag,countryNameTranslated,exchangeId,performanceDay,performanceWeek,performanceMonth,performanceYtd,performanceYear,performance3Year,technicalHour,technicalDay,technicalWeek,technicalMonth,avgVolume,fundamentalMarketCap,fundamentalRevenue,fundamentalRatio,fundamentalBeta,pairType";

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub name: String,
    pub enabled: bool,
    pub protocol: Protocol,
    pub pagination: Pagination,
    pub fields: FieldMap,
    pub table: String,
    pub key: KeyField,
    pub write_mode: WriteMode,
    pub batch_size: usize,
    pub window: TimeWindow,
    pub interval_minutes: u64,
    pub snapshot_path: Option<PathBuf>,
    /// Pause between sequential windows; `None` uses the pipeline default.
    pub window_delay_ms: Option<u64>,
    /// Pause between write batches; `None` uses the pipeline default.
    pub batch_delay_ms: Option<u64>,
}

/// Wire protocol of an upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Protocol {
    /// POST a JSON filter body; rows come back as positional arrays whose
    /// order is the `columns` list sent in the request.
    Screener {
        url: String,
        columns: Vec<String>,
        /// Request body minus `columns` and `range`.
        body: Value,
    },
    /// GET with query parameters; rows under `data`.
    Listing {
        url: String,
        params: BTreeMap<String, String>,
        page_param: String,
        page_size_param: String,
    },
    /// GET a single quote object stored under `root`.
    Quote { url: String, root: String },
    /// GET a ranking page; reports `TotalPages` and rows under `Data`.
    Ranking {
        url: String,
        params: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Walk `[0, total)` in windows of `window_size`, one after another.
    Sequential {
        window_size: u32,
        total: u32,
        first_page: u32,
    },
    /// First page reveals the page count; the rest are fetched together.
    FanOut {
        page_size: u32,
        first_page: u32,
        max_pages: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRule {
    /// Field already holds a percentage.
    Percent { field: String },
    /// Percentage derived from absolute close and change.
    Derived { close: String, change: String },
    /// Percent field, falling back to `(last - base) / base * 100` when the
    /// field is missing or zero.
    PercentOrFromBase { field: String, base: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogoRule {
    None,
    Template { field: String, template: String },
    Fixed { url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdRule {
    Field { field: String },
    Fixed { value: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpeningRule {
    /// Copy a field.
    Field { field: String },
    /// Back out the opening price from `last` and the day's percent change.
    FromChange,
}

/// Raw field names feeding each canonical column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extras {
    pub market_cap: Option<String>,
    pub aum: Option<String>,
    pub asset_type: Option<String>,
    pub typespecs: Option<String>,
    pub country: Option<String>,
    pub quoted_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    pub symbol: String,
    /// First non-empty candidate wins.
    pub name: Vec<String>,
    pub last: String,
    pub change: ChangeRule,
    /// Decimal places kept in `chg_pct`.
    pub precision: u32,
    pub flag: String,
    pub logo: LogoRule,
    pub id: Option<IdRule>,
    pub opening_price: Option<OpeningRule>,
    pub require_price: bool,
    pub extras: Extras,
}

impl SourceSpec {
    pub fn apply(&mut self, ov: &SourceOverride) -> Result<()> {
        if let Some(enabled) = ov.enabled {
            self.enabled = enabled;
        }
        if let Some(minutes) = ov.interval_minutes {
            anyhow::ensure!(minutes > 0, "interval_minutes must be positive");
            self.interval_minutes = minutes;
        }
        if let Some(size) = ov.batch_size {
            anyhow::ensure!(size > 0, "batch_size must be positive");
            self.batch_size = size;
        }
        if ov.window_start.is_some() || ov.window_end.is_some() {
            let start = match &ov.window_start {
                Some(s) => TimeWindow::parse_hhmm(s)?,
                None => self.window.start_hour,
            };
            let end = match &ov.window_end {
                Some(s) => TimeWindow::parse_hhmm(s)?,
                None => self.window.end_hour,
            };
            self.window = TimeWindow::new(start, end)?;
        }
        if let Some(table) = &ov.table {
            self.table = table.clone();
        }
        if let Some(path) = &ov.snapshot_path {
            self.snapshot_path = Some(path.clone());
        }
        if let Some(ms) = ov.window_delay_ms {
            self.window_delay_ms = Some(ms);
        }
        if let Some(ms) = ov.batch_delay_ms {
            self.batch_delay_ms = Some(ms);
        }
        Ok(())
    }

    pub fn window_delay(&self, default: Duration) -> Duration {
        self.window_delay_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn batch_delay(&self, default: Duration) -> Duration {
        self.batch_delay_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

fn s(v: &str) -> String {
    v.to_string()
}

fn stock_columns(volume_column: &str, size_column: &str) -> Vec<String> {
    [
        "name", "description", "logoid", "update_mode", "type", "typespecs", "close",
        "pricescale", "minmov", "fractional", "minmove2", "currency", "change",
        volume_column, "relative_volume_10d_calc", size_column,
        "fundamental_currency_code", "price_earnings_ttm", "earnings_per_share_diluted_ttm",
        "earnings_per_share_diluted_yoy_growth_ttm", "dividends_yield_current", "sector.tr",
        "market", "sector", "recommendation_mark", "exchange",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn etf_columns() -> Vec<String> {
    [
        "name", "description", "logoid", "update_mode", "type", "typespecs", "close",
        "pricescale", "minmov", "fractional", "minmove2", "currency", "change", "Value.Traded",
        "relative_volume_10d_calc", "aum", "fundamental_currency_code", "nav_total_return.3Y",
        "expense_ratio", "asset_class.tr", "focus.tr", "exchange",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn and_group(expressions: Vec<Value>) -> Value {
    json!({ "operation": { "operator": "and", "operands": expressions } })
}

fn expr(left: &str, operation: &str, right: Value) -> Value {
    json!({ "expression": { "left": left, "operation": operation, "right": right } })
}

fn any_of(groups: Vec<Value>) -> Value {
    json!({
        "operator": "and",
        "operands": [ { "operation": { "operator": "or", "operands": groups } } ]
    })
}

/// Common and preferred shares, depositary receipts and non-ETF funds.
fn equity_filter() -> Value {
    any_of(vec![
        and_group(vec![expr("type", "equal", json!("stock")), expr("typespecs", "has", json!(["common"]))]),
        and_group(vec![expr("type", "equal", json!("stock")), expr("typespecs", "has", json!(["preferred"]))]),
        and_group(vec![expr("type", "equal", json!("dr"))]),
        and_group(vec![expr("type", "equal", json!("fund")), expr("typespecs", "has_none_of", json!(["etf"]))]),
    ])
}

fn etf_filter() -> Value {
    any_of(vec![
        and_group(vec![expr("typespecs", "has", json!(["etf"]))]),
        and_group(vec![expr("type", "equal", json!("structured"))]),
    ])
}

fn screener_body(market: &str, sort_by: &str, symbolset: &[&str], primary_only: bool) -> Value {
    let symbols = if symbolset.is_empty() {
        json!({})
    } else {
        json!({ "symbolset": symbolset })
    };
    let mut body = json!({
        "ignore_unknown_fields": false,
        "options": { "lang": "en" },
        "sort": { "sortBy": sort_by, "sortOrder": "desc" },
        "symbols": symbols,
        "markets": [market],
    });
    if primary_only {
        body["filter"] = json!([
            { "left": "is_blacklisted", "operation": "equal", "right": false },
            { "left": "is_primary", "operation": "equal", "right": true }
        ]);
    }
    body
}

fn screener_fields(flag: &str, change: ChangeRule, precision: u32) -> FieldMap {
    FieldMap {
        symbol: s("name"),
        name: vec![s("description"), s("name")],
        last: s("close"),
        change,
        precision,
        flag: s(flag),
        logo: LogoRule::Template { field: s("logoid"), template: s(TRADINGVIEW_LOGO_TEMPLATE) },
        id: None,
        opening_price: None,
        require_price: false,
        extras: Extras::default(),
    }
}

fn investing_params(country_id: u32) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert(s("fields-list"), s(INVESTING_FIELDS));
    params.insert(s("country-id"), country_id.to_string());
    params.insert(s("filter-domain"), String::new());
    params.insert(s("limit"), s("0"));
    for flag in [
        "include-additional-indices",
        "include-major-indices",
        "include-other-indices",
        "include-primary-sectors",
        "include-market-overview",
    ] {
        params.insert(s(flag), s("false"));
    }
    params
}

fn ranking_params() -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert(s("sector"), s("Todos"));
    params.insert(s("orderAtributte"), s("Volume"));
    params.insert(s("search"), String::new());
    params
}

fn ranking_fields() -> FieldMap {
    FieldMap {
        symbol: s("StockCode"),
        name: vec![s("StockName")],
        last: s("Value"),
        change: ChangeRule::Percent { field: s("ChangeDayFormatted") },
        precision: 2,
        flag: s("BR"),
        logo: LogoRule::None,
        id: None,
        opening_price: Some(OpeningRule::FromChange),
        require_price: false,
        extras: Extras { quoted_at: Some(s("Date")), ..Extras::default() },
    }
}

pub fn builtin() -> Vec<SourceSpec> {
    let b3_hours = TimeWindow::from_hours(10.0, 17.0);
    let session = TimeWindow::from_hours(9.5, 17.5);

    let mut br_highlights = screener_fields("BR", ChangeRule::Percent { field: s("change") }, 2);
    br_highlights.extras.market_cap = Some(s("market_cap_basic"));
    br_highlights.extras.asset_type = Some(s("type"));
    br_highlights.extras.typespecs = Some(s("typespecs"));

    let mut br_etfs = screener_fields("BR", ChangeRule::Percent { field: s("change") }, 4);
    br_etfs.extras.aum = Some(s("aum"));
    br_etfs.extras.asset_type = Some(s("type"));
    br_etfs.extras.typespecs = Some(s("typespecs"));

    let mut us_stocks = screener_fields(
        "US",
        ChangeRule::Derived { close: s("close"), change: s("change") },
        4,
    );
    us_stocks.require_price = true;

    let mut us_etfs = screener_fields(
        "US",
        ChangeRule::Derived { close: s("close"), change: s("change") },
        4,
    );
    us_etfs.require_price = true;

    let mut br_stocks_body = screener_body("brazil", "market_cap_basic", &[], false);
    br_stocks_body["filter2"] = equity_filter();
    let mut br_highlights_body =
        screener_body("brazil", "market_cap_basic", &["SYML:BMFBOVESPA;IBOV"], true);
    br_highlights_body["filter2"] = equity_filter();
    let mut br_etfs_body = screener_body("brazil", "aum", &[], false);
    br_etfs_body["filter2"] = etf_filter();
    let mut us_stocks_body =
        screener_body("america", "market_cap_basic", &["SYML:SP;SPX", "SYML:NASDAQ;NDX"], true);
    us_stocks_body["filter2"] = equity_filter();
    let mut us_etfs_body = screener_body("america", "close", &[], false);
    us_etfs_body["filter2"] = etf_filter();

    vec![
        SourceSpec {
            name: s("tv-br-stocks"),
            enabled: true,
            protocol: Protocol::Screener {
                url: s(TV_BRAZIL_STOCKS),
                columns: stock_columns("volume", "market_cap_basic"),
                body: br_stocks_body,
            },
            pagination: Pagination::Sequential { window_size: 300, total: 2000, first_page: 0 },
            fields: screener_fields("BR", ChangeRule::Percent { field: s("change") }, 2),
            table: s("b3_data"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Upsert,
            batch_size: 100,
            window: b3_hours,
            interval_minutes: 15,
            snapshot_path: None,
            window_delay_ms: None,
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("tv-br-highlights"),
            enabled: true,
            protocol: Protocol::Screener {
                url: s(TV_BRAZIL_STOCKS),
                columns: stock_columns("volume", "market_cap_basic"),
                body: br_highlights_body,
            },
            pagination: Pagination::Sequential { window_size: 25, total: 75, first_page: 0 },
            fields: br_highlights,
            table: s("b3_destaque"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Upsert,
            batch_size: 50,
            window: b3_hours,
            interval_minutes: 40,
            snapshot_path: None,
            window_delay_ms: Some(2000),
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("tv-br-etfs"),
            enabled: true,
            protocol: Protocol::Screener {
                url: s(TV_BRAZIL_ETFS),
                columns: etf_columns(),
                body: br_etfs_body,
            },
            pagination: Pagination::Sequential { window_size: 100, total: 200, first_page: 0 },
            fields: br_etfs,
            table: s("etfbr_data"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Upsert,
            batch_size: 50,
            window: b3_hours,
            interval_minutes: 30,
            snapshot_path: None,
            window_delay_ms: None,
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("tv-us-stocks"),
            enabled: true,
            protocol: Protocol::Screener {
                url: s(TV_AMERICA_STOCKS),
                columns: stock_columns("volume", "market_cap_basic"),
                body: us_stocks_body,
            },
            pagination: Pagination::Sequential { window_size: 300, total: 511, first_page: 0 },
            fields: us_stocks,
            table: s("tradingview_data"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Upsert,
            batch_size: 100,
            window: session,
            interval_minutes: 15,
            snapshot_path: None,
            window_delay_ms: None,
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("tv-us-etfs"),
            enabled: true,
            protocol: Protocol::Screener {
                url: s(TV_AMERICA_ETFS),
                columns: etf_columns(),
                body: us_etfs_body,
            },
            pagination: Pagination::Sequential { window_size: 700, total: 700, first_page: 0 },
            fields: us_etfs,
            table: s("etf_data"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Upsert,
            batch_size: 100,
            window: session,
            interval_minutes: 15,
            snapshot_path: None,
            window_delay_ms: None,
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("investing-br"),
            enabled: true,
            protocol: Protocol::Listing {
                url: s(INVESTING_EQUITIES),
                params: investing_params(32),
                page_param: s("page"),
                page_size_param: s("page-size"),
            },
            pagination: Pagination::Sequential { window_size: 1393, total: 1393, first_page: 0 },
            fields: FieldMap {
                symbol: s("Symbol"),
                name: vec![s("Name")],
                last: s("Last"),
                change: ChangeRule::Percent { field: s("ChgPct") },
                precision: 2,
                flag: s("BR"),
                logo: LogoRule::None,
                id: Some(IdRule::Field { field: s("Id") }),
                opening_price: None,
                require_price: false,
                extras: Extras { country: Some(s("CountryNameTranslated")), ..Extras::default() },
            },
            table: s("investing_data"),
            key: KeyField::Id,
            write_mode: WriteMode::Upsert,
            batch_size: 1000,
            window: session,
            interval_minutes: 15,
            snapshot_path: None,
            window_delay_ms: None,
            batch_delay_ms: Some(100),
        },
        SourceSpec {
            name: s("investing-us"),
            enabled: true,
            protocol: Protocol::Listing {
                url: s(INVESTING_EQUITIES),
                params: investing_params(5),
                page_param: s("page"),
                page_size_param: s("page-size"),
            },
            // 25 pages of 500 is the runaway ceiling.
            pagination: Pagination::Sequential { window_size: 500, total: 12_500, first_page: 0 },
            fields: FieldMap {
                symbol: s("Symbol"),
                name: vec![s("Name")],
                last: s("Last"),
                change: ChangeRule::Percent { field: s("ChgPct") },
                precision: 2,
                flag: s("US"),
                logo: LogoRule::None,
                id: None,
                opening_price: None,
                require_price: false,
                extras: Extras { country: Some(s("CountryNameTranslated")), ..Extras::default() },
            },
            table: s("finhub_data"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Upsert,
            batch_size: 500,
            window: session,
            interval_minutes: 30,
            snapshot_path: None,
            window_delay_ms: Some(1000),
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("usd-brl"),
            enabled: true,
            protocol: Protocol::Quote { url: s(AWESOME_USD_BRL), root: s("USDBRL") },
            pagination: Pagination::Sequential { window_size: 1, total: 1, first_page: 0 },
            fields: FieldMap {
                symbol: s("code"),
                name: vec![s("name")],
                last: s("bid"),
                change: ChangeRule::PercentOrFromBase { field: s("pctChange"), base: s("low") },
                precision: 4,
                flag: s("BR"),
                logo: LogoRule::Fixed { url: s(USD_LOGO_URL) },
                id: Some(IdRule::Fixed { value: 32 }),
                opening_price: Some(OpeningRule::Field { field: s("low") }),
                require_price: true,
                extras: Extras::default(),
            },
            table: s("cotacoes_cache"),
            key: KeyField::Id,
            write_mode: WriteMode::Upsert,
            batch_size: 1,
            window: TimeWindow::from_hours(9.0, 18.0),
            interval_minutes: 15,
            snapshot_path: None,
            window_delay_ms: None,
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("infomoney-stocks"),
            enabled: true,
            protocol: Protocol::Ranking { url: format!("{}/acao", INFOMONEY_RANKING), params: ranking_params() },
            pagination: Pagination::FanOut { page_size: 15, first_page: 1, max_pages: 19 },
            fields: ranking_fields(),
            table: s("stock_data"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Upsert,
            batch_size: 100,
            window: session,
            interval_minutes: 10,
            snapshot_path: Some(PathBuf::from("data/companies_data.json")),
            window_delay_ms: None,
            batch_delay_ms: None,
        },
        SourceSpec {
            name: s("infomoney-fiis"),
            enabled: true,
            protocol: Protocol::Ranking { url: format!("{}/fii", INFOMONEY_RANKING), params: ranking_params() },
            pagination: Pagination::FanOut { page_size: 15, first_page: 1, max_pages: 19 },
            fields: ranking_fields(),
            table: s("fii_data"),
            key: KeyField::Symbol,
            write_mode: WriteMode::Replace,
            batch_size: 100,
            window: session,
            interval_minutes: 10,
            snapshot_path: Some(PathBuf::from("data/fiis_data.json")),
            window_delay_ms: None,
            batch_delay_ms: Some(50),
        },
    ]
}

/// Catalog entry by name.
#[cfg(test)]
pub fn find(name: &str) -> Option<SourceSpec> {
    builtin().into_iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_are_unique() {
        let specs = builtin();
        let mut names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), specs.len());
    }

    #[test]
    fn test_screener_fields_exist_in_column_list() {
        for spec in builtin() {
            let Protocol::Screener { columns, .. } = &spec.protocol else { continue };
            let f = &spec.fields;
            assert!(columns.contains(&f.symbol), "{}: {}", spec.name, f.symbol);
            assert!(columns.contains(&f.last), "{}: {}", spec.name, f.last);
            for extra in [&f.extras.market_cap, &f.extras.aum, &f.extras.asset_type, &f.extras.typespecs]
                .into_iter()
                .flatten()
            {
                assert!(columns.contains(extra), "{}: {}", spec.name, extra);
            }
        }
    }

    #[test]
    fn test_id_keyed_sources_define_an_id() {
        for spec in builtin() {
            if spec.key == KeyField::Id {
                assert!(spec.fields.id.is_some(), "{} is id-keyed without an id rule", spec.name);
            }
        }
    }

    #[test]
    fn test_per_source_cadence() {
        let default = Duration::from_millis(3000);
        let investing_us = find("investing-us").unwrap();
        assert_eq!(investing_us.interval_minutes, 30);
        assert_eq!(investing_us.window_delay(default), Duration::from_millis(1000));
        assert_eq!(find("tv-br-highlights").unwrap().window_delay(default), Duration::from_millis(2000));
        assert_eq!(find("tv-br-stocks").unwrap().window_delay(default), default);

        let default = Duration::from_millis(200);
        assert_eq!(find("investing-br").unwrap().batch_delay(default), Duration::from_millis(100));
        assert_eq!(find("infomoney-fiis").unwrap().batch_delay(default), Duration::from_millis(50));
        assert_eq!(find("tv-us-etfs").unwrap().batch_delay(default), default);
    }

    #[test]
    fn test_delay_override() {
        let mut spec = find("tv-br-stocks").unwrap();
        let ov = SourceOverride { window_delay_ms: Some(500), batch_delay_ms: Some(0), ..Default::default() };
        spec.apply(&ov).unwrap();
        assert_eq!(spec.window_delay(Duration::from_secs(3)), Duration::from_millis(500));
        assert_eq!(spec.batch_delay(Duration::from_millis(200)), Duration::ZERO);
    }

    #[test]
    fn test_only_highlights_and_etfs_carry_type() {
        for spec in builtin() {
            let typed = spec.fields.extras.asset_type.is_some();
            assert_eq!(typed, spec.fields.extras.typespecs.is_some(), "{}", spec.name);
            assert_eq!(
                typed,
                matches!(spec.name.as_str(), "tv-br-highlights" | "tv-br-etfs"),
                "{}",
                spec.name
            );
        }
    }

    #[test]
    fn test_fii_source_replaces() {
        let fii = find("infomoney-fiis").unwrap();
        assert_eq!(fii.write_mode, WriteMode::Replace);
        assert!(matches!(fii.pagination, Pagination::FanOut { max_pages: 19, .. }));
    }
}
