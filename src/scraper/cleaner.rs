use crate::config::catalog::{ChangeRule, FieldMap, IdRule, LogoRule, OpeningRule};
use crate::models::{CanonicalRecord, KeyField, RawRow};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Number from a JSON number or a formatted string.
/// `38.5` → 38.5 | `"5.4312"` → 5.4312 | `"-1,23"` → -1.23 | `"1.234,56"` → 1234.56 | `"0.42%"` → 0.42
pub fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
        Value::String(s) => parse_decimal_str(s),
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<f64> {
    let s = s.trim().trim_end_matches('%').trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    let normalised = if s.contains(',') {
        // Comma is the decimal separator; dots group thousands.
        s.replace('.', "").replace(',', ".")
    } else {
        s.to_string()
    };
    let cleaned: String = normalised
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    cleaned.parse::<f64>().ok().filter(|x| x.is_finite())
}

/// Non-empty trimmed text; numbers are rendered.
pub fn parse_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_string_list(v: &Value) -> Option<Vec<String>> {
    let items = v.as_array()?;
    Some(items.iter().filter_map(parse_text).collect())
}

pub fn round_to(x: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (x * factor).round() / factor
}

/// `change / (close - change) * 100`; a previous close of zero has no
/// defined percentage.
pub fn derive_change_pct(close: f64, change: f64) -> Option<f64> {
    let previous = close - change;
    if previous == 0.0 {
        return None;
    }
    Some(change / previous * 100.0).filter(|x| x.is_finite())
}

/// `(last - base) / base * 100`; undefined for a non-positive base.
pub fn change_from_base(last: f64, base: f64) -> Option<f64> {
    if base <= 0.0 {
        return None;
    }
    Some((last - base) / base * 100.0).filter(|x| x.is_finite())
}

/// `last / (1 + pct / 100)`, 4 decimals. No change means it opened at `last`.
pub fn opening_from_change(last: f64, pct: Option<f64>) -> Option<f64> {
    match pct {
        None => Some(last),
        Some(p) if p == 0.0 => Some(last),
        Some(p) => {
            let divisor = 1.0 + p / 100.0;
            if divisor == 0.0 {
                return None;
            }
            Some(round_to(last / divisor, 4)).filter(|x| x.is_finite())
        }
    }
}

pub fn logo_url(template: &str, logoid: &str) -> String {
    template.replace("{logoid}", logoid)
}

// ── Row → CanonicalRecord ────────────────────────────────────────────────────

fn field<'a>(row: &'a RawRow, name: &str) -> &'a Value {
    row.get(name).unwrap_or(&Value::Null)
}

fn percent_field(row: &RawRow, name: &str, symbol: &str) -> Option<f64> {
    let value = field(row, name);
    let pct = parse_number(value);
    if pct.is_none() && !value.is_null() {
        warn!("{}: unparseable change {}", symbol, value);
    }
    pct
}

fn text_of(row: &RawRow, name: &Option<String>) -> Option<String> {
    name.as_deref().and_then(|n| parse_text(field(row, n)))
}

fn number_of(row: &RawRow, name: &Option<String>) -> Option<f64> {
    name.as_deref().and_then(|n| parse_number(field(row, n)))
}

/// Map one raw row; `None` when the row has no usable symbol (or no price
/// when the source requires one).
pub fn map_row(fields: &FieldMap, row: &RawRow, now: NaiveDateTime) -> Option<CanonicalRecord> {
    let symbol = parse_text(field(row, &fields.symbol))?;
    let last = parse_number(field(row, &fields.last));
    if fields.require_price && last.is_none() {
        return None;
    }

    let raw_pct = match &fields.change {
        ChangeRule::Percent { field: f } => percent_field(row, f, &symbol),
        ChangeRule::Derived { close, change } => {
            match (parse_number(field(row, close)), parse_number(field(row, change))) {
                (Some(c), Some(ch)) => derive_change_pct(c, ch),
                _ => None,
            }
        }
        ChangeRule::PercentOrFromBase { field: f, base } => {
            let pct = percent_field(row, f, &symbol);
            let fallback = match (last, parse_number(field(row, base))) {
                (Some(l), Some(b)) if pct.unwrap_or(0.0) == 0.0 => change_from_base(l, b),
                _ => None,
            };
            fallback.or(pct)
        }
    };

    let mut record = CanonicalRecord::new(symbol, fields.flag.clone());
    record.name = fields.name.iter().find_map(|n| parse_text(field(row, n)));
    record.last = last;
    record.chg_pct = raw_pct.map(|p| round_to(p, fields.precision));
    record.logo_url = match &fields.logo {
        LogoRule::None => None,
        LogoRule::Template { field: f, template } => {
            parse_text(field(row, f)).map(|id| logo_url(template, &id))
        }
        LogoRule::Fixed { url } => Some(url.clone()),
    };
    record.id = match &fields.id {
        None => None,
        Some(IdRule::Field { field: f }) => parse_id(field(row, f)),
        Some(IdRule::Fixed { value }) => Some(*value),
    };
    record.opening_price = match &fields.opening_price {
        None => None,
        Some(OpeningRule::Field { field: f }) => parse_number(field(row, f)),
        Some(OpeningRule::FromChange) => last.and_then(|l| {
            let has_change = match &fields.change {
                ChangeRule::Percent { field: f } | ChangeRule::PercentOrFromBase { field: f, .. } => {
                    !field(row, f).is_null()
                }
                ChangeRule::Derived { .. } => true,
            };
            if has_change && raw_pct.is_none() {
                None
            } else {
                opening_from_change(l, raw_pct)
            }
        }),
    };

    let extras = &fields.extras;
    record.market_cap = number_of(row, &extras.market_cap);
    record.aum = number_of(row, &extras.aum);
    record.asset_type = text_of(row, &extras.asset_type);
    record.typespecs = extras
        .typespecs
        .as_deref()
        .and_then(|n| parse_string_list(field(row, n)));
    record.country = text_of(row, &extras.country);
    record.quoted_at = text_of(row, &extras.quoted_at);
    record.scraped_at = Some(now);

    Some(record)
}

/// Map every row, dropping unusable ones and repeated keys (first wins).
/// Returns the records and how many rows were discarded.
pub fn map_rows(
    fields: &FieldMap,
    key: KeyField,
    rows: &[RawRow],
    now: NaiveDateTime,
) -> (Vec<CanonicalRecord>, usize) {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());
    let mut discarded = 0usize;

    for row in rows {
        let Some(record) = map_row(fields, row, now) else {
            discarded += 1;
            continue;
        };
        let Some(k) = key.value_of(&record) else {
            discarded += 1;
            continue;
        };
        if !seen.insert(k) {
            debug!("Duplicate key for {}, keeping first", record.symbol);
            discarded += 1;
            continue;
        }
        records.push(record);
    }

    (records, discarded)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
