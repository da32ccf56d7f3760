use std::collections::HashMap;

use serde::Serialize;

pub const COST_COLUMN: &str = "Cost";
pub const CONVERSIONS_COLUMN: &str = "Conversions";
pub const CONV_RATE_COLUMN: &str = "Conv. rate";
pub const ACTIVE_USERS_COLUMN: &str = "Active users";

/// Tabular report data: rows of column-name → raw cell text.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<HashMap<String, String>>,
}

impl Table {
    pub fn new(rows: Vec<HashMap<String, String>>) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    /// Table with an explicit header row, so a column can exist even when no
    /// data rows survived parsing.
    pub fn with_columns(columns: Vec<String>, rows: Vec<HashMap<String, String>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name) || self.rows.iter().any(|row| row.contains_key(name))
    }

    /// Numeric view of a column. Non-numeric cells are missing, not zero.
    fn numeric<'a>(&'a self, name: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.rows
            .iter()
            .filter_map(move |row| row.get(name))
            .filter_map(|cell| parse_numeric(cell))
    }

    /// Numeric view of a percent-formatted column (trailing `%` stripped).
    fn percent<'a>(&'a self, name: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.rows
            .iter()
            .filter_map(move |row| row.get(name))
            .filter_map(|cell| parse_numeric(cell.trim().trim_end_matches('%')))
    }
}

fn parse_numeric(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (count, sum) = values.fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Raw per-request marketing data, consumed once by `compute`.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub current_ads: Table,
    pub current_ga: Table,
    pub previous_ads: Option<Table>,
    pub previous_ga: Option<Table>,
    pub industry: String,
    pub benchmark_cpl: f64,
}

/// Normalized performance metrics with period-over-period deltas.
///
/// Every field is always present; `None` means the value is undefined for
/// this request (no previous period, zero denominator, fallback mode).
/// Serialization keeps every key so downstream consumers read null, never
/// check for existence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub total_cost: Option<f64>,
    pub total_conversions: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub cpl: Option<f64>,
    pub ga_users: Option<f64>,
    pub benchmark_cpl: Option<f64>,
    pub prev_cpl: Option<f64>,
    pub prev_conversion_rate: Option<f64>,
    pub prev_ga_users: Option<f64>,
    pub prev_total_conversions: Option<f64>,
    pub cpl_change: Option<f64>,
    pub conversion_rate_change: Option<f64>,
    pub user_change: Option<f64>,
    pub lead_change: Option<f64>,
}

impl Metrics {
    /// Fallback-mode record: the full shape with every value absent.
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Signed percent change from `previous` to `current`.
///
/// Absent when either side is absent or `previous` is exactly zero — never a
/// division by zero, never infinity.
pub fn percent_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(cur), Some(prev)) if prev != 0.0 => Some((cur - prev) / prev * 100.0),
        _ => None,
    }
}

struct AdsAggregates {
    total_cost: f64,
    total_conversions: f64,
    conversion_rate: Option<f64>,
    cpl: Option<f64>,
}

fn aggregate_ads(ads: &Table) -> AdsAggregates {
    let total_cost: f64 = ads.numeric(COST_COLUMN).sum();
    let total_conversions: f64 = ads.numeric(CONVERSIONS_COLUMN).sum();
    // Plain mean over rows, not cost-weighted. Matches the reports the
    // benchmark figures were calibrated against.
    let conversion_rate = mean(ads.percent(CONV_RATE_COLUMN));
    let cpl = if total_conversions > 0.0 {
        Some(total_cost / total_conversions)
    } else {
        None
    };
    AdsAggregates {
        total_cost,
        total_conversions,
        conversion_rate,
        cpl,
    }
}

fn ga_users(ga: &Table) -> Option<f64> {
    if ga.has_column(ACTIVE_USERS_COLUMN) {
        Some(ga.numeric(ACTIVE_USERS_COLUMN).sum())
    } else {
        None
    }
}

/// Compute aggregate metrics and period-over-period deltas from raw data.
pub fn compute(raw: &RawDataset) -> Metrics {
    let current = aggregate_ads(&raw.current_ads);
    let users = ga_users(&raw.current_ga);

    let previous = raw.previous_ads.as_ref().map(aggregate_ads);
    let prev_cpl = previous.as_ref().and_then(|p| p.cpl);
    let prev_conversion_rate = previous.as_ref().and_then(|p| p.conversion_rate);
    let prev_total_conversions = previous.as_ref().map(|p| p.total_conversions);
    let prev_ga_users = raw.previous_ga.as_ref().and_then(ga_users);

    Metrics {
        total_cost: Some(current.total_cost),
        total_conversions: Some(current.total_conversions),
        conversion_rate: current.conversion_rate,
        cpl: current.cpl,
        ga_users: users,
        benchmark_cpl: Some(raw.benchmark_cpl),
        prev_cpl,
        prev_conversion_rate,
        prev_ga_users,
        prev_total_conversions,
        cpl_change: percent_change(current.cpl, prev_cpl),
        conversion_rate_change: percent_change(current.conversion_rate, prev_conversion_rate),
        user_change: percent_change(users, prev_ga_users),
        lead_change: percent_change(Some(current.total_conversions), prev_total_conversions),
    }
}

// Display helpers shared by the strategy prompt and the polish stage.
// Absent values always render as "N/A".

pub fn fmt_money(value: Option<f64>) -> String {
    value
        .map(|v| format!("${:.2}", v))
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn fmt_count(value: Option<f64>) -> String {
    value
        .map(|v| format!("{}", v as i64))
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn fmt_rate(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}%", v))
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn fmt_delta(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:+.1}%", v))
        .unwrap_or_else(|| "N/A".to_string())
}
