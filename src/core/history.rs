//! Transaction history: listing, filtering, and dashboard aggregation.
//!
//! Pure functions over transaction lists fetched from the wallet backend.
//! Period metrics compare the selected window against the window of the
//! same length immediately before it.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: i64 = 86_400;
/// Transactions shown per page.
pub const PAGE_SIZE: usize = 10;

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// A wallet transaction as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub payment_hash: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub amount_sats: u64,
    pub description: String,
    /// Creation time, unix seconds.
    pub created_at: i64,
    /// Settlement time, unix seconds. Absent for unsettled invoices.
    pub settled_at: Option<i64>,
}

impl Transaction {
    /// Settlement time when settled, creation time otherwise.
    pub fn effective_timestamp(&self) -> i64 {
        self.settled_at.unwrap_or(self.created_at)
    }

    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }
}

// ============================================================================
// Periods
// ============================================================================

/// Reporting window for dashboard metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Week,
    ThirtyDays,
    SixtyDays,
}

impl Period {
    pub fn days(&self) -> i64 {
        match self {
            Period::Today => 1,
            Period::Week => 7,
            Period::ThirtyDays => 30,
            Period::SixtyDays => 60,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Week => "last 7 days",
            Period::ThirtyDays => "last 30 days",
            Period::SixtyDays => "last 60 days",
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Period::Today),
            "week" => Ok(Period::Week),
            "30days" => Ok(Period::ThirtyDays),
            "60days" => Ok(Period::SixtyDays),
            other => Err(format!(
                "unknown period '{}', expected today|week|30days|60days",
                other
            )),
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// One chart bucket: a day, or an hour for the `Today` period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub label: String,
    pub count: u64,
    pub revenue_sats: u64,
}

/// Aggregated dashboard metrics for one period.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodMetrics {
    /// Sum of incoming amounts in the window, sats.
    pub total_revenue_sats: u64,
    /// All transactions in the window, both directions.
    pub total_transactions: u64,
    pub average_transaction_sats: f64,
    /// Share of all known transactions that are settled, percent.
    pub success_rate: f64,
    pub revenue_change_percent: f64,
    pub transactions_change_percent: f64,
    pub buckets: Vec<Bucket>,
}

fn change_percent(current: u64, previous: u64) -> f64 {
    if previous > 0 {
        (current as f64 - previous as f64) / previous as f64 * 100.0
    } else if current > 0 {
        100.0
    } else {
        0.0
    }
}

fn day_label(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%b %-d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn hour_label(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| format!("{:02}:00", dt.hour()))
        .unwrap_or_else(|| ts.to_string())
}

/// Computes dashboard metrics over `transactions` for the window ending
/// at `now` (unix seconds).
pub fn compute_metrics(transactions: &[Transaction], period: Period, now: i64) -> PeriodMetrics {
    let window_start = now - period.days() * SECONDS_PER_DAY;
    let previous_start = now - 2 * period.days() * SECONDS_PER_DAY;

    let in_window = |tx: &&Transaction| {
        let ts = tx.effective_timestamp();
        ts >= window_start && ts <= now
    };
    let in_previous = |tx: &&Transaction| {
        let ts = tx.effective_timestamp();
        ts >= previous_start && ts < window_start
    };

    let current: Vec<&Transaction> = transactions.iter().filter(in_window).collect();
    let previous: Vec<&Transaction> = transactions.iter().filter(in_previous).collect();

    let revenue = |txs: &[&Transaction]| -> u64 {
        txs.iter()
            .filter(|tx| tx.direction == Direction::Incoming)
            .map(|tx| tx.amount_sats)
            .sum()
    };

    let total_revenue_sats = revenue(&current);
    let total_transactions = current.len() as u64;
    let average_transaction_sats = if total_transactions > 0 {
        total_revenue_sats as f64 / total_transactions as f64
    } else {
        0.0
    };

    // Success rate is measured over the whole history, not the window.
    let success_rate = if transactions.is_empty() {
        0.0
    } else {
        let settled = transactions.iter().filter(|tx| tx.is_settled()).count();
        settled as f64 / transactions.len() as f64 * 100.0
    };

    PeriodMetrics {
        total_revenue_sats,
        total_transactions,
        average_transaction_sats,
        success_rate,
        revenue_change_percent: change_percent(total_revenue_sats, revenue(&previous)),
        transactions_change_percent: change_percent(total_transactions, previous.len() as u64),
        buckets: bucketize(&current, period, window_start),
    }
}

/// Splits window transactions into chart buckets: hourly for `Today`,
/// daily otherwise. Empty buckets are kept so charts keep their shape.
fn bucketize(current: &[&Transaction], period: Period, window_start: i64) -> Vec<Bucket> {
    let (count, step, label): (i64, i64, fn(i64) -> String) = match period {
        Period::Today => (24, 3600, hour_label),
        _ => (period.days(), SECONDS_PER_DAY, day_label),
    };

    let mut buckets: Vec<Bucket> = (0..count)
        .map(|i| Bucket {
            label: label(window_start + i * step),
            count: 0,
            revenue_sats: 0,
        })
        .collect();

    for tx in current {
        let offset = tx.effective_timestamp() - window_start;
        let idx = (offset / step).clamp(0, count - 1) as usize;
        buckets[idx].count += 1;
        if tx.direction == Direction::Incoming {
            buckets[idx].revenue_sats += tx.amount_sats;
        }
    }

    buckets
}

// ============================================================================
// Filtering / Pagination
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub direction: Option<Direction>,
    /// Case-insensitive substring match on the description.
    pub search: Option<String>,
    pub order: SortOrder,
}

/// Applies direction filter, description search, and ordering.
pub fn filter_transactions(transactions: &[Transaction], filter: &HistoryFilter) -> Vec<Transaction> {
    let needle = filter.search.as_ref().map(|s| s.to_lowercase());
    let mut result: Vec<Transaction> = transactions
        .iter()
        .filter(|tx| filter.direction.map_or(true, |d| tx.direction == d))
        .filter(|tx| {
            needle
                .as_ref()
                .map_or(true, |n| tx.description.to_lowercase().contains(n))
        })
        .cloned()
        .collect();

    match filter.order {
        SortOrder::NewestFirst => {
            result.sort_by_key(|tx| std::cmp::Reverse(tx.effective_timestamp()))
        }
        SortOrder::OldestFirst => result.sort_by_key(|tx| tx.effective_timestamp()),
    }

    result
}

/// Returns the 1-based `page` of `transactions`.
pub fn paginate(transactions: &[Transaction], page: usize) -> &[Transaction] {
    let start = page.saturating_sub(1) * PAGE_SIZE;
    let end = (start + PAGE_SIZE).min(transactions.len());
    if start >= transactions.len() {
        &[]
    } else {
        &transactions[start..end]
    }
}

pub fn total_pages(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}
