//! Token accounting and cost estimation.
//!
//! Every successful provider call records its provider-reported token total
//! into a per-day, per-content-type bucket. Costs are estimates derived from
//! a static price table; the provider's invoice is the source of truth.

use crate::db::Database;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

/// USD per one million tokens, matched by model-name prefix. Longest prefix
/// wins, so "gpt-4o-mini" is checked before "gpt-4o".
const MODEL_PRICES: &[(&str, f64)] = &[
    ("gpt-4o-mini", 0.60),
    ("gpt-4o", 10.00),
    ("gpt-4.1-mini", 1.60),
    ("gpt-4.1-nano", 0.40),
    ("gpt-4.1", 8.00),
];

/// Conservative price for models the table does not know.
const DEFAULT_PRICE_PER_MILLION: f64 = 10.00;

/// Estimated spend in USD for `tokens` tokens on `model`.
pub fn estimate_cost(tokens: i64, model: &str) -> f64 {
    let price = MODEL_PRICES
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE_PER_MILLION);
    (tokens as f64 / 1_000_000.0) * price
}

/// Month-to-date usage rollup.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub month: String,
    pub total_tokens: i64,
    pub total_requests: i64,
    pub estimated_cost_usd: f64,
    pub by_content_type: BTreeMap<String, i64>,
}

/// Persistent token ledger over the shared database.
#[derive(Clone)]
pub struct UsageLedger {
    db: Database,
}

impl UsageLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record one successful provider call against today's bucket. Buckets
    /// are content-type names plus "schema" for repair calls.
    pub fn record(&self, bucket: &str, tokens: i64) -> Result<()> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        self.db.record_usage(&day, bucket, tokens)
    }

    /// Aggregate everything recorded in the current calendar month.
    pub fn month_to_date(&self, model: &str) -> Result<UsageReport> {
        let month = Utc::now().format("%Y-%m").to_string();
        let rows = self.db.usage_rows(&month)?;

        let mut total_tokens = 0;
        let mut total_requests = 0;
        let mut by_content_type: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows {
            total_tokens += row.token_count;
            total_requests += row.request_count;
            *by_content_type.entry(row.content_type).or_insert(0) += row.token_count;
        }

        Ok(UsageReport {
            month,
            total_tokens,
            total_requests,
            estimated_cost_usd: estimate_cost(total_tokens, model),
            by_content_type,
        })
    }
}
