//! Price-history storage.
//!
//! The [`PriceStore`] trait covers the observation ledger, the aggregate
//! queries used by the deal detector, and the notified-deal table used to
//! make notification at-most-once.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`record`](PriceStore::record) | Insert an observation; duplicates are ignored |
//! | [`count`](PriceStore::count) | Number of observations for a route (optionally month/year scoped) |
//! | [`median`](PriceStore::median) | Median observed price |
//! | [`average`](PriceStore::average) | Mean observed price |
//! | [`is_notified`](PriceStore::is_notified) | Whether a fingerprint was already sent |
//! | [`mark_notified`](PriceStore::mark_notified) | Record a sent deal |
//!
//! Scoped queries never widen on their own: a caller wanting the whole-route
//! figure asks again with `month`/`year` set to `None`.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Observation, RoutePeriod};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Optional month/year filter for aggregate queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scope {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn month(month: u32, year: i32) -> Self {
        Self {
            month: Some(month),
            year: Some(year),
        }
    }
}

impl From<&RoutePeriod> for Scope {
    fn from(period: &RoutePeriod) -> Self {
        Self::month(period.month, period.year)
    }
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Insert an observation. Returns `true` if a new row was written.
    async fn record(&self, observation: &Observation) -> Result<bool>;

    async fn count(&self, origin: &str, destination: &str, scope: Scope) -> Result<i64>;

    async fn median(&self, origin: &str, destination: &str, scope: Scope) -> Result<Option<f64>>;

    async fn average(&self, origin: &str, destination: &str, scope: Scope)
        -> Result<Option<f64>>;

    async fn is_notified(&self, fingerprint: &str) -> Result<bool>;

    /// Write or replace the notified record keyed by the observation's fingerprint.
    async fn mark_notified(
        &self,
        observation: &Observation,
        usual_price: f64,
        discount_pct: f64,
    ) -> Result<()>;
}

/// Median of prices already sorted ascending.
pub fn median_of_sorted(prices: &[f64]) -> Option<f64> {
    let n = prices.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 0 {
        Some((prices[n / 2 - 1] + prices[n / 2]) / 2.0)
    } else {
        Some(prices[n / 2])
    }
}
