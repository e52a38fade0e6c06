//! In-memory [`PriceStore`] for tests and dry runs.
//!
//! Rows live in a `HashMap` keyed by the ledger's uniqueness key, behind
//! `std::sync::RwLock`. Aggregates are brute-force scans.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};

use super::{median_of_sorted, PriceStore, Scope};
use crate::models::Observation;

/// `(origin, destination, departure_date, price bits, airline)`
type LedgerKey = (String, String, NaiveDate, u64, String);

struct StoredPrice {
    origin: String,
    destination: String,
    month: u32,
    year: i32,
    price: f64,
}

/// A row of `notified_deals`.
#[derive(Debug, Clone)]
pub struct NotifiedRecord {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub price: f64,
    pub usual_price: f64,
    pub discount_pct: f64,
    pub notified_at: i64,
}

pub struct InMemoryStore {
    prices: RwLock<HashMap<LedgerKey, StoredPrice>>,
    notified: RwLock<HashMap<String, NotifiedRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            notified: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the notified table, keyed by fingerprint.
    pub fn notified(&self) -> Result<HashMap<String, NotifiedRecord>> {
        let guard = self.notified.read().map_err(|_| poisoned())?;
        Ok(guard.clone())
    }

    fn scoped_prices(&self, origin: &str, destination: &str, scope: Scope) -> Result<Vec<f64>> {
        let guard = self.prices.read().map_err(|_| poisoned())?;
        Ok(guard
            .values()
            .filter(|p| p.origin == origin && p.destination == destination)
            .filter(|p| scope.month.map_or(true, |m| p.month == m))
            .filter(|p| scope.year.map_or(true, |y| p.year == y))
            .map(|p| p.price)
            .collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl PriceStore for InMemoryStore {
    async fn record(&self, o: &Observation) -> Result<bool> {
        let key = (
            o.origin.clone(),
            o.destination.clone(),
            o.departure_date,
            o.price.to_bits(),
            o.airline.clone(),
        );
        let mut guard = self.prices.write().map_err(|_| poisoned())?;
        if guard.contains_key(&key) {
            return Ok(false);
        }
        guard.insert(
            key,
            StoredPrice {
                origin: o.origin.clone(),
                destination: o.destination.clone(),
                month: o.departure_date.month(),
                year: o.departure_date.year(),
                price: o.price,
            },
        );
        Ok(true)
    }

    async fn count(&self, origin: &str, destination: &str, scope: Scope) -> Result<i64> {
        Ok(self.scoped_prices(origin, destination, scope)?.len() as i64)
    }

    async fn median(&self, origin: &str, destination: &str, scope: Scope) -> Result<Option<f64>> {
        let mut prices = self.scoped_prices(origin, destination, scope)?;
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(median_of_sorted(&prices))
    }

    async fn average(
        &self,
        origin: &str,
        destination: &str,
        scope: Scope,
    ) -> Result<Option<f64>> {
        let prices = self.scoped_prices(origin, destination, scope)?;
        if prices.is_empty() {
            return Ok(None);
        }
        Ok(Some(prices.iter().sum::<f64>() / prices.len() as f64))
    }

    async fn is_notified(&self, fingerprint: &str) -> Result<bool> {
        let guard = self.notified.read().map_err(|_| poisoned())?;
        Ok(guard.contains_key(fingerprint))
    }

    async fn mark_notified(
        &self,
        o: &Observation,
        usual_price: f64,
        discount_pct: f64,
    ) -> Result<()> {
        let mut guard = self.notified.write().map_err(|_| poisoned())?;
        guard.insert(
            o.fingerprint(),
            NotifiedRecord {
                origin: o.origin.clone(),
                destination: o.destination.clone(),
                departure_date: o.departure_date,
                price: o.price,
                usual_price,
                discount_pct,
                notified_at: Utc::now().timestamp(),
            },
        );
        Ok(())
    }
}
