//! SQLite-backed [`PriceStore`].
//!
//! Writes go through `INSERT OR IGNORE` against the
//! `UNIQUE(origin, destination, departure_date, price, airline)` constraint,
//! so concurrent inserts of the same observation leave exactly one row.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Datelike;
use sqlx::SqlitePool;

use super::{median_of_sorted, PriceStore, Scope};
use crate::models::Observation;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Route filter with optional month/year predicates; a `NULL` bind disables one.
const ROUTE_FILTER: &str = "FROM price_history \
     WHERE origin = ? AND destination = ? \
       AND (? IS NULL OR departure_month = ?) \
       AND (? IS NULL OR departure_year = ?)";

fn scope_binds(scope: Scope) -> (Option<i64>, Option<i64>) {
    (scope.month.map(i64::from), scope.year.map(i64::from))
}

#[async_trait]
impl PriceStore for SqliteStore {
    async fn record(&self, o: &Observation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO price_history
                (origin, destination, departure_date, departure_month, departure_year,
                 price, airline, currency, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&o.origin)
        .bind(&o.destination)
        .bind(o.departure_date.to_string())
        .bind(o.departure_date.month() as i64)
        .bind(o.departure_date.year() as i64)
        .bind(o.price)
        .bind(&o.airline)
        .bind(&o.currency)
        .bind(o.observed_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, origin: &str, destination: &str, scope: Scope) -> Result<i64> {
        let (month, year) = scope_binds(scope);
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", ROUTE_FILTER))
            .bind(origin)
            .bind(destination)
            .bind(month)
            .bind(month)
            .bind(year)
            .bind(year)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn median(&self, origin: &str, destination: &str, scope: Scope) -> Result<Option<f64>> {
        let (month, year) = scope_binds(scope);
        let prices: Vec<f64> =
            sqlx::query_scalar(&format!("SELECT price {} ORDER BY price ASC", ROUTE_FILTER))
                .bind(origin)
                .bind(destination)
                .bind(month)
                .bind(month)
                .bind(year)
                .bind(year)
                .fetch_all(&self.pool)
                .await?;
        Ok(median_of_sorted(&prices))
    }

    async fn average(
        &self,
        origin: &str,
        destination: &str,
        scope: Scope,
    ) -> Result<Option<f64>> {
        let (month, year) = scope_binds(scope);
        let avg: Option<f64> = sqlx::query_scalar(&format!("SELECT AVG(price) {}", ROUTE_FILTER))
            .bind(origin)
            .bind(destination)
            .bind(month)
            .bind(month)
            .bind(year)
            .bind(year)
            .fetch_one(&self.pool)
            .await?;
        Ok(avg)
    }

    async fn is_notified(&self, fingerprint: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM notified_deals WHERE flight_hash = ?")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn mark_notified(
        &self,
        o: &Observation,
        usual_price: f64,
        discount_pct: f64,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO notified_deals
                (flight_hash, origin, destination, departure_date, price,
                 usual_price, discount_percentage, notified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(o.fingerprint())
        .bind(&o.origin)
        .bind(&o.destination)
        .bind(o.departure_date.to_string())
        .bind(o.price)
        .bind(usual_price)
        .bind(discount_pct)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
