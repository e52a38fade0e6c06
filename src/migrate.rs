use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the ledger tables and indexes. Safe to run repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Observation ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            origin TEXT NOT NULL,
            destination TEXT NOT NULL,
            departure_date TEXT NOT NULL,
            departure_month INTEGER NOT NULL,
            departure_year INTEGER NOT NULL,
            price REAL NOT NULL,
            airline TEXT NOT NULL,
            currency TEXT NOT NULL DEFAULT 'EUR',
            created_at INTEGER NOT NULL,
            UNIQUE(origin, destination, departure_date, price, airline)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Deals that have already been sent
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notified_deals (
            flight_hash TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            destination TEXT NOT NULL,
            departure_date TEXT NOT NULL,
            price REAL NOT NULL,
            usual_price REAL NOT NULL,
            discount_percentage REAL NOT NULL,
            notified_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_price_history_route_period \
         ON price_history(origin, destination, departure_month, departure_year)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
