//! Route price statistics.
//!
//! Read-only view of the ledger for one route: how many prices were
//! observed, their median and mean, and when the route was last seen. Used
//! by `fares stats` to sanity-check what the detector will compare against.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::store::{PriceStore, Scope, SqliteStore};

/// Run the stats command: query the ledger and print a summary.
pub async fn run_stats(
    config: &Config,
    origin: &str,
    destination: &str,
    month: Option<u32>,
    year: Option<i32>,
) -> Result<()> {
    if let Some(m) = month {
        if !(1..=12).contains(&m) {
            bail!("--month must be between 1 and 12");
        }
    }

    if !config.db.path.exists() {
        bail!(
            "No database at {}. Run `fares init` first.",
            config.db.path.display()
        );
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let scope = Scope { month, year };

    let count = store.count(origin, destination, scope).await?;
    let median = store.median(origin, destination, scope).await?;
    let average = store.average(origin, destination, scope).await?;

    let last_seen: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(created_at) FROM price_history WHERE origin = ? AND destination = ?",
    )
    .bind(origin)
    .bind(destination)
    .fetch_one(store.pool())
    .await?;

    let notified: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notified_deals WHERE origin = ? AND destination = ?",
    )
    .bind(origin)
    .bind(destination)
    .fetch_one(store.pool())
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Fare Scanner — Route Stats");
    println!("==========================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Route:        {} -> {}", origin, destination);
    println!("  Period:       {}", format_scope(scope));
    println!("  Observations: {}", count);
    println!("  Median:       {}", format_price(median));
    println!("  Average:      {}", format_price(average));
    println!(
        "  Last seen:    {}",
        last_seen
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Deals sent:   {}", notified);
    println!();

    store.pool().close().await;
    Ok(())
}

fn format_scope(scope: Scope) -> String {
    match (scope.month, scope.year) {
        (Some(m), Some(y)) => format!("{:02}/{}", m, y),
        (Some(m), None) => format!("month {} (all years)", m),
        (None, Some(y)) => format!("{}", y),
        (None, None) => "all time".to_string(),
    }
}

fn format_price(price: Option<f64>) -> String {
    match price {
        Some(p) => format!("{:.2}", p),
        None => "-".to_string(),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_scope() {
        assert_eq!(format_scope(Scope::month(6, 2024)), "06/2024");
        assert_eq!(format_scope(Scope::all()), "all time");
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(Some(299.5)), "299.50");
        assert_eq!(format_price(None), "-");
    }

    #[test]
    fn test_format_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
