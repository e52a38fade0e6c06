//! End-to-end scan cycles against a real SQLite ledger, with a scripted
//! provider and a recording notifier.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use fare_scanner::config::{Config, DbConfig, DealsConfig, NotifierConfig, ProviderConfig, ScanConfig};
use fare_scanner::models::{Deal, Observation};
use fare_scanner::notifier::Notifier;
use fare_scanner::provider::{FlightProvider, SearchQuery};
use fare_scanner::scanner::Scanner;
use fare_scanner::store::{PriceStore, Scope, SqliteStore};
use fare_scanner::{db, migrate};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

fn config(tmp: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: tmp.path().join("data/fares.sqlite"),
        },
        scan: ScanConfig {
            origins: vec!["CDG".into()],
            destinations: vec!["NYC".into(), "BKK".into()],
            min_days_from_now: 7,
            max_days_from_now: 24,
            min_stay_days: 3,
            max_stay_days: 3,
            stay_days_step: 1,
            date_step_days: 7,
            request_delay_ms: 0,
            max_concurrent_requests: 3,
            scan_interval_secs: 3600,
        },
        deals: DealsConfig {
            min_observations: 5,
            ..DealsConfig::default()
        },
        provider: ProviderConfig::default(),
        notifier: NotifierConfig::default(),
    }
}

fn fare(q: &SearchQuery, price: f64, airline: &str, stopover: bool) -> Observation {
    Observation {
        origin: q.origin.clone(),
        destination: q.destination.clone(),
        departure_date: q.departure_date,
        return_date: q.return_date,
        price,
        airline: airline.to_string(),
        currency: "EUR".to_string(),
        has_stopover: stopover,
        booking_url: None,
        observed_at: Utc::now(),
    }
}

/// On March 15, NYC has a cheap direct fare and BKK a 350 fare with a
/// stopover (above the cap but exempt). Other days are at usual prices.
struct ScriptedProvider;

#[async_trait]
impl FlightProvider for ScriptedProvider {
    async fn search(&self, q: &SearchQuery) -> Vec<Observation> {
        let cheap_day = q.departure_date == NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        match (q.destination.as_str(), cheap_day) {
            ("NYC", true) => vec![fare(q, 120.0, "AF", false), fare(q, 420.0, "DL", false)],
            ("NYC", false) => vec![fare(q, 400.0, "AF", false)],
            ("BKK", true) => vec![fare(q, 350.0, "TK", true)],
            ("BKK", false) => vec![fare(q, 950.0, "TK", true)],
            _ => Vec::new(),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Deal>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, deal: &Deal) -> bool {
        self.sent.lock().unwrap().push(deal.clone());
        true
    }
}

async fn seed(store: &SqliteStore, destination: &str, price: f64) {
    for day in 1..=8 {
        let dep = NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        let o = Observation {
            origin: "CDG".into(),
            destination: destination.into(),
            departure_date: dep,
            return_date: Some(dep + Duration::days(5)),
            price,
            airline: "XX".into(),
            currency: "EUR".into(),
            has_stopover: false,
            booking_url: None,
            observed_at: Utc::now(),
        };
        store.record(&o).await.unwrap();
    }
}

async fn setup(tmp: &TempDir) -> (Config, Arc<SqliteStore>) {
    let cfg = config(tmp);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    (cfg, Arc::new(SqliteStore::new(pool)))
}

#[tokio::test]
async fn test_cycle_records_detects_and_notifies() {
    let tmp = TempDir::new().unwrap();
    let (cfg, store) = setup(&tmp).await;
    seed(&store, "NYC", 400.0).await;
    seed(&store, "BKK", 900.0).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let scanner = Scanner::new(&cfg, Arc::new(ScriptedProvider), store.clone(), notifier.clone());

    let summary = scanner.run_cycle(today()).await;
    // Departures March 8, 15, 22 at a 3-day stay: 4 NYC fares + 3 BKK fares.
    assert_eq!(summary.total_observations, 7);
    assert_eq!(summary.deals_detected, 2);
    assert_eq!(summary.deals_notified, 2);

    let sent = notifier.sent.lock().unwrap().clone();
    let nyc = sent.iter().find(|d| d.observation.destination == "NYC").unwrap();
    assert_eq!(nyc.observation.price, 120.0);
    assert_eq!(nyc.usual_price, 400.0);
    assert!(nyc.discount_pct >= 50.0);

    let bkk = sent.iter().find(|d| d.observation.destination == "BKK").unwrap();
    assert!(bkk.observation.has_stopover);
    assert!(bkk.observation.price > 200.0);

    // Observations persisted once each.
    let march = Scope::month(3, 2025);
    assert_eq!(store.count("CDG", "NYC", march).await.unwrap(), 8 + 4);
    assert!(store.is_notified(&nyc.fingerprint()).await.unwrap());
}

#[tokio::test]
async fn test_second_cycle_is_quiet() {
    let tmp = TempDir::new().unwrap();
    let (cfg, store) = setup(&tmp).await;
    seed(&store, "NYC", 400.0).await;
    seed(&store, "BKK", 900.0).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let scanner = Scanner::new(&cfg, Arc::new(ScriptedProvider), store.clone(), notifier.clone());

    scanner.run_cycle(today()).await;
    let count_after_first = store.count("CDG", "NYC", Scope::all()).await.unwrap();
    let second = scanner.run_cycle(today()).await;

    assert_eq!(second.deals_detected, 2);
    assert_eq!(second.deals_notified, 0);
    assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    assert_eq!(
        store.count("CDG", "NYC", Scope::all()).await.unwrap(),
        count_after_first
    );
}

#[tokio::test]
async fn test_cold_start_detects_nothing() {
    let tmp = TempDir::new().unwrap();
    let (cfg, store) = setup(&tmp).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let scanner = Scanner::new(&cfg, Arc::new(ScriptedProvider), store.clone(), notifier.clone());

    let summary = scanner.run_cycle(today()).await;
    assert_eq!(summary.total_observations, 7);
    assert_eq!(summary.deals_detected, 0);
    assert!(notifier.sent.lock().unwrap().is_empty());
}
