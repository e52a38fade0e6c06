//! Scan orchestration.
//!
//! One cycle expands `origins × destinations × date pairs` into search
//! tasks, runs them through a semaphore of width `max_concurrent_requests`,
//! persists the round-trip fares each task returns, then runs deal
//! detection and notifies each new deal at most once.
//!
//! A failing or panicking task counts as zero observations; a storage error
//! skips only the affected row or deal. [`Scanner::run`] repeats cycles on
//! a fixed interval until the stop flag is raised.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ScanConfig};
use crate::dates::DateWindow;
use crate::detector::{DealDetector, DetectorConfig};
use crate::models::{CycleSummary, DatePair, Observation};
use crate::notifier::Notifier;
use crate::provider::{FlightProvider, SearchQuery};
use crate::store::PriceStore;

/// One provider search in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTask {
    pub origin: String,
    pub destination: String,
    pub dates: DatePair,
}

pub struct Scanner {
    provider: Arc<dyn FlightProvider>,
    store: Arc<dyn PriceStore>,
    notifier: Arc<dyn Notifier>,
    scan: ScanConfig,
    detector: DetectorConfig,
}

impl Scanner {
    pub fn new(
        config: &Config,
        provider: Arc<dyn FlightProvider>,
        store: Arc<dyn PriceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            provider,
            store,
            notifier,
            scan: config.scan.clone(),
            detector: DetectorConfig::from(&config.deals),
        }
    }

    /// Every search of a cycle, origin-major.
    pub fn tasks(&self, today: NaiveDate) -> Vec<ScanTask> {
        build_tasks(&self.scan, today)
    }

    fn query_for(&self, task: &ScanTask) -> SearchQuery {
        // Exempt destinations are allowed above the cap, so the provider
        // must not filter them out.
        let max_price = if self.detector.exempt_destinations.contains(&task.destination) {
            None
        } else {
            Some(self.detector.max_price)
        };
        SearchQuery {
            origin: task.origin.clone(),
            destination: task.destination.clone(),
            departure_date: task.dates.departure,
            return_date: Some(task.dates.return_date),
            max_price,
        }
    }

    /// Run one full scan cycle for the given day.
    pub async fn run_cycle(&self, today: NaiveDate) -> CycleSummary {
        let tasks = self.tasks(today);
        info!(
            tasks = tasks.len(),
            origins = self.scan.origins.len(),
            destinations = self.scan.destinations.len(),
            max_concurrent = self.scan.max_concurrent_requests,
            "scan cycle starting"
        );

        let observations = self.fan_out(tasks).await;
        info!(observations = observations.len(), "searches complete");

        let detector = DealDetector::new(self.store.as_ref(), self.detector.clone());
        let deals = detector.detect(&observations).await;

        let mut deals_notified = 0;
        for deal in &deals {
            let fingerprint = deal.fingerprint();
            match self.store.is_notified(&fingerprint).await {
                Ok(true) => {
                    debug!(fingerprint = %fingerprint, "deal already notified");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "notified lookup failed, skipping deal");
                    continue;
                }
            }

            if !self.notifier.send(deal).await {
                warn!(
                    origin = %deal.observation.origin,
                    destination = %deal.observation.destination,
                    "notification failed, will retry next cycle"
                );
                continue;
            }
            deals_notified += 1;

            if let Err(e) = self
                .store
                .mark_notified(&deal.observation, deal.usual_price, deal.discount_pct)
                .await
            {
                error!(error = %e, "failed to record notified deal");
            }
        }

        let summary = CycleSummary {
            total_observations: observations.len(),
            deals_detected: deals.len(),
            deals_notified,
        };
        info!(
            total_observations = summary.total_observations,
            deals_detected = summary.deals_detected,
            deals_notified = summary.deals_notified,
            "scan cycle complete"
        );
        summary
    }

    /// Run every task behind the concurrency gate and gather round-trip fares.
    async fn fan_out(&self, tasks: Vec<ScanTask>) -> Vec<Observation> {
        let gate = Arc::new(Semaphore::new(self.scan.max_concurrent_requests));
        let request_delay = self.scan.request_delay();
        let mut set = JoinSet::new();

        for task in tasks {
            let permit = match gate.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let query = self.query_for(&task);
            let provider = self.provider.clone();
            let store = self.store.clone();

            set.spawn(async move {
                let found = provider.search(&query).await;
                let kept = persist_round_trips(store.as_ref(), found).await;
                sleep(request_delay).await;
                drop(permit);
                kept
            });
        }

        let mut observations = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(found) => observations.extend(found),
                Err(e) => warn!(error = %e, "scan task failed"),
            }
        }
        observations
    }

    /// Repeat cycles every `scan_interval` until `stop` turns true.
    ///
    /// A raised flag lets the running cycle finish and cuts the wait short.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let interval = self.scan.scan_interval();
        info!(interval_secs = interval.as_secs(), "scanner started");

        loop {
            if *stop.borrow() {
                break;
            }

            let scanner = self.clone();
            let today = Local::now().date_naive();
            if let Err(e) = tokio::spawn(async move { scanner.run_cycle(today).await }).await {
                error!(error = %e, "scan cycle aborted");
            }

            if *stop.borrow() {
                break;
            }
            info!(secs = interval.as_secs(), "waiting for next cycle");
            tokio::select! {
                _ = sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("scanner stopped");
    }
}

/// Expand the scan configuration into search tasks.
pub fn build_tasks(scan: &ScanConfig, today: NaiveDate) -> Vec<ScanTask> {
    let pairs: Vec<DatePair> = DateWindow::from_config(today, scan).pairs().collect();
    let mut tasks = Vec::with_capacity(scan.origins.len() * scan.destinations.len() * pairs.len());
    for origin in &scan.origins {
        for destination in &scan.destinations {
            for dates in &pairs {
                tasks.push(ScanTask {
                    origin: origin.clone(),
                    destination: destination.clone(),
                    dates: *dates,
                });
            }
        }
    }
    tasks
}

async fn persist_round_trips(store: &dyn PriceStore, found: Vec<Observation>) -> Vec<Observation> {
    let mut kept = Vec::with_capacity(found.len());
    for o in found {
        if !o.is_round_trip() {
            continue;
        }
        if let Err(e) = store.record(&o).await {
            error!(
                origin = %o.origin,
                destination = %o.destination,
                error = %e,
                "failed to record observation"
            );
        }
        kept.push(o);
    }
    kept
}
