//! Deal detection.
//!
//! An observation is a deal when it is a round trip, within the price cap
//! (unless the destination is exempt and the fare has a stopover), its
//! route/month has at least `min_observations` recorded prices, and it is at
//! least `discount_threshold` cheaper than the route's median price.
//!
//! The median is taken over the departure month first and over the whole
//! route when the month has no rows. Deals are emitted in input order with
//! no ranking; overlapping date pairs for the same fare are left for the
//! fingerprint check downstream.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::config::DealsConfig;
use crate::models::{Deal, DealLimits, Observation};
use crate::store::{PriceStore, Scope};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub max_price: f64,
    pub discount_threshold: f64,
    pub min_observations: i64,
    pub exempt_destinations: HashSet<String>,
}

impl From<&DealsConfig> for DetectorConfig {
    fn from(deals: &DealsConfig) -> Self {
        Self {
            max_price: deals.max_price,
            discount_threshold: deals.discount_threshold,
            min_observations: deals.min_observations,
            exempt_destinations: deals.exempt_destinations.clone(),
        }
    }
}

pub struct DealDetector<'a> {
    store: &'a dyn PriceStore,
    config: DetectorConfig,
}

impl<'a> DealDetector<'a> {
    pub fn new(store: &'a dyn PriceStore, config: DetectorConfig) -> Self {
        Self { store, config }
    }

    /// Whether the price cap is waived for this observation.
    pub fn is_exempt(&self, o: &Observation) -> bool {
        o.has_stopover && self.config.exempt_destinations.contains(&o.destination)
    }

    /// Classify each observation. A store error skips only that observation.
    pub async fn detect(&self, observations: &[Observation]) -> Vec<Deal> {
        let mut deals = Vec::new();
        for o in observations {
            match self.evaluate(o).await {
                Ok(Some(deal)) => deals.push(deal),
                Ok(None) => {}
                Err(e) => error!(
                    origin = %o.origin,
                    destination = %o.destination,
                    error = %e,
                    "deal evaluation failed"
                ),
            }
        }
        deals
    }

    /// Evaluate a single observation.
    pub async fn evaluate(&self, o: &Observation) -> Result<Option<Deal>> {
        if !o.is_round_trip() {
            debug!(origin = %o.origin, destination = %o.destination, "skipping one-way fare");
            return Ok(None);
        }

        let exempt = self.is_exempt(o);
        if !exempt && o.price > self.config.max_price {
            return Ok(None);
        }

        let month_scope = Scope::from(&o.period());
        let count = self
            .store
            .count(&o.origin, &o.destination, month_scope)
            .await?;
        if count < self.config.min_observations {
            debug!(
                origin = %o.origin,
                destination = %o.destination,
                count,
                required = self.config.min_observations,
                "not enough history"
            );
            return Ok(None);
        }

        let usual_price = match self
            .store
            .median(&o.origin, &o.destination, month_scope)
            .await?
        {
            Some(median) => Some(median),
            None => {
                self.store
                    .median(&o.origin, &o.destination, Scope::all())
                    .await?
            }
        };
        let usual_price = match usual_price {
            Some(p) if p > 0.0 => p,
            _ => {
                debug!(origin = %o.origin, destination = %o.destination, "no usual price");
                return Ok(None);
            }
        };

        let discount_pct = (1.0 - o.price / usual_price) * 100.0;
        if discount_pct < self.config.discount_threshold * 100.0 {
            return Ok(None);
        }

        info!(
            origin = %o.origin,
            destination = %o.destination,
            departure = %o.departure_date,
            price = o.price,
            usual_price,
            discount_pct = %format!("{:.1}", discount_pct),
            stopover_exempt = exempt,
            "deal detected"
        );

        let limits = DealLimits {
            max_price: self.config.max_price,
            discount_threshold: self.config.discount_threshold,
            price_cap_waived: exempt,
        };
        Ok(Some(Deal::new(
            o.clone(),
            usual_price,
            discount_pct,
            count,
            limits,
        )))
    }
}
