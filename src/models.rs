//! Core data models used throughout the scanner.
//!
//! These types represent the fare observations, date pairs, and deals that
//! flow from the provider through the ledger and the deal detector.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// One price sighting for a route, date, and airline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub price: f64,
    pub airline: String,
    pub currency: String,
    pub has_stopover: bool,
    pub booking_url: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn is_round_trip(&self) -> bool {
        self.return_date.is_some()
    }

    /// Scope key for aggregate queries.
    pub fn period(&self) -> RoutePeriod {
        RoutePeriod {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            month: self.departure_date.month(),
            year: self.departure_date.year(),
        }
    }

    /// Stable hex SHA-256 identifying a notifiable fare.
    ///
    /// Any change in price or airline yields a new fingerprint.
    pub fn fingerprint(&self) -> String {
        let return_part = self
            .return_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "oneway".to_string());
        let key = format!(
            "{}_{}_{}_{}_{}_{}",
            self.origin, self.destination, self.departure_date, return_part, self.price, self.airline
        );
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Stay length in days, for round trips.
    pub fn stay_days(&self) -> Option<i64> {
        self.return_date
            .map(|r| (r - self.departure_date).num_days())
    }
}

/// `(origin, destination, month, year)` scope derived from a departure date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutePeriod {
    pub origin: String,
    pub destination: String,
    pub month: u32,
    pub year: i32,
}

/// A departure/return pair to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePair {
    pub departure: NaiveDate,
    pub return_date: NaiveDate,
}

/// Thresholds a [`Deal`] is validated against on construction.
#[derive(Debug, Clone, Copy)]
pub struct DealLimits {
    pub max_price: f64,
    pub discount_threshold: f64,
    pub price_cap_waived: bool,
}

/// An observation priced far enough below its route's usual price.
#[derive(Debug, Clone, Serialize)]
pub struct Deal {
    pub observation: Observation,
    pub usual_price: f64,
    pub discount_pct: f64,
    pub observation_count: i64,
}

impl Deal {
    /// Build a deal, asserting the discount and price-cap invariants.
    ///
    /// # Panics
    ///
    /// Panics when the discount is below `limits.discount_threshold * 100`
    /// or when the price exceeds `limits.max_price` without a waiver.
    pub fn new(
        observation: Observation,
        usual_price: f64,
        discount_pct: f64,
        observation_count: i64,
        limits: DealLimits,
    ) -> Self {
        assert!(
            discount_pct >= limits.discount_threshold * 100.0,
            "deal discount {:.2}% below threshold {:.2}%",
            discount_pct,
            limits.discount_threshold * 100.0
        );
        assert!(
            limits.price_cap_waived || observation.price <= limits.max_price,
            "deal price {} above cap {}",
            observation.price,
            limits.max_price
        );
        Self {
            observation,
            usual_price,
            discount_pct,
            observation_count,
        }
    }

    pub fn fingerprint(&self) -> String {
        self.observation.fingerprint()
    }
}

/// Counters produced by one scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub total_observations: usize,
    pub deals_detected: usize,
    pub deals_notified: usize,
}

#[cfg(test)]
pub(crate) fn observation(
    origin: &str,
    destination: &str,
    departure: NaiveDate,
    return_date: Option<NaiveDate>,
    price: f64,
    airline: &str,
) -> Observation {
    Observation {
        origin: origin.to_string(),
        destination: destination.to_string(),
        departure_date: departure,
        return_date,
        price,
        airline: airline.to_string(),
        currency: "EUR".to_string(),
        has_stopover: false,
        booking_url: None,
        observed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const LIMITS: DealLimits = DealLimits {
        max_price: 200.0,
        discount_threshold: 0.5,
        price_cap_waived: false,
    };

    #[test]
    fn test_fingerprint_stable() {
        let a = observation("CDG", "NYC", d(2024, 6, 15), Some(d(2024, 6, 22)), 100.0, "AF");
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_price_and_airline() {
        let a = observation("CDG", "NYC", d(2024, 6, 15), Some(d(2024, 6, 22)), 100.0, "AF");
        let mut repriced = a.clone();
        repriced.price = 99.0;
        let mut other_airline = a.clone();
        other_airline.airline = "DL".to_string();
        assert_ne!(a.fingerprint(), repriced.fingerprint());
        assert_ne!(a.fingerprint(), other_airline.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_one_way() {
        let rt = observation("CDG", "NYC", d(2024, 6, 15), Some(d(2024, 6, 22)), 100.0, "AF");
        let mut ow = rt.clone();
        ow.return_date = None;
        assert_ne!(rt.fingerprint(), ow.fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_observed_at() {
        let a = observation("CDG", "NYC", d(2024, 6, 15), Some(d(2024, 6, 22)), 100.0, "AF");
        let mut b = a.clone();
        b.observed_at = a.observed_at + chrono::Duration::hours(3);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_period_from_departure() {
        let o = observation("CDG", "NYC", d(2024, 6, 15), None, 100.0, "AF");
        let p = o.period();
        assert_eq!((p.month, p.year), (6, 2024));
    }

    #[test]
    fn test_deal_accepts_valid() {
        let o = observation("CDG", "NYC", d(2024, 6, 15), Some(d(2024, 6, 22)), 100.0, "AF");
        let deal = Deal::new(o, 200.0, 50.0, 10, LIMITS);
        assert_eq!(deal.discount_pct, 50.0);
    }

    #[test]
    #[should_panic(expected = "below threshold")]
    fn test_deal_rejects_small_discount() {
        let o = observation("CDG", "NYC", d(2024, 6, 15), Some(d(2024, 6, 22)), 101.0, "AF");
        Deal::new(o, 200.0, 49.5, 10, LIMITS);
    }

    #[test]
    #[should_panic(expected = "above cap")]
    fn test_deal_rejects_price_over_cap() {
        let o = observation("CDG", "NYC", d(2024, 6, 15), Some(d(2024, 6, 22)), 350.0, "AF");
        Deal::new(o, 1000.0, 65.0, 10, LIMITS);
    }

    #[test]
    fn test_deal_price_cap_waiver() {
        let o = observation("CDG", "BKK", d(2024, 6, 15), Some(d(2024, 6, 22)), 350.0, "TK");
        let limits = DealLimits {
            price_cap_waived: true,
            ..LIMITS
        };
        let deal = Deal::new(o, 1000.0, 65.0, 10, limits);
        assert_eq!(deal.observation.price, 350.0);
    }
}
