//! Travelpayouts (Aviasales) cached-prices backend.
//!
//! Authenticates with a static `X-Access-Token` header. Searches are
//! month-granular: one call returns the cheapest cached tickets departing in
//! the query's month (and returning in the return month), keyed by their
//! number of transfers. The API has no price filter, so the cap is applied
//! after the response arrives.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::{
    date_of, quota_from_headers, retry_after, FareSource, FetchError, FetchOutcome, SearchQuery,
};
use crate::config::{ApiToken, ProviderConfig};
use crate::models::Observation;

const PRICES_PATH: &str = "/v1/prices/cheap";

pub struct TravelpayoutsSource {
    http: reqwest::Client,
    config: ProviderConfig,
    token: ApiToken,
}

impl TravelpayoutsSource {
    pub fn new(config: &ProviderConfig, token: ApiToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            token,
        })
    }

    fn query_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("origin", query.origin.clone()),
            ("destination", query.destination.clone()),
            ("depart_date", query.departure_date.format("%Y-%m").to_string()),
            ("currency", self.config.currency.to_lowercase()),
        ];
        if let Some(return_date) = query.return_date {
            params.push(("return_date", return_date.format("%Y-%m").to_string()));
        }
        params
    }
}

#[async_trait]
impl FareSource for TravelpayoutsSource {
    fn name(&self) -> &str {
        "travelpayouts"
    }

    async fn fetch(&self, query: &SearchQuery) -> Result<FetchOutcome, FetchError> {
        let url = format!("{}{}", self.config.base_url(), PRICES_PATH);
        let resp = self
            .http
            .get(&url)
            .header("X-Access-Token", &self.token.0)
            .query(&self.query_params(query))
            .send()
            .await?;

        let status = resp.status();
        let quota = quota_from_headers(resp.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after: retry_after(resp.headers()),
            });
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: RawResponse = resp.json().await?;
        if body.success == Some(false) {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.error.unwrap_or_default(),
            });
        }

        let currency = body
            .currency
            .unwrap_or_else(|| self.config.currency.clone())
            .to_uppercase();
        let observations = parse_offers(&body.data, &currency, query, Utc::now());
        Ok(FetchOutcome {
            observations,
            quota,
        })
    }

    /// The token is static; a rejected one stays rejected.
    async fn reauthenticate(&self) -> Result<(), FetchError> {
        Err(FetchError::Unauthorized)
    }
}

// ============ Wire format ============

#[derive(Deserialize)]
struct RawResponse {
    success: Option<bool>,
    error: Option<String>,
    currency: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct RawTicket {
    price: Option<f64>,
    airline: Option<String>,
    departure_at: Option<String>,
    return_at: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum TicketError {
    #[error("malformed ticket: {0}")]
    Malformed(String),

    #[error("ticket has no price")]
    MissingPrice,

    #[error("invalid price {0}")]
    InvalidPrice(f64),

    #[error("transfer count '{0}' is not a number")]
    Transfers(String),
}

/// Map the tickets for the query's destination, skipping the ones that
/// don't parse or cost more than `query.max_price`.
///
/// `data` is shaped `{ "<DEST>": { "<transfers>": { ticket } } }`.
pub fn parse_offers(
    data: &serde_json::Value,
    currency: &str,
    query: &SearchQuery,
    observed_at: DateTime<Utc>,
) -> Vec<Observation> {
    let Some(tickets) = data.get(&query.destination).and_then(|d| d.as_object()) else {
        debug!(destination = %query.destination, "no tickets for destination");
        return Vec::new();
    };

    let mut observations = Vec::with_capacity(tickets.len());
    for (transfers, value) in tickets {
        match parse_ticket(transfers, value, currency, query, observed_at) {
            Ok(o) => {
                if query.max_price.is_some_and(|cap| o.price > cap) {
                    continue;
                }
                observations.push(o);
            }
            Err(e) => debug!(error = %e, "skipping ticket"),
        }
    }
    observations
}

fn parse_ticket(
    transfers: &str,
    value: &serde_json::Value,
    currency: &str,
    query: &SearchQuery,
    observed_at: DateTime<Utc>,
) -> Result<Observation, TicketError> {
    let ticket =
        RawTicket::deserialize(value).map_err(|e| TicketError::Malformed(e.to_string()))?;

    let price = ticket.price.ok_or(TicketError::MissingPrice)?;
    if !(price.is_finite() && price >= 0.0) {
        return Err(TicketError::InvalidPrice(price));
    }

    let transfers: u32 = transfers
        .parse()
        .map_err(|_| TicketError::Transfers(transfers.to_string()))?;

    let departure_date = ticket
        .departure_at
        .as_deref()
        .and_then(date_of)
        .unwrap_or(query.departure_date);
    let return_date = ticket
        .return_at
        .as_deref()
        .and_then(date_of)
        .or(query.return_date);

    let mut booking_url = format!(
        "https://www.aviasales.com/search/{}{}{}",
        query.origin,
        departure_date.format("%d%m"),
        query.destination
    );
    if let Some(r) = return_date {
        booking_url.push_str(&r.format("%d%m").to_string());
    }
    booking_url.push('1');

    Ok(Observation {
        origin: query.origin.clone(),
        destination: query.destination.clone(),
        departure_date,
        return_date,
        price,
        airline: ticket
            .airline
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        currency: currency.to_string(),
        has_stopover: transfers > 0,
        booking_url: Some(booking_url),
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    fn query(return_date: Option<NaiveDate>, max_price: Option<f64>) -> SearchQuery {
        SearchQuery {
            origin: "PAR".into(),
            destination: "BKK".into(),
            departure_date: date(12, 10),
            return_date,
            max_price,
        }
    }

    fn response() -> serde_json::Value {
        json!({
            "BKK": {
                "0": {
                    "price": 540,
                    "airline": "TG",
                    "departure_at": "2025-12-16T10:05:00+01:00",
                    "return_at": "2025-12-28T22:40:00+07:00"
                },
                "1": {
                    "price": 410.5,
                    "airline": "EK",
                    "departure_at": "2025-12-18T14:30:00Z",
                    "return_at": "2025-12-30T09:15:00Z"
                }
            },
            "HKT": {
                "0": { "price": 300, "airline": "TG" }
            }
        })
    }

    fn source() -> TravelpayoutsSource {
        let config = ProviderConfig {
            kind: "travelpayouts".into(),
            ..ProviderConfig::default()
        };
        TravelpayoutsSource::new(&config, ApiToken("t".into())).unwrap()
    }

    #[test]
    fn test_parse_tickets_for_destination() {
        let mut obs = parse_offers(&response(), "EUR", &query(Some(date(12, 25)), None), Utc::now());
        obs.sort_by(|a, b| a.price.total_cmp(&b.price));
        assert_eq!(obs.len(), 2);

        let via = &obs[0];
        assert_eq!(via.price, 410.5);
        assert_eq!(via.airline, "EK");
        assert!(via.has_stopover);
        assert_eq!(via.departure_date, date(12, 18));
        assert_eq!(via.return_date, Some(date(12, 30)));

        let direct = &obs[1];
        assert!(!direct.has_stopover);
        assert_eq!(direct.departure_date, date(12, 16));
        assert_eq!(direct.currency, "EUR");
        assert_eq!(
            direct.booking_url.as_deref(),
            Some("https://www.aviasales.com/search/PAR1612BKK28121")
        );
    }

    #[test]
    fn test_price_cap_applied_after_response() {
        let obs = parse_offers(&response(), "EUR", &query(None, Some(450.0)), Utc::now());
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].price, 410.5);
    }

    #[test]
    fn test_missing_dates_fall_back_to_request() {
        let data = json!({ "BKK": { "0": { "price": 0 } } });
        let obs = parse_offers(&data, "EUR", &query(Some(date(12, 20)), None), Utc::now());
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].departure_date, date(12, 10));
        assert_eq!(obs[0].return_date, Some(date(12, 20)));
        assert_eq!(obs[0].airline, "Unknown");
        assert_eq!(obs[0].price, 0.0);
    }

    #[test]
    fn test_bad_tickets_skipped() {
        let data = json!({
            "BKK": {
                "direct": { "price": 100 },
                "0": { "airline": "TG" },
                "1": { "price": -20 },
                "2": "garbage",
                "3": { "price": 380, "airline": "QR" }
            }
        });
        let obs = parse_offers(&data, "EUR", &query(None, None), Utc::now());
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].airline, "QR");
    }

    #[test]
    fn test_unexpected_shapes_yield_nothing() {
        let q = query(None, None);
        assert!(parse_offers(&json!({ "BKK": [] }), "EUR", &q, Utc::now()).is_empty());
        assert!(parse_offers(&json!([]), "EUR", &q, Utc::now()).is_empty());
        assert!(parse_offers(&serde_json::Value::Null, "EUR", &q, Utc::now()).is_empty());
    }

    #[test]
    fn test_ticket_errors() {
        let q = query(None, None);
        assert_eq!(
            parse_ticket("0", &json!({}), "EUR", &q, Utc::now()).unwrap_err(),
            TicketError::MissingPrice
        );
        assert_eq!(
            parse_ticket("x", &json!({ "price": 1 }), "EUR", &q, Utc::now()).unwrap_err(),
            TicketError::Transfers("x".into())
        );
    }

    #[test]
    fn test_query_params_are_month_granular() {
        let params = source().query_params(&query(Some(date(1, 3)), Some(200.0)));
        assert!(params.contains(&("depart_date", "2025-12".to_string())));
        assert!(params.contains(&("return_date", "2025-01".to_string())));
        assert!(params.contains(&("currency", "eur".to_string())));
        assert!(!params.iter().any(|(k, _)| k.contains("price")));

        let one_way = source().query_params(&query(None, None));
        assert!(!one_way.iter().any(|(k, _)| *k == "return_date"));
    }

    #[tokio::test]
    async fn test_static_token_cannot_reauthenticate() {
        assert!(matches!(
            source().reauthenticate().await,
            Err(FetchError::Unauthorized)
        ));
    }
}
