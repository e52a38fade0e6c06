//! Amadeus Self-Service flight-offers backend.
//!
//! Authenticates with the OAuth2 client-credentials flow and caches the
//! bearer token until one minute before it expires. Offers are decoded one
//! at a time so a single malformed offer doesn't sink the whole response.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    date_of, quota_from_headers, retry_after, FareSource, FetchError, FetchOutcome, SearchQuery,
};
use crate::config::{Credentials, ProviderConfig};
use crate::models::Observation;

const TOKEN_PATH: &str = "/v1/security/oauth2/token";
const OFFERS_PATH: &str = "/v2/shopping/flight-offers";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_TTL_SECS: u64 = 1800;

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

pub struct AmadeusSource {
    http: reqwest::Client,
    config: ProviderConfig,
    credentials: Credentials,
    token: Mutex<Option<AccessToken>>,
}

impl AmadeusSource {
    pub fn new(config: &ProviderConfig, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            credentials,
            token: Mutex::new(None),
        })
    }

    async fn bearer(&self) -> Result<String, FetchError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.request_token().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken, FetchError> {
        let url = format!("{}{}", self.config.base_url(), TOKEN_PATH);
        let resp = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.api_key.as_str()),
                ("client_secret", self.credentials.api_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw: RawToken = resp.json().await?;
        let ttl = Duration::from_secs(raw.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        info!(expires_in_secs = ttl.as_secs(), "amadeus token acquired");
        Ok(AccessToken {
            value: raw.access_token,
            refresh_at: Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN),
        })
    }

    fn query_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("originLocationCode", query.origin.clone()),
            ("destinationLocationCode", query.destination.clone()),
            ("departureDate", query.departure_date.to_string()),
            ("adults", "1".to_string()),
            ("max", self.config.max_results.to_string()),
            ("currencyCode", self.config.currency.clone()),
        ];
        if let Some(return_date) = query.return_date {
            params.push(("returnDate", return_date.to_string()));
        }
        if let Some(max_price) = query.max_price {
            params.push(("maxPrice", (max_price as i64).to_string()));
        }
        params
    }
}

#[async_trait]
impl FareSource for AmadeusSource {
    fn name(&self) -> &str {
        "amadeus"
    }

    async fn fetch(&self, query: &SearchQuery) -> Result<FetchOutcome, FetchError> {
        let token = self.bearer().await?;
        let url = format!("{}{}", self.config.base_url(), OFFERS_PATH);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
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
        let observations = parse_offers(&body.data, query, Utc::now());
        Ok(FetchOutcome {
            observations,
            quota,
        })
    }

    async fn reauthenticate(&self) -> Result<(), FetchError> {
        let mut guard = self.token.lock().await;
        *guard = None;
        *guard = Some(self.request_token().await?);
        Ok(())
    }
}

// ============ Wire format ============

#[derive(Deserialize)]
struct RawToken {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOffer {
    source: Option<String>,
    price: Option<RawPrice>,
    #[serde(default)]
    validating_airline_codes: Vec<String>,
    #[serde(default)]
    itineraries: Vec<RawItinerary>,
}

#[derive(Deserialize)]
struct RawPrice {
    total: Option<String>,
    currency: Option<String>,
}

#[derive(Deserialize)]
struct RawItinerary {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Deserialize)]
struct RawSegment {
    departure: Option<RawEndpoint>,
}

#[derive(Deserialize)]
struct RawEndpoint {
    at: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum OfferError {
    #[error("malformed offer: {0}")]
    Malformed(String),

    #[error("offer has no price")]
    MissingPrice,

    #[error("invalid price '{0}'")]
    InvalidPrice(String),

    #[error("offer has no outbound segments")]
    NoItinerary,
}

/// Map every offer in `data`, skipping the ones that don't parse.
pub fn parse_offers(
    data: &[serde_json::Value],
    query: &SearchQuery,
    observed_at: DateTime<Utc>,
) -> Vec<Observation> {
    let mut observations = Vec::with_capacity(data.len());
    for value in data {
        match parse_offer(value, query, observed_at) {
            Ok(o) => observations.push(o),
            Err(e) => debug!(error = %e, "skipping offer"),
        }
    }
    observations
}

fn parse_offer(
    value: &serde_json::Value,
    query: &SearchQuery,
    observed_at: DateTime<Utc>,
) -> Result<Observation, OfferError> {
    let offer = RawOffer::deserialize(value).map_err(|e| OfferError::Malformed(e.to_string()))?;

    let price = offer.price.ok_or(OfferError::MissingPrice)?;
    let total = price.total.ok_or(OfferError::MissingPrice)?;
    let amount: f64 = total
        .parse()
        .map_err(|_| OfferError::InvalidPrice(total.clone()))?;
    if !(amount.is_finite() && amount >= 0.0) {
        return Err(OfferError::InvalidPrice(total));
    }

    let outbound = offer.itineraries.first().ok_or(OfferError::NoItinerary)?;
    if outbound.segments.is_empty() {
        return Err(OfferError::NoItinerary);
    }

    let has_stopover = offer.itineraries.iter().any(|it| it.segments.len() > 1);

    let return_date = offer
        .itineraries
        .get(1)
        .and_then(|it| it.segments.first())
        .and_then(|s| s.departure.as_ref())
        .and_then(|d| d.at.as_deref())
        .and_then(date_of)
        .or(query.return_date);

    let airline = offer
        .validating_airline_codes
        .into_iter()
        .next()
        .unwrap_or_else(|| "Unknown".to_string());

    let booking_url = offer.source.map(|_| {
        format!(
            "https://www.amadeus.com/fr/offres-vols/{}/{}",
            query.origin, query.destination
        )
    });

    Ok(Observation {
        origin: query.origin.clone(),
        destination: query.destination.clone(),
        departure_date: query.departure_date,
        return_date,
        price: amount,
        airline,
        currency: price.currency.unwrap_or_else(|| "EUR".to_string()),
        has_stopover,
        booking_url,
        observed_at,
    })
}
