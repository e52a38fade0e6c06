//! Flight provider abstraction.
//!
//! Two layers:
//! - **[`FareSource`]** — a raw backend ([`amadeus::AmadeusSource`] or
//!   [`travelpayouts::TravelpayoutsSource`]) that performs one HTTP search
//!   and reports failures as typed [`FetchError`]s along with quota hints
//!   from the response.
//! - **[`FlightProvider`]** — what the scanner consumes. Its only
//!   implementation, [`client::RateLimitedClient`], wraps a `FareSource` with
//!   shared call pacing, quota tracking, retry with exponential backoff, and
//!   one-shot re-authentication. It never fails: exhausted retries degrade
//!   to an empty result.
//!
//! # Retry Strategy
//!
//! - Rate limited (HTTP 429), server errors (5xx), network errors → retry
//!   with `backoff_base * 2^attempt`, up to `max_retries` times
//! - Unauthorized (HTTP 401) → re-authenticate once, then retry once
//! - Any other client error → give up immediately
//!
//! [`create_provider`] picks the backend named by `provider.kind` and reads
//! its credentials from the environment.

pub mod amadeus;
pub mod client;
pub mod rate_limit;
pub mod travelpayouts;

use anyhow::bail;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ApiToken, Credentials, ProviderConfig};
use crate::models::Observation;

pub use client::RateLimitedClient;
pub use rate_limit::{RateLimiter, RetryPolicy};

/// Parameters of a single provider search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub max_price: Option<f64>,
}

/// Search interface consumed by the scanner.
///
/// Implementations apply their own timeout and never return an error;
/// failures are logged and yield an empty list.
#[async_trait]
pub trait FlightProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Vec<Observation>;
}

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider rejected credentials")]
    Unauthorized,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether the call may succeed if repeated after a delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } | FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Unauthorized | FetchError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Rate-limit bookkeeping reported by a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaHint {
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
}

/// Successful result of a backend call.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub observations: Vec<Observation>,
    pub quota: QuotaHint,
}

/// A raw provider backend.
#[async_trait]
pub trait FareSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Perform one search call.
    async fn fetch(&self, query: &SearchQuery) -> Result<FetchOutcome, FetchError>;

    /// Discard any cached credentials and obtain fresh ones.
    async fn reauthenticate(&self) -> Result<(), FetchError>;
}

/// Build the configured backend behind a [`RateLimitedClient`].
///
/// Fails if `kind` is unknown or its credentials are missing.
pub fn create_provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn FlightProvider>> {
    match config.kind.as_str() {
        "amadeus" => {
            let source = amadeus::AmadeusSource::new(config, Credentials::from_env()?)?;
            Ok(Arc::new(RateLimitedClient::from_config(source, config)))
        }
        "travelpayouts" => {
            let source = travelpayouts::TravelpayoutsSource::new(config, ApiToken::from_env()?)?;
            Ok(Arc::new(RateLimitedClient::from_config(source, config)))
        }
        other => bail!("Unknown provider: '{}'", other),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Quota hints from `X-RateLimit-Remaining` / `X-RateLimit-Reset`.
pub fn quota_from_headers(headers: &HeaderMap) -> QuotaHint {
    QuotaHint {
        remaining: header_u64(headers, "x-ratelimit-remaining").and_then(|v| u32::try_from(v).ok()),
        reset_after: header_u64(headers, "x-ratelimit-reset").map(Duration::from_secs),
    }
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, "retry-after").map(Duration::from_secs)
}

/// Date part of an ISO-8601 timestamp such as `2024-06-22T10:30:00+02:00`.
pub(crate) fn date_of(at: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(at.get(..10)?, "%Y-%m-%d").ok()
}
