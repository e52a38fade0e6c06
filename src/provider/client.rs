//! [`FlightProvider`] over a [`FareSource`] with pacing, retry, and re-auth.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use super::rate_limit::{RateLimiter, RetryPolicy};
use super::{FareSource, FetchError, FetchOutcome, FlightProvider, SearchQuery};
use crate::config::ProviderConfig;
use crate::models::Observation;

pub struct RateLimitedClient<S> {
    source: S,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl<S: FareSource> RateLimitedClient<S> {
    pub fn new(
        source: S,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            source,
            limiter,
            retry,
            call_timeout,
        }
    }

    pub fn from_config(source: S, config: &ProviderConfig) -> Self {
        Self::new(
            source,
            Arc::new(RateLimiter::from_config(config)),
            RetryPolicy::from_config(config),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn call(&self, query: &SearchQuery) -> Result<FetchOutcome, FetchError> {
        self.limiter.acquire().await;
        match timeout(self.call_timeout, self.source.fetch(query)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transport(format!(
                "no response within {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }

    /// Search with retries; the error is the last one seen.
    ///
    /// Retryable failures back off `base * 2^attempt`, or longer when the
    /// provider asked for it via `Retry-After`. A 401 triggers a single
    /// re-authentication followed by an immediate retry.
    pub async fn search_with_retry(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<Observation>, FetchError> {
        let mut retry = self.retry.start();
        let mut reauthenticated = false;

        loop {
            match self.call(query).await {
                Ok(outcome) => {
                    self.limiter.observe(&outcome.quota).await;
                    debug!(
                        source = self.source.name(),
                        origin = %query.origin,
                        destination = %query.destination,
                        results = outcome.observations.len(),
                        "search complete"
                    );
                    return Ok(outcome.observations);
                }
                Err(FetchError::Unauthorized) if !reauthenticated => {
                    warn!(source = self.source.name(), "unauthorized, refreshing credentials");
                    reauthenticated = true;
                    self.source.reauthenticate().await?;
                }
                Err(e) if e.is_retryable() => {
                    let Some(backoff) = retry.next_delay() else {
                        return Err(e);
                    };
                    let delay = match &e {
                        FetchError::RateLimited {
                            retry_after: Some(wait),
                        } => backoff.max(*wait),
                        _ => backoff,
                    };
                    warn!(
                        source = self.source.name(),
                        attempt = retry.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying search"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: FareSource> FlightProvider for RateLimitedClient<S> {
    async fn search(&self, query: &SearchQuery) -> Vec<Observation> {
        match self.search_with_retry(query).await {
            Ok(observations) => observations,
            Err(e) => {
                error!(
                    source = self.source.name(),
                    origin = %query.origin,
                    destination = %query.destination,
                    departure = %query.departure_date,
                    error = %e,
                    "search failed"
                );
                Vec::new()
            }
        }
    }
}
