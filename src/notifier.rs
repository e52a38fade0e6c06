//! Deal notification channels.
//!
//! A [`Notifier`] reports delivery success as a plain `bool`; the scanner
//! marks a deal as notified only when delivery succeeded, so a failed send
//! is retried on the next cycle that sees the same fare.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::models::Deal;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, deal: &Deal) -> bool;
}

/// Writes the deal summary to the log. Always succeeds.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, deal: &Deal) -> bool {
        info!(
            origin = %deal.observation.origin,
            destination = %deal.observation.destination,
            price = deal.observation.price,
            "\n{}",
            render_summary(deal)
        );
        true
    }
}

/// POSTs a JSON payload to a webhook; any 2xx counts as delivered.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

/// JSON body sent to webhooks.
pub fn webhook_payload(deal: &Deal) -> serde_json::Value {
    let o = &deal.observation;
    json!({
        "origin": o.origin,
        "destination": o.destination,
        "departure_date": o.departure_date.to_string(),
        "return_date": o.return_date.map(|d| d.to_string()),
        "airline": o.airline,
        "price": o.price,
        "currency": o.currency,
        "usual_price": deal.usual_price,
        "discount_pct": deal.discount_pct,
        "observation_count": deal.observation_count,
        "booking_url": o.booking_url,
        "summary": render_summary(deal),
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, deal: &Deal) -> bool {
        let result = self
            .http
            .post(&self.url)
            .json(&webhook_payload(deal))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "webhook rejected deal");
                false
            }
            Err(e) => {
                warn!(error = %e, "webhook delivery failed");
                false
            }
        }
    }
}

/// Human-readable summary of a deal.
pub fn render_summary(deal: &Deal) -> String {
    let o = &deal.observation;
    let mut out = String::new();
    let _ = writeln!(out, "Flight deal: {} -> {}", o.origin, o.destination);
    let _ = writeln!(out, "Airline:     {}", o.airline);
    let _ = writeln!(out, "Departure:   {}", o.departure_date.format("%d/%m/%Y"));
    if let (Some(ret), Some(stay)) = (o.return_date, o.stay_days()) {
        let _ = writeln!(out, "Return:      {}", ret.format("%d/%m/%Y"));
        let _ = writeln!(out, "Stay:        {} day(s)", stay);
    }
    if o.has_stopover {
        let _ = writeln!(out, "Stopover:    yes");
    }
    let _ = writeln!(out, "Price:       {:.2} {}", o.price, o.currency);
    let _ = writeln!(out, "Usual price: ~{:.2} {}", deal.usual_price, o.currency);
    let _ = writeln!(out, "Discount:    {:.1}% cheaper", deal.discount_pct);
    let _ = writeln!(out, "Based on:    {} observations", deal.observation_count);
    match &o.booking_url {
        Some(url) => {
            let _ = writeln!(out, "Book:        {}", url);
        }
        None => {
            let _ = writeln!(out, "Search this fare on your usual booking site.");
        }
    }
    out
}

pub fn create_notifier(config: &NotifierConfig) -> Result<Box<dyn Notifier>> {
    match config.kind.as_str() {
        "log" => Ok(Box::new(LogNotifier)),
        "webhook" => {
            let url = config
                .webhook_url
                .as_deref()
                .ok_or_else(|| anyhow!("notifier.webhook_url required for webhook notifier"))?;
            Ok(Box::new(WebhookNotifier::new(
                url,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => Err(anyhow!("Unknown notifier: '{}'", other)),
    }
}
