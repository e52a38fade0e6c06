use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dates::{MAX_STAY_CAP, MAX_WINDOW_DAYS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub scan: ScanConfig,
    #[serde(default)]
    pub deals: DealsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    pub origins: Vec<String>,
    pub destinations: Vec<String>,
    #[serde(default = "default_min_days_from_now")]
    pub min_days_from_now: u32,
    #[serde(default = "default_max_days_from_now")]
    pub max_days_from_now: u32,
    #[serde(default = "default_min_stay_days")]
    pub min_stay_days: u32,
    #[serde(default = "default_max_stay_days")]
    pub max_stay_days: u32,
    #[serde(default = "default_step")]
    pub stay_days_step: u32,
    #[serde(default = "default_date_step_days")]
    pub date_step_days: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_min_days_from_now() -> u32 {
    7
}
fn default_max_days_from_now() -> u32 {
    120
}
fn default_min_stay_days() -> u32 {
    3
}
fn default_max_stay_days() -> u32 {
    30
}
fn default_step() -> u32 {
    1
}
fn default_date_step_days() -> u32 {
    7
}
fn default_request_delay_ms() -> u64 {
    300
}
fn default_max_concurrent_requests() -> usize {
    10
}
fn default_scan_interval_secs() -> u64 {
    3600
}

impl ScanConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DealsConfig {
    #[serde(default = "default_max_price")]
    pub max_price: f64,
    #[serde(default = "default_discount_threshold")]
    pub discount_threshold: f64,
    #[serde(default = "default_min_observations")]
    pub min_observations: i64,
    /// Destinations whose fares may exceed `max_price` when they include a stopover.
    #[serde(default = "default_exempt_destinations")]
    pub exempt_destinations: HashSet<String>,
}

impl Default for DealsConfig {
    fn default() -> Self {
        Self {
            max_price: default_max_price(),
            discount_threshold: default_discount_threshold(),
            min_observations: default_min_observations(),
            exempt_destinations: default_exempt_destinations(),
        }
    }
}

fn default_max_price() -> f64 {
    200.0
}
fn default_discount_threshold() -> f64 {
    0.5
}
fn default_min_observations() -> i64 {
    10
}
fn default_exempt_destinations() -> HashSet<String> {
    [
        "BKK", "SIN", "HKG", "NRT", "HND", "ICN", "PEK", "PVG", "CAN", "KUL", "MNL", "HAN", "SGN",
        "BOM", "DEL", "BLR", "MAA", "DPS", "CGK", "TPE", "KIX", "NGO", "CTS", "GMP", "PUS", "CJU",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    /// Overrides the backend's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_low_quota_threshold")]
    pub low_quota_threshold: u32,
    #[serde(default = "default_quota_pause_secs")]
    pub quota_pause_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: None,
            timeout_secs: default_provider_timeout_secs(),
            min_call_interval_ms: default_min_call_interval_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            low_quota_threshold: default_low_quota_threshold(),
            quota_pause_secs: default_quota_pause_secs(),
            max_results: default_max_results(),
            currency: default_currency(),
        }
    }
}

fn default_provider_kind() -> String {
    "amadeus".to_string()
}
impl ProviderConfig {
    /// Configured endpoint, or the public one of `kind`.
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.kind.as_str()) {
            (Some(url), _) => url.as_str(),
            (None, "travelpayouts") => "https://api.travelpayouts.com",
            (None, _) => "https://api.amadeus.com",
        }
    }
}

fn default_provider_timeout_secs() -> u64 {
    30
}
fn default_min_call_interval_ms() -> u64 {
    200
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_low_quota_threshold() -> u32 {
    5
}
fn default_quota_pause_secs() -> u64 {
    60
}
fn default_max_results() -> u32 {
    10
}
fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_kind")]
    pub kind: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: default_notifier_kind(),
            webhook_url: None,
            timeout_secs: default_notifier_timeout_secs(),
        }
    }
}

fn default_notifier_kind() -> String {
    "log".to_string()
}
fn default_notifier_timeout_secs() -> u64 {
    10
}

/// Amadeus API credentials, read from the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// Read `AMADEUS_API_KEY` / `AMADEUS_API_SECRET`.
    ///
    /// Missing or empty values are a fatal startup error.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("AMADEUS_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("AMADEUS_API_SECRET").unwrap_or_default();
        if api_key.trim().is_empty() || api_secret.trim().is_empty() {
            bail!("AMADEUS_API_KEY and AMADEUS_API_SECRET must be set in the environment");
        }
        Ok(Self {
            api_key,
            api_secret,
        })
    }
}

/// Travelpayouts API token, read from `TRAVELPAYOUTS_API_TOKEN`.
#[derive(Debug, Clone)]
pub struct ApiToken(pub String);

impl ApiToken {
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TRAVELPAYOUTS_API_TOKEN").unwrap_or_default();
        if token.trim().is_empty() {
            bail!("TRAVELPAYOUTS_API_TOKEN must be set in the environment");
        }
        Ok(Self(token))
    }
}

fn is_iata(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let scan = &config.scan;

    if scan.origins.is_empty() {
        bail!("scan.origins must not be empty");
    }
    if scan.destinations.is_empty() {
        bail!("scan.destinations must not be empty");
    }
    for code in scan.origins.iter().chain(scan.destinations.iter()) {
        if !is_iata(code) {
            bail!("'{}' is not a three-letter IATA code", code);
        }
    }

    if scan.max_days_from_now > MAX_WINDOW_DAYS {
        bail!("scan.max_days_from_now must be <= {}", MAX_WINDOW_DAYS);
    }
    if scan.min_days_from_now > scan.max_days_from_now {
        bail!("scan.min_days_from_now must be <= scan.max_days_from_now");
    }
    if scan.min_stay_days == 0 {
        bail!("scan.min_stay_days must be >= 1");
    }
    if scan.min_stay_days > scan.max_stay_days {
        bail!("scan.min_stay_days must be <= scan.max_stay_days");
    }
    if scan.stay_days_step == 0 || scan.date_step_days == 0 {
        bail!("scan.stay_days_step and scan.date_step_days must be > 0");
    }
    if scan.stay_days_step > MAX_STAY_CAP {
        bail!("scan.stay_days_step must be <= {}", MAX_STAY_CAP);
    }
    if scan.date_step_days > MAX_WINDOW_DAYS {
        bail!("scan.date_step_days must be <= {}", MAX_WINDOW_DAYS);
    }
    if scan.max_concurrent_requests == 0 {
        bail!("scan.max_concurrent_requests must be > 0");
    }

    let deals = &config.deals;
    if deals.max_price <= 0.0 {
        bail!("deals.max_price must be > 0");
    }
    if !(deals.discount_threshold > 0.0 && deals.discount_threshold <= 1.0) {
        bail!("deals.discount_threshold must be in (0.0, 1.0]");
    }
    if deals.min_observations < 1 {
        bail!("deals.min_observations must be >= 1");
    }

    match config.provider.kind.as_str() {
        "amadeus" | "travelpayouts" => {}
        other => bail!(
            "Unknown provider: '{}'. Must be amadeus or travelpayouts.",
            other
        ),
    }

    match config.notifier.kind.as_str() {
        "log" => {}
        "webhook" => {
            if config.notifier.webhook_url.as_deref().unwrap_or("").is_empty() {
                bail!("notifier.webhook_url must be set when notifier.kind is 'webhook'");
            }
        }
        other => bail!(
            "Unknown notifier: '{}'. Must be log or webhook.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!(
            r#"
[db]
path = "/tmp/fares.sqlite"

[scan]
origins = ["CDG"]
destinations = ["NYC", "BKK"]
{}
"#,
            extra
        );
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.scan.max_concurrent_requests, 10);
        assert_eq!(cfg.scan.date_step_days, 7);
        assert_eq!(cfg.deals.max_price, 200.0);
        assert_eq!(cfg.deals.min_observations, 10);
        assert!(cfg.deals.exempt_destinations.contains("BKK"));
        assert_eq!(cfg.provider.max_retries, 3);
        assert_eq!(cfg.notifier.kind, "log");
    }

    #[test]
    fn test_provider_kinds() {
        let cfg = parse("[provider]\nkind = \"travelpayouts\"").unwrap();
        assert_eq!(cfg.provider.base_url(), "https://api.travelpayouts.com");
        assert_eq!(parse("").unwrap().provider.base_url(), "https://api.amadeus.com");

        let cfg = parse("[provider]\nbase_url = \"http://localhost:9000\"").unwrap();
        assert_eq!(cfg.provider.base_url(), "http://localhost:9000");

        assert!(parse("[provider]\nkind = \"skyscanner\"").is_err());
    }

    #[test]
    fn test_rejects_bad_iata() {
        let content = r#"
[db]
path = "/tmp/fares.sqlite"

[scan]
origins = ["Paris"]
destinations = ["NYC"]
"#;
        let config: Config = toml::from_str(content).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_inverted_stay_range() {
        assert!(parse("min_stay_days = 10\nmax_stay_days = 3").is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(parse("max_concurrent_requests = 0").is_err());
    }

    #[test]
    fn test_rejects_unbounded_window_and_steps() {
        assert!(parse("max_days_from_now = 4000000000").is_err());
        assert!(parse("max_days_from_now = 366").is_err());
        assert!(parse("max_days_from_now = 365").is_ok());
        assert!(parse("stay_days_step = 4294967295").is_err());
        assert!(parse("date_step_days = 4294967295").is_err());
        assert!(parse("stay_days_step = 14\ndate_step_days = 30").is_ok());
    }

    #[test]
    fn test_webhook_requires_url() {
        assert!(parse("[notifier]\nkind = \"webhook\"").is_err());
        assert!(parse("[notifier]\nkind = \"webhook\"\nwebhook_url = \"http://localhost/hook\"").is_ok());
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(parse("[deals]\ndiscount_threshold = 0.0").is_err());
        assert!(parse("[deals]\ndiscount_threshold = 1.5").is_err());
        assert!(parse("[deals]\ndiscount_threshold = 0.3").is_ok());
    }
}
