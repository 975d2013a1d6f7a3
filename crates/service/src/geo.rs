//! Best-effort IP geolocation.
//!
//! The crawler treats location as decoration: any failure here is logged
//! and the peer simply stays location-less until a later discovery of the
//! same address succeeds.

use std::{
    net::IpAddr,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{sync::Mutex, time::Instant};

/// Default endpoint of the public geolocation API.
const DEFAULT_ENDPOINT: &str = "http://ip-api.com/json";

/// The public API allows 45 requests per minute; stay under it.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1400);

/// Location facts for one IP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpLocation {
    /// Country name.
    pub country: String,
    /// ISO country code.
    pub country_code: String,
    /// City name.
    pub city: String,
}

/// An error resolving an IP's location. Never fatal to any caller.
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    /// The HTTP request failed.
    #[error("request failed: {0}")]
    Http(String),
    /// The API answered but could not resolve the IP.
    #[error("lookup failed: {0}")]
    Lookup(String),
    /// Geolocation is disabled for this run.
    #[error("geolocation disabled")]
    Disabled,
}

/// The IP-localization boundary.
#[async_trait]
pub trait IpLocator: Send + Sync + 'static {
    /// Resolves the location of `ip`.
    async fn locate(&self, ip: IpAddr) -> Result<IpLocation, GeoError>;
}

/// A locator that always reports geolocation as disabled.
#[derive(Debug, Clone, Default)]
pub struct NoopLocator;

#[async_trait]
impl IpLocator for NoopLocator {
    async fn locate(&self, _ip: IpAddr) -> Result<IpLocation, GeoError> {
        Err(GeoError::Disabled)
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    country: String,
    #[serde(default, rename = "countryCode")]
    country_code: String,
    #[serde(default)]
    city: String,
}

/// A locator backed by the public ip-api.com service, self rate-limited
/// to stay inside the service's request budget.
#[derive(Debug)]
pub struct IpApiLocator {
    client: reqwest::Client,
    endpoint: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Default for IpApiLocator {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl IpApiLocator {
    /// Creates a locator against `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            min_interval: DEFAULT_MIN_INTERVAL,
            last_request: Mutex::new(None),
        }
    }

    /// Overrides the spacing between outgoing requests.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Sleeps long enough to keep the configured request spacing.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let next_allowed = previous + self.min_interval;
            let now = Instant::now();
            if next_allowed > now {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl IpLocator for IpApiLocator {
    async fn locate(&self, ip: IpAddr) -> Result<IpLocation, GeoError> {
        self.throttle().await;

        let url = format!("{}/{}", self.endpoint, ip);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeoError::Http(e.to_string()))?
            .json::<IpApiResponse>()
            .await
            .map_err(|e| GeoError::Http(e.to_string()))?;

        if response.status != "success" {
            return Err(GeoError::Lookup(if response.message.is_empty() {
                response.status
            } else {
                response.message
            }));
        }
        Ok(IpLocation {
            country: response.country,
            country_code: response.country_code,
            city: response.city,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_api_response_decodes() {
        let raw = r#"{"status":"success","country":"Germany","countryCode":"DE","city":"Berlin"}"#;
        let response: IpApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.status, "success");
        assert_eq!(response.country_code, "DE");
        assert_eq!(response.city, "Berlin");
    }

    #[test]
    fn test_ip_api_failure_decodes() {
        let raw = r#"{"status":"fail","message":"private range"}"#;
        let response: IpApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.status, "fail");
        assert_eq!(response.message, "private range");
        assert!(response.country.is_empty());
    }

    #[tokio::test]
    async fn test_noop_locator_is_disabled() {
        let locator = NoopLocator;
        let result = locator.locate("8.8.8.8".parse().unwrap()).await;
        assert!(matches!(result, Err(GeoError::Disabled)));
    }
}
