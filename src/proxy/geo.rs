//! Geolocation of proxy egress IPs via an ip-api style HTTP service
//!
//! Lookups are best-effort enrichment: every failure path collapses to
//! `None` so a geo outage can never fail a proxy test.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Timeout applied to geo lookups, independent of the probe timeout
const GEO_TIMEOUT: Duration = Duration::from_secs(5);

/// Geographic information for an egress IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
}

impl GeoInfo {
    /// Short display string, `"City, Country"` down to `"Unknown"`
    pub fn short_display(&self) -> String {
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => format!("{}, {}", city, country),
            (None, Some(country)) => country.clone(),
            (Some(city), None) => city.clone(),
            (None, None) => String::from("Unknown"),
        }
    }
}

/// Geo-IP lookup capability, injectable so tests can stub it out
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Resolve country/city for an IP. `None` on any failure.
    async fn lookup(&self, ip: &str) -> Option<GeoInfo>;
}

/// Response shape of the geo service: `{"status": "success", "country": ..., "city": ...}`
#[derive(Debug, Deserialize)]
struct GeoResponse {
    status: String,
    country: Option<String>,
    city: Option<String>,
}

/// [`GeoLookup`] backed by an ip-api.com compatible HTTP endpoint
pub struct HttpGeoClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoClient {
    /// `base_url` is the service root, e.g. `http://ip-api.com/json`; the IP
    /// is appended as a path segment.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn lookup_url(&self, ip: &str) -> String {
        format!(
            "{}/{}?fields=status,country,city",
            self.base_url.trim_end_matches('/'),
            ip
        )
    }
}

#[async_trait]
impl GeoLookup for HttpGeoClient {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        // Refuse to interpolate non-IP text into the lookup URL
        if ip.parse::<IpAddr>().is_err() {
            return None;
        }

        let response = self
            .client
            .get(self.lookup_url(ip))
            .timeout(GEO_TIMEOUT)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            log::debug!("geo lookup for {} returned HTTP {}", ip, response.status());
            return None;
        }

        let body = response.text().await.ok()?;
        let geo: GeoResponse = serde_json::from_str(&body).ok()?;
        if geo.status != "success" {
            log::debug!("geo lookup for {} reported status {:?}", ip, geo.status);
            return None;
        }

        Some(GeoInfo {
            country: geo.country,
            city: geo.city,
        })
    }
}
