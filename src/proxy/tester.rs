//! Live proxy testing
//!
//! A test is one probe: route a GET through the candidate proxy to an echo
//! endpoint that reports the caller's apparent IP, classify the outcome, and
//! enrich live results with best-effort geolocation. Anticipated failures
//! (bad input, dead proxy, unreachable geo service) become data on the
//! returned [`ProxyTestResult`], never errors. Retries and scheduling are the
//! caller's concern; see [`crate::proxy::sweep`].

use crate::proxy::geo::{GeoLookup, HttpGeoClient};
use crate::proxy::models::{ProxyEndpoint, ProxyTestResult};
use crate::proxy::validator;
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default timeout for the probe request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default echo endpoint reporting the caller's IP as JSON
const DEFAULT_ECHO_URL: &str = "https://api.ipify.org?format=json";

/// Field of the echo response that carries the caller's IP
const DEFAULT_IP_FIELD: &str = "ip";

/// Default geo lookup service root
const DEFAULT_GEO_URL: &str = "http://ip-api.com/json";

/// Connect phase cap: never wait longer than this to establish the tunnel
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the proxy tester.
///
/// Endpoint URLs and the IP field name are configuration, not business
/// logic; the defaults match the ipify + ip-api pair.
#[derive(Debug, Clone)]
pub struct TesterConfig {
    /// URL of the echo service the probe is sent to
    pub echo_url: String,
    /// JSON field of the echo response holding the egress IP
    pub ip_field: String,
    /// Root URL of the geo lookup service
    pub geo_url: String,
    /// Timeout applied to the probe's connect and total phases
    pub timeout: Duration,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            echo_url: DEFAULT_ECHO_URL.to_string(),
            ip_field: DEFAULT_IP_FIELD.to_string(),
            geo_url: DEFAULT_GEO_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl TesterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo_url(mut self, url: impl Into<String>) -> Self {
        self.echo_url = url.into();
        self
    }

    pub fn with_ip_field(mut self, field: impl Into<String>) -> Self {
        self.ip_field = field.into();
        self
    }

    pub fn with_geo_url(mut self, url: impl Into<String>) -> Self {
        self.geo_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Successful HTTP exchange through the proxy, before classification
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub http_status: u16,
    pub body: String,
}

/// Network-level probe failure (DNS, connect, TLS, timeout)
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        ProbeError(err.to_string())
    }
}

/// HTTP probe capability: one GET routed through the given proxy
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        proxy: &ProxyEndpoint,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError>;
}

/// [`ProbeClient`] backed by reqwest. Builds a fresh client per call since
/// the proxy differs on every invocation.
pub struct HttpProbeClient;

#[async_trait]
impl ProbeClient for HttpProbeClient {
    async fn fetch(
        &self,
        url: &str,
        proxy: &ProxyEndpoint,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        let mut reqwest_proxy = ReqwestProxy::all(format!("http://{}", proxy.authority()))?;
        if let Some(auth) = &proxy.auth {
            reqwest_proxy = reqwest_proxy.basic_auth(&auth.username, &auth.password);
        }

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let response = client.get(url).send().await?;
        let http_status = response.status().as_u16();
        let body = response.text().await?;

        Ok(ProbeResponse { http_status, body })
    }
}

/// Tests proxies by probing an echo endpoint through them
pub struct ProxyTester {
    config: TesterConfig,
    probe: Arc<dyn ProbeClient>,
    geo: Arc<dyn GeoLookup>,
}

impl ProxyTester {
    /// Tester with the real HTTP probe and geo clients
    pub fn new(config: TesterConfig) -> Self {
        let geo = Arc::new(HttpGeoClient::new(config.geo_url.clone()));
        Self {
            config,
            probe: Arc::new(HttpProbeClient),
            geo,
        }
    }

    /// Tester with injected capabilities, used by tests and embedders that
    /// bring their own HTTP stack
    pub fn with_capabilities(
        config: TesterConfig,
        probe: Arc<dyn ProbeClient>,
        geo: Arc<dyn GeoLookup>,
    ) -> Self {
        Self { config, probe, geo }
    }

    /// Test a raw proxy string with the configured timeout.
    ///
    /// Exactly one probe attempt, no retries. Invalid input short-circuits
    /// to a dead result without touching the network.
    pub async fn test(&self, raw: &str) -> ProxyTestResult {
        self.test_with_timeout(raw, self.config.timeout).await
    }

    /// Test with an explicit timeout, overriding the configured one
    pub async fn test_with_timeout(&self, raw: &str, timeout: Duration) -> ProxyTestResult {
        let endpoint = match validator::validate(raw) {
            Ok(endpoint) => endpoint,
            Err(err) => return ProxyTestResult::rejected(err.to_string()),
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            self.probe.fetch(&self.config.echo_url, &endpoint, timeout),
        )
        .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return ProxyTestResult::dead(err.to_string(), latency_ms),
            Err(_) => {
                return ProxyTestResult::dead(
                    format!("Timed out after {:.1}s", timeout.as_secs_f32()),
                    latency_ms,
                )
            }
        };

        if !(200..400).contains(&response.http_status) {
            return ProxyTestResult::dead(format!("HTTP {}", response.http_status), latency_ms);
        }

        let egress_ip = match extract_ip(&response.body, &self.config.ip_field) {
            Some(ip) => ip,
            None => return ProxyTestResult::dead("Invalid response".to_string(), latency_ms),
        };

        let mut result = ProxyTestResult::live(egress_ip.clone(), latency_ms);
        if let Some(geo) = self.geo.lookup(&egress_ip).await {
            result.country = geo.country;
            result.city = geo.city;
        }

        result
    }
}

/// Pull the egress IP out of the echo response body. Some echo services
/// return comma-separated addresses when X-Forwarded-For chains apply; the
/// first entry is the one that matters.
fn extract_ip(body: &str, ip_field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let raw = value.get(ip_field)?.as_str()?;

    let first = raw.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }

    Some(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::geo::GeoInfo;
    use crate::proxy::models::ProxyStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe stub returning a canned outcome and counting invocations
    struct StubProbe {
        outcome: Result<ProbeResponse, String>,
        calls: AtomicUsize,
    }

    impl StubProbe {
        fn ok(http_status: u16, body: &str) -> Self {
            Self {
                outcome: Ok(ProbeResponse {
                    http_status,
                    body: body.to_string(),
                }),
                calls: AtomicUsize::new(0),
            }
        }

        fn err(message: &str) -> Self {
            Self {
                outcome: Err(message.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProbeClient for StubProbe {
        async fn fetch(
            &self,
            _url: &str,
            _proxy: &ProxyEndpoint,
            _timeout: Duration,
        ) -> Result<ProbeResponse, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
                .as_ref()
                .map(|r| r.clone())
                .map_err(|e| ProbeError(e.clone()))
        }
    }

    /// Probe stub that outlives any timeout a test would configure
    struct HangingProbe;

    #[async_trait]
    impl ProbeClient for HangingProbe {
        async fn fetch(
            &self,
            _url: &str,
            _proxy: &ProxyEndpoint,
            _timeout: Duration,
        ) -> Result<ProbeResponse, ProbeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ProbeResponse {
                http_status: 200,
                body: r#"{"ip": "203.0.113.5"}"#.to_string(),
            })
        }
    }

    /// Geo stub returning a fixed answer
    struct StubGeo(Option<GeoInfo>);

    #[async_trait]
    impl GeoLookup for StubGeo {
        async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
            self.0.clone()
        }
    }

    fn tester(probe: Arc<StubProbe>, geo: Option<GeoInfo>) -> ProxyTester {
        ProxyTester::with_capabilities(TesterConfig::default(), probe, Arc::new(StubGeo(geo)))
    }

    #[tokio::test]
    async fn test_invalid_input_skips_network() {
        let probe = Arc::new(StubProbe::ok(200, r#"{"ip": "203.0.113.5"}"#));
        let result = tester(Arc::clone(&probe), None).test("not a proxy").await;

        assert_eq!(result.status, ProxyStatus::Dead);
        assert_eq!(result.latency_ms, None);
        assert!(result.error.is_some());
        assert_eq!(probe.call_count(), 0);
    }

    #[tokio::test]
    async fn test_live_proxy() {
        let probe = Arc::new(StubProbe::ok(200, r#"{"ip": "203.0.113.5"}"#));
        let result = tester(probe, None).test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Live);
        assert_eq!(result.egress_ip.as_deref(), Some("203.0.113.5"));
        assert!(result.latency_ms.is_some());
        assert!(result.error.is_none());
        assert_eq!(result.country, None);
    }

    #[tokio::test]
    async fn test_transport_error_is_dead_with_latency() {
        let probe = Arc::new(StubProbe::err("connection refused"));
        let result = tester(probe, None).test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Dead);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_slow_probe_hits_timeout_ceiling() {
        let tester = ProxyTester::with_capabilities(
            TesterConfig::default(),
            Arc::new(HangingProbe),
            Arc::new(StubGeo(None)),
        );
        let result = tester
            .test_with_timeout("1.2.3.4:8080", Duration::from_millis(100))
            .await;

        assert_eq!(result.status, ProxyStatus::Dead);
        assert!(result.latency_ms.is_some());
        assert_eq!(result.error.as_deref(), Some("Timed out after 0.1s"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let probe = Arc::new(StubProbe::ok(502, "bad gateway"));
        let result = tester(probe, None).test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Dead);
        assert_eq!(result.error.as_deref(), Some("HTTP 502"));
    }

    #[tokio::test]
    async fn test_redirect_status_counts_as_live() {
        // 3xx is within the accepted range, but the body must still parse
        let probe = Arc::new(StubProbe::ok(302, r#"{"ip": "203.0.113.5"}"#));
        let result = tester(probe, None).test("1.2.3.4:8080").await;
        assert_eq!(result.status, ProxyStatus::Live);
    }

    #[tokio::test]
    async fn test_body_missing_ip_field() {
        let probe = Arc::new(StubProbe::ok(200, r#"{"origin": "203.0.113.5"}"#));
        let result = tester(probe, None).test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Dead);
        assert_eq!(result.error.as_deref(), Some("Invalid response"));
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_body_not_json() {
        let probe = Arc::new(StubProbe::ok(200, "<html>gateway</html>"));
        let result = tester(probe, None).test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Dead);
        assert_eq!(result.error.as_deref(), Some("Invalid response"));
    }

    #[tokio::test]
    async fn test_geo_enrichment() {
        let probe = Arc::new(StubProbe::ok(200, r#"{"ip": "203.0.113.5"}"#));
        let geo = GeoInfo {
            country: Some("Germany".to_string()),
            city: Some("Berlin".to_string()),
        };
        let result = tester(probe, Some(geo)).test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Live);
        assert_eq!(result.country.as_deref(), Some("Germany"));
        assert_eq!(result.city.as_deref(), Some("Berlin"));
    }

    #[tokio::test]
    async fn test_geo_failure_never_kills_live_result() {
        let probe = Arc::new(StubProbe::ok(200, r#"{"ip": "203.0.113.5"}"#));
        let result = tester(probe, None).test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Live);
        assert_eq!(result.country, None);
        assert_eq!(result.city, None);
    }

    #[tokio::test]
    async fn test_comma_separated_egress_ip() {
        let probe = Arc::new(StubProbe::ok(200, r#"{"ip": "203.0.113.5, 10.0.0.1"}"#));
        let result = tester(probe, None).test("1.2.3.4:8080").await;

        assert_eq!(result.egress_ip.as_deref(), Some("203.0.113.5"));
    }

    #[tokio::test]
    async fn test_configured_ip_field() {
        let config = TesterConfig::new().with_ip_field("origin");
        let probe = Arc::new(StubProbe::ok(200, r#"{"origin": "203.0.113.5"}"#));
        let tester = ProxyTester::with_capabilities(config, probe, Arc::new(StubGeo(None)));
        let result = tester.test("1.2.3.4:8080").await;

        assert_eq!(result.status, ProxyStatus::Live);
        assert_eq!(result.egress_ip.as_deref(), Some("203.0.113.5"));
    }

    #[tokio::test]
    async fn test_idempotent_with_same_collaborators() {
        let probe = Arc::new(StubProbe::ok(200, r#"{"ip": "203.0.113.5"}"#));
        let geo = GeoInfo {
            country: Some("Germany".to_string()),
            city: None,
        };
        let tester = tester(probe, Some(geo));

        let first = tester.test("1.2.3.4:8080").await;
        let second = tester.test("1.2.3.4:8080").await;

        assert_eq!(first.status, second.status);
        assert_eq!(first.egress_ip, second.egress_ip);
        assert_eq!(first.country, second.country);
    }

    #[test]
    fn test_extract_ip() {
        assert_eq!(
            extract_ip(r#"{"ip": "1.2.3.4"}"#, "ip"),
            Some("1.2.3.4".to_string())
        );
        assert_eq!(extract_ip(r#"{"ip": 42}"#, "ip"), None);
        assert_eq!(extract_ip(r#"{"ip": ""}"#, "ip"), None);
        assert_eq!(extract_ip("not json", "ip"), None);
    }

    #[test]
    fn test_config_builder() {
        let config = TesterConfig::new()
            .with_echo_url("http://httpbin.org/ip")
            .with_ip_field("origin")
            .with_timeout(Duration::from_secs(30));

        assert_eq!(config.echo_url, "http://httpbin.org/ip");
        assert_eq!(config.ip_field, "origin");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
