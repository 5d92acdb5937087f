//! Proxy validation, testing, and health sweeps
//!
//! This module provides functionality for:
//! - Validating proxy strings (HOST:PORT or HOST:PORT:USER:PASS) without I/O
//! - Masking credentials for safe display
//! - Live-testing a proxy against an echo endpoint and classifying the result
//! - Geo-resolving the egress IP as best-effort enrichment
//! - Sweeping stale stored proxies on a schedule driven by the caller

pub mod geo;
pub mod models;
pub mod sweep;
pub mod tester;
pub mod validator;

pub use geo::{GeoInfo, GeoLookup, HttpGeoClient};
pub use models::{
    ProxyAuth, ProxyEndpoint, ProxyStatus, ProxyTestResult, ValidationError,
};
pub use sweep::{SweepConfig, SweepSummary};
pub use tester::{HttpProbeClient, ProbeClient, ProbeError, ProbeResponse, ProxyTester, TesterConfig};
pub use validator::{mask, validate};
