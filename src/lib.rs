//! Proxy Sentry - Proxy Validation and Health Checking
//!
//! Validates `host:port[:user:pass]` proxy strings, live-tests them through
//! an IP echo endpoint, geo-resolves their egress IPs, and tracks their
//! health in a SQLite store.

pub mod database;
pub mod proxy;

pub use database::{AddOutcome, BulkAddSummary, ProxyRecord, ProxyStore, StoreStats};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
