//! Stale-proxy refresh sweep
//!
//! Re-tests every stored proxy whose last check is older than a threshold
//! (or that was never checked), persists each outcome, and optionally drops
//! proxies that came back dead. This is the orchestration layer around the
//! one-shot [`ProxyTester`]; the tester itself knows nothing about stores,
//! staleness, or batching.

use crate::database::ProxyStore;
use crate::proxy::models::{ProxyStatus, ProxyTestResult};
use crate::proxy::tester::ProxyTester;
use crate::proxy::validator;
use crate::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default number of proxies tested at once
const DEFAULT_CONCURRENCY: usize = 10;

/// Default staleness threshold matching a daily check cadence
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Sweep behavior knobs
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How many proxies to test concurrently
    pub concurrency: usize,
    /// Re-test proxies last checked longer ago than this
    pub max_age: Duration,
    /// Delete proxies that test dead once the sweep finishes
    pub remove_dead: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_age: DEFAULT_MAX_AGE,
            remove_dead: false,
        }
    }
}

impl SweepConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_remove_dead(mut self, remove_dead: bool) -> Self {
        self.remove_dead = remove_dead;
        self
    }
}

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub live: usize,
    pub dead: usize,
    pub removed: u64,
}

/// Run one sweep: test all stale records, persist results, prune dead ones
/// when configured.
pub async fn run(
    store: &ProxyStore,
    tester: &ProxyTester,
    config: &SweepConfig,
) -> Result<SweepSummary> {
    let stale = store.stale(config.max_age).await?;
    if stale.is_empty() {
        log::info!("sweep: no stale proxies");
        return Ok(SweepSummary::default());
    }

    log::info!(
        "sweep: checking {} stale proxies, concurrency {}",
        stale.len(),
        config.concurrency
    );

    let semaphore = Arc::new(Semaphore::new(config.concurrency));

    let results: Vec<(String, ProxyTestResult)> = stream::iter(stale)
        .map(|record| {
            let sem = Arc::clone(&semaphore);
            async move {
                // Acquire only fails if the semaphore is closed, and we hold
                // the Arc open for the whole sweep.
                let _permit = sem.acquire().await.expect("semaphore closed");
                let result = tester.test(&record.proxy).await;
                (record, result)
            }
        })
        .buffer_unordered(config.concurrency)
        .map(|(record, result)| {
            match result.status {
                ProxyStatus::Live => log::info!(
                    "sweep: {} live, {}ms, ip {}",
                    record.masked(),
                    result.latency_ms.unwrap_or_default(),
                    result.egress_ip.as_deref().unwrap_or("unknown")
                ),
                ProxyStatus::Dead => log::info!(
                    "sweep: {} dead: {}",
                    record.masked(),
                    result.error.as_deref().unwrap_or("unknown error")
                ),
            }
            (record.id, result)
        })
        .collect()
        .await;

    let mut summary = SweepSummary::default();
    for (id, result) in &results {
        store.apply_test_result(id, result).await?;
        summary.checked += 1;
        if result.is_live() {
            summary.live += 1;
        } else {
            summary.dead += 1;
        }
    }

    if config.remove_dead && summary.dead > 0 {
        summary.removed = store.remove_dead().await?;
        log::info!("sweep: removed {} dead proxies", summary.removed);
    }

    log::info!(
        "sweep: done, {} checked, {} live, {} dead",
        summary.checked,
        summary.live,
        summary.dead
    );

    Ok(summary)
}

/// Test a batch of raw proxy lines concurrently without touching a store.
/// Lines that fail validation come back as dead results, matching the
/// tester's own semantics. Blank lines and `#` comments are skipped.
pub async fn test_batch(
    tester: &ProxyTester,
    lines: &[String],
    concurrency: usize,
) -> Vec<(String, ProxyTestResult)> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let candidates: Vec<String> = lines
        .iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    stream::iter(candidates)
        .map(|raw| {
            let sem = Arc::clone(&semaphore);
            async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let result = tester.test(&raw).await;
                log::debug!("batch: {} -> {}", validator::mask(&raw), result.status);
                (raw, result)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await
}
