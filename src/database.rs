//! SQLite-backed proxy store
//!
//! The store owns persistence of proxy records and the merge of test results
//! into them; the tester itself never writes here. Records are keyed by a
//! generated id and deduplicated on the raw proxy string.

use crate::proxy::models::{ProxyStatus, ProxyTestResult};
use crate::proxy::validator;
use crate::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

/// Status assigned to a record that has never been tested
pub const STATUS_UNTESTED: &str = "untested";

/// A persisted proxy with its latest known health metadata
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProxyRecord {
    pub id: String,
    pub proxy: String,
    pub label: Option<String>,
    /// `untested`, `live`, or `dead`
    pub status: String,
    pub latency_ms: Option<i64>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub last_error: Option<String>,
    pub check_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ProxyRecord {
    pub fn is_live(&self) -> bool {
        self.status == ProxyStatus::Live.as_str()
    }

    /// Proxy string safe for display and logging
    pub fn masked(&self) -> String {
        validator::mask(&self.proxy)
    }
}

/// Outcome of adding a single proxy
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub record: ProxyRecord,
    /// False when the proxy string was already stored
    pub created: bool,
}

/// Summary of a bulk add
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkAddSummary {
    pub added: usize,
    pub existing: usize,
    pub invalid: usize,
}

/// Aggregate health counts
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: i64,
    pub live: i64,
    pub dead: i64,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Proxy store backed by a SQLite database file
pub struct ProxyStore {
    pool: SqlitePool,
}

impl ProxyStore {
    /// Open (and create if missing) the database at `path`
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS proxies (
                id TEXT PRIMARY KEY,
                proxy TEXT NOT NULL UNIQUE,
                label TEXT,
                status TEXT NOT NULL DEFAULT 'untested',
                latency_ms INTEGER,
                ip_address TEXT,
                country TEXT,
                city TEXT,
                last_error TEXT,
                check_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_check TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Add a proxy, deduplicating on the raw string. Re-adding an existing
    /// proxy updates its label and returns the stored record.
    pub async fn add(&self, raw: &str, label: Option<&str>) -> Result<AddOutcome> {
        let endpoint = validator::validate(raw)?;
        let canonical = endpoint.to_full_string();

        if let Some(existing) = self.get_by_proxy(&canonical).await? {
            if let Some(label) = label {
                sqlx::query("UPDATE proxies SET label = ? WHERE id = ?")
                    .bind(label)
                    .bind(&existing.id)
                    .execute(&self.pool)
                    .await?;
            }
            let record = self
                .get(&existing.id)
                .await?
                .unwrap_or(existing);
            return Ok(AddOutcome {
                record,
                created: false,
            });
        }

        let record = ProxyRecord {
            id: Uuid::new_v4().to_string(),
            proxy: canonical,
            label: label.map(String::from),
            status: STATUS_UNTESTED.to_string(),
            latency_ms: None,
            ip_address: None,
            country: None,
            city: None,
            last_error: None,
            check_count: 0,
            success_count: 0,
            failure_count: 0,
            last_check: None,
            created_at: Utc::now(),
        };

        let insert = sqlx::query(
            r#"
            INSERT INTO proxies (id, proxy, label, status, check_count, success_count, failure_count, created_at)
            VALUES (?, ?, ?, ?, 0, 0, 0, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.proxy)
        .bind(&record.label)
        .bind(&record.status)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        if let Err(err) = insert {
            // A concurrent add of the same proxy string can slip between the
            // lookup above and this insert; the UNIQUE(proxy) constraint
            // catches it and the winner's record is returned instead.
            if is_unique_violation(&err) {
                if let Some(existing) = self.get_by_proxy(&record.proxy).await? {
                    return Ok(AddOutcome {
                        record: existing,
                        created: false,
                    });
                }
            }
            return Err(err.into());
        }

        log::info!("stored proxy {} ({})", record.masked(), record.id);

        Ok(AddOutcome {
            record,
            created: true,
        })
    }

    /// Add many proxies at once, skipping invalid lines instead of failing
    /// the whole batch
    pub async fn add_bulk(
        &self,
        lines: &[String],
        label_prefix: Option<&str>,
    ) -> Result<BulkAddSummary> {
        let mut summary = BulkAddSummary::default();

        for (index, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let label = label_prefix.map(|prefix| format!("{} {}", prefix, index + 1));
            match self.add(trimmed, label.as_deref()).await {
                Ok(outcome) if outcome.created => summary.added += 1,
                Ok(_) => summary.existing += 1,
                Err(err) => {
                    log::warn!("skipping invalid proxy {}: {}", validator::mask(trimmed), err);
                    summary.invalid += 1;
                }
            }
        }

        Ok(summary)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProxyRecord>> {
        let record = sqlx::query_as::<_, ProxyRecord>("SELECT * FROM proxies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get_by_proxy(&self, proxy: &str) -> Result<Option<ProxyRecord>> {
        let record = sqlx::query_as::<_, ProxyRecord>("SELECT * FROM proxies WHERE proxy = ?")
            .bind(proxy)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// List records, optionally filtered by status
    pub async fn list(&self, status: Option<&str>) -> Result<Vec<ProxyRecord>> {
        let records = match status {
            Some(status) => {
                sqlx::query_as::<_, ProxyRecord>(
                    "SELECT * FROM proxies WHERE status = ? ORDER BY created_at",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ProxyRecord>("SELECT * FROM proxies ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records)
    }

    /// Merge one test result into a record: status, latency, egress IP, geo,
    /// and error move over; counters and the check timestamp advance. A live
    /// result clears any previous error.
    pub async fn apply_test_result(&self, id: &str, result: &ProxyTestResult) -> Result<()> {
        let success = i64::from(result.is_live());

        sqlx::query(
            r#"
            UPDATE proxies SET
                status = ?,
                latency_ms = COALESCE(?, latency_ms),
                ip_address = COALESCE(?, ip_address),
                country = COALESCE(?, country),
                city = COALESCE(?, city),
                last_error = ?,
                check_count = check_count + 1,
                success_count = success_count + ?,
                failure_count = failure_count + ?,
                last_check = ?
            WHERE id = ?
            "#,
        )
        .bind(result.status.as_str())
        .bind(result.latency_ms.map(|ms| ms as i64))
        .bind(&result.egress_ip)
        .bind(&result.country)
        .bind(&result.city)
        .bind(&result.error)
        .bind(success)
        .bind(1 - success)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record an out-of-band usage observation (a request the surrounding
    /// system routed through this proxy)
    pub async fn record_usage(&self, id: &str, success: bool, latency_ms: Option<i64>) -> Result<()> {
        let success = i64::from(success);

        sqlx::query(
            r#"
            UPDATE proxies SET
                success_count = success_count + ?,
                failure_count = failure_count + ?,
                latency_ms = COALESCE(?, latency_ms)
            WHERE id = ?
            "#,
        )
        .bind(success)
        .bind(1 - success)
        .bind(latency_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete records by id, returning how many were removed
    pub async fn remove(&self, ids: &[String]) -> Result<u64> {
        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM proxies WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    /// Delete every record currently marked dead
    pub async fn remove_dead(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM proxies WHERE status = ?")
            .bind(ProxyStatus::Dead.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Records due for a re-check: never checked, or last checked before the
    /// staleness cutoff
    pub async fn stale(&self, max_age: std::time::Duration) -> Result<Vec<ProxyRecord>> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::hours(24));

        let records = sqlx::query_as::<_, ProxyRecord>(
            "SELECT * FROM proxies WHERE last_check IS NULL OR last_check < ? ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(status = 'live'), 0) AS live,
                COALESCE(SUM(status = 'dead'), 0) AS dead
            FROM proxies
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total: row.try_get("total")?,
            live: row.try_get("live")?,
            dead: row.try_get("dead")?,
        })
    }
}
