//! Daily request quota tracking.
//!
//! Counters live in SQLite keyed by `(user_id, date)`, so limits survive
//! restarts and roll over naturally at midnight UTC. Admission checks never
//! charge; the caller increments only once it accepts the request.

use crate::error::Result;
use crate::store::Store;
use chrono::{NaiveDate, Utc};
use rusqlite::params;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaVerdict {
    /// False once the day's ceiling is reached.
    pub allowed: bool,
    /// Requests already charged today.
    pub current: u32,
    /// Remaining-quota notice once inside the warning band.
    pub warning: Option<String>,
}

/// Per-user, per-day request counter with a hard ceiling and a warning band.
pub struct QuotaTracker {
    store: Store,
    daily_limit: u32,
    warning_threshold: u32,
}

impl QuotaTracker {
    /// Create the tracker, preparing its table.
    pub fn new(store: Store, daily_limit: u32, warning_threshold: u32) -> anyhow::Result<Self> {
        let conn = store.connect()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS usage_daily (
                user_id  INTEGER NOT NULL,
                date     TEXT NOT NULL,
                requests INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, date)
            );
            ",
        )?;

        Ok(Self {
            store,
            daily_limit,
            warning_threshold,
        })
    }

    /// Check whether one more request is admissible today.
    pub async fn check(&self, user_id: i64, day: NaiveDate) -> Result<QuotaVerdict> {
        let current = self.usage(user_id, day).await?;

        if current >= self.daily_limit {
            return Ok(QuotaVerdict {
                allowed: false,
                current,
                warning: None,
            });
        }

        let warning = if current >= self.warning_threshold {
            let remaining = self.daily_limit - current;
            Some(format!(
                "⚠️ {remaining} of {} requests left for today",
                self.daily_limit
            ))
        } else {
            None
        };

        Ok(QuotaVerdict {
            allowed: true,
            current,
            warning,
        })
    }

    /// Requests charged to `user_id` on `day`; zero when no record exists.
    pub async fn usage(&self, user_id: i64, day: NaiveDate) -> Result<u32> {
        let date = day.format("%Y-%m-%d").to_string();
        self.store
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT requests FROM usage_daily WHERE user_id = ?1 AND date = ?2",
                    params![user_id, date],
                    |row| row.get(0),
                );
                match result {
                    Ok(requests) => Ok(requests),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Charge one request and return the post-increment count.
    pub async fn increment(&self, user_id: i64, day: NaiveDate) -> Result<u32> {
        let date = day.format("%Y-%m-%d").to_string();
        self.store
            .call(move |conn| {
                conn.query_row(
                    r"
                    INSERT INTO usage_daily (user_id, date, requests)
                    VALUES (?1, ?2, 1)
                    ON CONFLICT(user_id, date) DO UPDATE SET requests = requests + 1
                    RETURNING requests
                    ",
                    params![user_id, date],
                    |row| row.get(0),
                )
            })
            .await
    }

    /// Today's bucket key. All quota calls use UTC dates.
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }
}
