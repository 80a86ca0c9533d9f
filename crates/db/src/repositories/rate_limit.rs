use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use citabot_core::rate::{RateDecision, RateWindow};

use super::{parse_timestamp, ts, RateLimitStore, RepositoryError};
use crate::DbPool;

pub struct SqlRateLimitStore {
    pool: DbPool,
}

impl SqlRateLimitStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RateLimitStore for SqlRateLimitStore {
    async fn check_and_claim(
        &self,
        sender: &str,
        capacity: u32,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RepositoryError> {
        let window = Duration::seconds(window_secs);
        let mut conn = self.pool.acquire().await?;

        // Single write transaction per check: bootstrap, roll, guarded claim.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = async {
            sqlx::query(
                "INSERT INTO rate_window (sender, window_start, count)
                 VALUES (?, ?, 0)
                 ON CONFLICT(sender) DO NOTHING",
            )
            .bind(sender)
            .bind(ts(now))
            .execute(&mut *conn)
            .await?;

            sqlx::query(
                "UPDATE rate_window SET window_start = ?, count = 0
                 WHERE sender = ? AND window_start <= ?",
            )
            .bind(ts(now))
            .bind(sender)
            .bind(ts(now - window))
            .execute(&mut *conn)
            .await?;

            // The guard in the WHERE clause is the atomic claim: a full
            // window leaves the row untouched and rows_affected at zero.
            let claimed = sqlx::query(
                "UPDATE rate_window SET count = count + 1 WHERE sender = ? AND count < ?",
            )
            .bind(sender)
            .bind(i64::from(capacity))
            .execute(&mut *conn)
            .await?
            .rows_affected()
                == 1;

            let row =
                sqlx::query("SELECT window_start, count FROM rate_window WHERE sender = ?")
                    .bind(sender)
                    .fetch_one(&mut *conn)
                    .await?;

            let window_state = RateWindow {
                sender: sender.to_string(),
                window_start: parse_timestamp("window_start", row.try_get("window_start")?)?,
                count: u32::try_from(row.try_get::<i64, _>("count")?).map_err(|_| {
                    RepositoryError::Decode("rate_window.count is negative".to_string())
                })?,
            };

            Ok(window_state.decision(claimed, capacity, window))
        }
        .await;

        match &result {
            Ok(_) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(_) => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            }
        }

        result
    }
}
