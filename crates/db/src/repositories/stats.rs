use chrono::NaiveDate;
use sqlx::Row;

use super::{RepositoryError, StatsDelta, StatsStore};
use crate::DbPool;

pub struct SqlStatsStore {
    pool: DbPool,
}

impl SqlStatsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StatsStore for SqlStatsStore {
    async fn record(&self, day: NaiveDate, delta: StatsDelta) -> Result<(), RepositoryError> {
        let day_key = day.format("%Y-%m-%d").to_string();
        let mut conn = self.pool.acquire().await?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = async {
            let existing = sqlx::query(
                "SELECT messages_responded, avg_response_ms FROM daily_stats WHERE day = ?",
            )
            .bind(&day_key)
            .fetch_optional(&mut *conn)
            .await?;

            // Running average over responded messages, matching how the
            // weekly report interprets the column.
            let (responded_before, avg_before) = match &existing {
                Some(row) => (
                    row.try_get::<i64, _>("messages_responded")?,
                    row.try_get::<Option<f64>, _>("avg_response_ms")?,
                ),
                None => (0, None),
            };

            let avg_after = match delta.response_time_ms {
                Some(sample) => {
                    let total = responded_before + i64::from(delta.messages_responded);
                    match avg_before {
                        Some(avg) if total > 0 => {
                            Some((avg * (total - 1) as f64 + sample) / total as f64)
                        }
                        _ => Some(sample),
                    }
                }
                None => avg_before,
            };

            sqlx::query(
                "INSERT INTO daily_stats (
                    day, messages_received, messages_responded, bookings_created,
                    bookings_updated, bookings_cancelled, human_handoffs, errors, avg_response_ms
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(day) DO UPDATE SET
                    messages_received = messages_received + excluded.messages_received,
                    messages_responded = messages_responded + excluded.messages_responded,
                    bookings_created = bookings_created + excluded.bookings_created,
                    bookings_updated = bookings_updated + excluded.bookings_updated,
                    bookings_cancelled = bookings_cancelled + excluded.bookings_cancelled,
                    human_handoffs = human_handoffs + excluded.human_handoffs,
                    errors = errors + excluded.errors,
                    avg_response_ms = ?",
            )
            .bind(&day_key)
            .bind(i64::from(delta.messages_received))
            .bind(i64::from(delta.messages_responded))
            .bind(i64::from(delta.bookings_created))
            .bind(i64::from(delta.bookings_updated))
            .bind(i64::from(delta.bookings_cancelled))
            .bind(i64::from(delta.human_handoffs))
            .bind(i64::from(delta.errors))
            .bind(avg_after)
            .bind(avg_after)
            .execute(&mut *conn)
            .await?;

            Ok(())
        }
        .await;

        match &result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(_) => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sqlx::Row;

    use super::SqlStatsStore;
    use crate::migrations;
    use crate::repositories::{StatsDelta, StatsStore};
    use crate::connect_with_settings;

    #[tokio::test]
    async fn deltas_accumulate_per_day() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = SqlStatsStore::new(pool.clone());
        let day = NaiveDate::from_ymd_opt(2026, 4, 12).expect("valid date");

        store
            .record(day, StatsDelta { messages_received: 3, ..StatsDelta::default() })
            .await
            .expect("record");
        store
            .record(
                day,
                StatsDelta {
                    messages_received: 1,
                    messages_responded: 1,
                    bookings_created: 1,
                    response_time_ms: Some(820.0),
                    ..StatsDelta::default()
                },
            )
            .await
            .expect("record");

        let row = sqlx::query(
            "SELECT messages_received, messages_responded, bookings_created, avg_response_ms
             FROM daily_stats WHERE day = '2026-04-12'",
        )
        .fetch_one(&pool)
        .await
        .expect("row");

        assert_eq!(row.get::<i64, _>("messages_received"), 4);
        assert_eq!(row.get::<i64, _>("messages_responded"), 1);
        assert_eq!(row.get::<i64, _>("bookings_created"), 1);
        assert_eq!(row.get::<Option<f64>, _>("avg_response_ms"), Some(820.0));

        pool.close().await;
    }

    #[tokio::test]
    async fn response_time_keeps_a_running_average() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = SqlStatsStore::new(pool.clone());
        let day = NaiveDate::from_ymd_opt(2026, 4, 13).expect("valid date");

        store
            .record(
                day,
                StatsDelta {
                    messages_responded: 1,
                    response_time_ms: Some(400.0),
                    ..StatsDelta::default()
                },
            )
            .await
            .expect("record");
        store
            .record(
                day,
                StatsDelta {
                    messages_responded: 1,
                    response_time_ms: Some(800.0),
                    ..StatsDelta::default()
                },
            )
            .await
            .expect("record");

        let avg = sqlx::query("SELECT avg_response_ms FROM daily_stats WHERE day = '2026-04-13'")
            .fetch_one(&pool)
            .await
            .expect("row")
            .get::<Option<f64>, _>("avg_response_ms")
            .expect("average present");
        assert!((avg - 600.0).abs() < f64::EPSILON, "running average of 400 and 800 is 600");

        pool.close().await;
    }
}
