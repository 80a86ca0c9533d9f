use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use citabot_core::domain::booking::{Booking, BookingId, BookingStatus};
use citabot_core::domain::catalog::{ProviderId, ServiceId};
use citabot_core::interval::TimeSlot;

use super::{
    parse_decimal, parse_timestamp, phone_suffix, ts, BookingStore, CommitOutcome, RepositoryError,
};
use crate::DbPool;

const BOOKING_COLUMNS: &str = "id, client_phone, client_name, provider_id, services, start_at, \
     end_at, total_price, external_event_ref, status, notes, created_at, updated_at";

pub struct SqlBookingStore {
    pool: DbPool,
}

impl SqlBookingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Count active bookings for the provider whose `[start, end)` interval
    /// intersects the given one, optionally excluding one booking id.
    async fn overlap_count(
        executor: &mut sqlx::SqliteConnection,
        provider_id: &ProviderId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<&BookingId>,
    ) -> Result<i64, RepositoryError> {
        let count: i64 = if let Some(exclude) = exclude {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM booking
                 WHERE provider_id = ?
                   AND status IN ('pending', 'confirmed')
                   AND start_at < ?
                   AND ? < end_at
                   AND id != ?",
            )
            .bind(&provider_id.0)
            .bind(ts(end))
            .bind(ts(start))
            .bind(&exclude.0)
            .fetch_one(&mut *executor)
            .await?
        } else {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM booking
                 WHERE provider_id = ?
                   AND status IN ('pending', 'confirmed')
                   AND start_at < ?
                   AND ? < end_at",
            )
            .bind(&provider_id.0)
            .bind(ts(end))
            .bind(ts(start))
            .fetch_one(&mut *executor)
            .await?
        };

        Ok(count)
    }
}

#[async_trait::async_trait]
impl BookingStore for SqlBookingStore {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(booking_from_row).transpose()
    }

    async fn insert_if_free(&self, booking: &Booking) -> Result<CommitOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        // BEGIN IMMEDIATE takes the write lock before the overlap re-check,
        // closing the check-then-insert gap against concurrent writers.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let outcome = async {
            let overlapping = Self::overlap_count(
                &mut conn,
                &booking.provider_id,
                booking.start,
                booking.end,
                None,
            )
            .await?;

            if overlapping > 0 {
                return Ok(CommitOutcome::Conflict);
            }

            sqlx::query(
                "INSERT INTO booking (
                    id, client_phone, client_name, provider_id, services, start_at, end_at,
                    total_price, external_event_ref, status, notes, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&booking.id.0)
            .bind(&booking.client_phone)
            .bind(&booking.client_name)
            .bind(&booking.provider_id.0)
            .bind(encode_services(&booking.services))
            .bind(ts(booking.start))
            .bind(ts(booking.end))
            .bind(booking.total_price.to_string())
            .bind(booking.external_event_ref.as_deref())
            .bind(booking.status.as_str())
            .bind(booking.notes.as_deref())
            .bind(ts(booking.created_at))
            .bind(ts(booking.updated_at))
            .execute(&mut *conn)
            .await?;

            Ok(CommitOutcome::Committed)
        }
        .await;

        match &outcome {
            Ok(CommitOutcome::Committed) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            _ => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            }
        }

        outcome
    }

    async fn reschedule_if_free(
        &self,
        booking: &Booking,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let outcome = async {
            let overlapping = Self::overlap_count(
                &mut conn,
                &booking.provider_id,
                booking.start,
                booking.end,
                Some(&booking.id),
            )
            .await?;

            if overlapping > 0 {
                return Ok(CommitOutcome::Conflict);
            }

            sqlx::query(
                "UPDATE booking SET
                    client_name = ?,
                    provider_id = ?,
                    services = ?,
                    start_at = ?,
                    end_at = ?,
                    total_price = ?,
                    notes = ?,
                    updated_at = ?
                 WHERE id = ?",
            )
            .bind(&booking.client_name)
            .bind(&booking.provider_id.0)
            .bind(encode_services(&booking.services))
            .bind(ts(booking.start))
            .bind(ts(booking.end))
            .bind(booking.total_price.to_string())
            .bind(booking.notes.as_deref())
            .bind(ts(booking.updated_at))
            .bind(&booking.id.0)
            .execute(&mut *conn)
            .await?;

            Ok(CommitOutcome::Committed)
        }
        .await;

        match &outcome {
            Ok(CommitOutcome::Committed) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            _ => {
                sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            }
        }

        outcome
    }

    async fn set_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
        external_event_ref: Option<&str>,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE booking SET
                status = ?,
                external_event_ref = COALESCE(?, external_event_ref),
                notes = COALESCE(?, notes),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(external_event_ref)
        .bind(notes)
        .bind(ts(now))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn active_for_provider(
        &self,
        provider_id: &ProviderId,
        window: &TimeSlot,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE provider_id = ?
               AND status IN ('pending', 'confirmed')
               AND start_at < ?
               AND ? < end_at
             ORDER BY start_at ASC"
        ))
        .bind(&provider_id.0)
        .bind(ts(window.end))
        .bind(ts(window.start))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }

    async fn next_active_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE client_phone LIKE '%' || ?
               AND status IN ('pending', 'confirmed')
               AND start_at > ?
             ORDER BY start_at ASC
             LIMIT 1"
        ))
        .bind(phone_suffix(phone))
        .bind(ts(now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(booking_from_row).transpose()
    }

    async fn upcoming_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE client_phone LIKE '%' || ?
               AND status IN ('pending', 'confirmed')
               AND start_at > ?
             ORDER BY start_at ASC"
        ))
        .bind(phone_suffix(phone))
        .bind(ts(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }

    async fn past_for_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE client_phone LIKE '%' || ?
               AND start_at <= ?
             ORDER BY start_at DESC
             LIMIT ?"
        ))
        .bind(phone_suffix(phone))
        .bind(ts(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }
}

fn encode_services(services: &[ServiceId]) -> String {
    let names: Vec<&str> = services.iter().map(|id| id.0.as_str()).collect();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

fn decode_services(raw: &str) -> Result<Vec<ServiceId>, RepositoryError> {
    let names: Vec<String> = serde_json::from_str(raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid services payload `{raw}`: {error}"))
    })?;
    Ok(names.into_iter().map(ServiceId).collect())
}

fn booking_from_row(row: SqliteRow) -> Result<Booking, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = BookingStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{status_raw}`")))?;

    Ok(Booking {
        id: BookingId(row.try_get("id")?),
        client_phone: row.try_get("client_phone")?,
        client_name: row.try_get("client_name")?,
        provider_id: ProviderId(row.try_get("provider_id")?),
        services: decode_services(&row.try_get::<String, _>("services")?)?,
        start: parse_timestamp("start_at", row.try_get("start_at")?)?,
        end: parse_timestamp("end_at", row.try_get("end_at")?)?,
        total_price: parse_decimal("total_price", row.try_get("total_price")?)?,
        external_event_ref: row.try_get("external_event_ref")?,
        status,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
