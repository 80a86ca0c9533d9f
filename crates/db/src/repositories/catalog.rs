use std::collections::HashMap;

use chrono::NaiveTime;
use sqlx::{sqlite::SqliteRow, Row};

use citabot_core::domain::catalog::{
    AvailabilityBlock, Provider, ProviderId, Service, ServiceId, Weekday,
};

use super::{parse_decimal, CatalogStore, RepositoryError};
use crate::DbPool;

pub struct SqlCatalogStore {
    pool: DbPool,
}

impl SqlCatalogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn rosters(&self) -> Result<HashMap<String, Vec<ProviderId>>, RepositoryError> {
        let rows = sqlx::query("SELECT service_id, provider_id FROM service_provider")
            .fetch_all(&self.pool)
            .await?;

        let mut rosters: HashMap<String, Vec<ProviderId>> = HashMap::new();
        for row in rows {
            let service_id = row.try_get::<String, _>("service_id")?;
            let provider_id = ProviderId(row.try_get("provider_id")?);
            rosters.entry(service_id).or_default().push(provider_id);
        }
        Ok(rosters)
    }

    async fn schedules(&self) -> Result<HashMap<String, Vec<AvailabilityBlock>>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT provider_id, weekday, start_time, end_time FROM provider_schedule
             ORDER BY provider_id, id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut schedules: HashMap<String, Vec<AvailabilityBlock>> = HashMap::new();
        for row in rows {
            let provider_id = row.try_get::<String, _>("provider_id")?;
            schedules.entry(provider_id).or_default().push(block_from_row(&row)?);
        }
        Ok(schedules)
    }

    async fn provider_from_partial_row(
        &self,
        row: SqliteRow,
    ) -> Result<Provider, RepositoryError> {
        let id = row.try_get::<String, _>("id")?;
        let schedule_rows = sqlx::query(
            "SELECT provider_id, weekday, start_time, end_time FROM provider_schedule
             WHERE provider_id = ?
             ORDER BY id",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let schedule =
            schedule_rows.iter().map(block_from_row).collect::<Result<Vec<_>, _>>()?;
        provider_from_row(row, schedule)
    }
}

#[async_trait::async_trait]
impl CatalogStore for SqlCatalogStore {
    async fn list_services(&self) -> Result<Vec<Service>, RepositoryError> {
        let rosters = self.rosters().await?;
        let rows = sqlx::query(
            "SELECT id, name, description, price, duration_minutes, active FROM service
             WHERE active = 1
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id = row.try_get::<String, _>("id")?;
                let roster = rosters.get(&id).cloned().unwrap_or_default();
                service_from_row(row, roster)
            })
            .collect()
    }

    async fn find_service_by_name(&self, name: &str) -> Result<Option<Service>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, price, duration_minutes, active FROM service
             WHERE active = 1 AND name LIKE '%' || ? || '%' COLLATE NOCASE
             ORDER BY name
             LIMIT 1",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id = row.try_get::<String, _>("id")?;
        let roster_rows =
            sqlx::query("SELECT provider_id FROM service_provider WHERE service_id = ?")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?;
        let roster = roster_rows
            .into_iter()
            .map(|row| Ok(ProviderId(row.try_get("provider_id")?)))
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Some(service_from_row(row, roster)?))
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, RepositoryError> {
        let schedules = self.schedules().await?;
        let rows = sqlx::query(
            "SELECT id, name, phone, specialties, active FROM provider
             WHERE active = 1
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id = row.try_get::<String, _>("id")?;
                let schedule = schedules.get(&id).cloned().unwrap_or_default();
                provider_from_row(row, schedule)
            })
            .collect()
    }

    async fn find_provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, phone, specialties, active FROM provider
             WHERE active = 1 AND id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.provider_from_partial_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_provider_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Provider>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, phone, specialties, active FROM provider
             WHERE active = 1 AND name LIKE '%' || ? || '%' COLLATE NOCASE
             ORDER BY name
             LIMIT 1",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.provider_from_partial_row(row).await?)),
            None => Ok(None),
        }
    }
}

fn service_from_row(row: SqliteRow, roster: Vec<ProviderId>) -> Result<Service, RepositoryError> {
    Ok(Service {
        id: ServiceId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: parse_decimal("price", row.try_get("price")?)?,
        duration_minutes: u32::try_from(row.try_get::<i64, _>("duration_minutes")?)
            .map_err(|_| RepositoryError::Decode("negative service duration".to_string()))?,
        eligible_providers: roster,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

fn provider_from_row(
    row: SqliteRow,
    schedule: Vec<AvailabilityBlock>,
) -> Result<Provider, RepositoryError> {
    let specialties_raw = row.try_get::<String, _>("specialties")?;
    let specialties: Vec<String> = serde_json::from_str(&specialties_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid specialties payload `{specialties_raw}`: {error}"))
    })?;

    Ok(Provider {
        id: ProviderId(row.try_get("id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        specialties,
        schedule,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

fn block_from_row(row: &SqliteRow) -> Result<AvailabilityBlock, RepositoryError> {
    let weekday_raw = row.try_get::<String, _>("weekday")?;
    let weekday = Weekday::parse(&weekday_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown weekday `{weekday_raw}`")))?;

    Ok(AvailabilityBlock {
        weekday,
        start: parse_time("start_time", row.try_get("start_time")?)?,
        end: parse_time("end_time", row.try_get("end_time")?)?,
    })
}

fn parse_time(column: &str, value: String) -> Result<NaiveTime, RepositoryError> {
    NaiveTime::parse_from_str(&value, "%H:%M").map_err(|error| {
        RepositoryError::Decode(format!("invalid time in `{column}`: `{value}` ({error})"))
    })
}
