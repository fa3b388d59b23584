use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{ReadingStore, SystemStore};
use crate::{
    db::models::{NewSensorReading, NewSystem, ReadingOrigin, SensorReading, System, SystemPatch},
    error::{Error, Result},
};

const READING_COLUMNS: &str = "id, device_id, soil_moisture, soil_ph, air_temp, humidity, \
                               battery, solar_voltage, origin, recorded_at";

const SYSTEM_COLUMNS: &str = "id, user_id, device_id, name, region, latitude, longitude, \
                              farm_size, crop_type, soil_type, installation_date, notes, \
                              created_at, updated_at";

/// Postgres-backed implementation of both store contracts.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// The `systems.device_id` UNIQUE constraint backs the explicit pre-check, so
/// a registration that races another one still surfaces as a conflict.
fn conflict_or(err: sqlx::Error, device_id: &str) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Conflict(device_id.to_owned())
        }
        _ => Error::Database(err),
    }
}

impl PgStore {
    async fn device_taken(&self, device_id: &str, except: Option<i64>) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM systems
                WHERE device_id = $1
                  AND ($2::bigint IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(device_id)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn append(&self, reading: NewSensorReading) -> Result<SensorReading> {
        let sql = format!(
            r#"
            INSERT INTO sensor_readings
                (device_id, soil_moisture, soil_ph, air_temp, humidity,
                 battery, solar_voltage, origin, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {READING_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, SensorReading>(&sql)
            .bind(&reading.device_id)
            .bind(reading.soil_moisture)
            .bind(reading.soil_ph)
            .bind(reading.air_temp)
            .bind(reading.humidity)
            .bind(reading.battery)
            .bind(reading.solar_voltage)
            .bind(reading.origin)
            .bind(reading.recorded_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn latest(&self, device_id: &str) -> Result<Option<SensorReading>> {
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM sensor_readings
            WHERE device_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, SensorReading>(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn history(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SensorReading>> {
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS}
            FROM sensor_readings
            WHERE device_id   = $1
              AND recorded_at >= $2
            ORDER BY recorded_at DESC, id DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, SensorReading>(&sql)
            .bind(device_id)
            .bind(since)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SystemStore for PgStore {
    async fn insert_system(&self, new: NewSystem) -> Result<System> {
        if self.device_taken(&new.device_id, None).await? {
            return Err(Error::Conflict(new.device_id));
        }
        let sql = format!(
            r#"
            INSERT INTO systems
                (user_id, device_id, name, region, latitude, longitude,
                 farm_size, crop_type, soil_type, installation_date, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {SYSTEM_COLUMNS}
            "#
        );
        sqlx::query_as::<_, System>(&sql)
            .bind(new.user_id)
            .bind(&new.device_id)
            .bind(&new.name)
            .bind(&new.region)
            .bind(new.latitude)
            .bind(new.longitude)
            .bind(new.farm_size)
            .bind(&new.crop_type)
            .bind(&new.soil_type)
            .bind(new.installation_date)
            .bind(&new.notes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| conflict_or(e, &new.device_id))
    }

    async fn get_system(&self, id: i64) -> Result<Option<System>> {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE id = $1");
        let row = sqlx::query_as::<_, System>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_systems_for_user(&self, user_id: i64) -> Result<Vec<System>> {
        let sql = format!(
            r#"
            SELECT {SYSTEM_COLUMNS}
            FROM systems
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rows = sqlx::query_as::<_, System>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_all_systems(&self) -> Result<Vec<System>> {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query_as::<_, System>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_system_by_device(&self, device_id: &str) -> Result<Option<System>> {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE device_id = $1");
        let row = sqlx::query_as::<_, System>(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update_system(&self, id: i64, patch: SystemPatch) -> Result<Option<System>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM systems WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Ok(None);
        }
        if let Some(device_id) = &patch.device_id {
            if self.device_taken(device_id, Some(id)).await? {
                return Err(Error::Conflict(device_id.clone()));
            }
        }
        let sql = format!(
            r#"
            UPDATE systems SET
                device_id         = COALESCE($2,  device_id),
                name              = COALESCE($3,  name),
                region            = COALESCE($4,  region),
                latitude          = COALESCE($5,  latitude),
                longitude         = COALESCE($6,  longitude),
                farm_size         = COALESCE($7,  farm_size),
                crop_type         = COALESCE($8,  crop_type),
                soil_type         = COALESCE($9,  soil_type),
                installation_date = COALESCE($10, installation_date),
                notes             = COALESCE($11, notes),
                updated_at        = now()
            WHERE id = $1
            RETURNING {SYSTEM_COLUMNS}
            "#
        );
        let device_id = patch.device_id.clone().unwrap_or_default();
        sqlx::query_as::<_, System>(&sql)
            .bind(id)
            .bind(patch.device_id)
            .bind(patch.name)
            .bind(patch.region)
            .bind(patch.latitude)
            .bind(patch.longitude)
            .bind(patch.farm_size)
            .bind(patch.crop_type)
            .bind(patch.soil_type)
            .bind(patch.installation_date)
            .bind(patch.notes)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| conflict_or(e, &device_id))
    }

    async fn delete_system(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM systems WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
//
// Run against `DATABASE_URL` with `cargo test --features postgres-tests`.
// ---------------------------------------------------------------------------
