use std::fmt;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Mirrors the `reading_origin` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "reading_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReadingOrigin {
    /// Pulled from the sensor source by a collection sweep.
    Collected,
    /// Submitted through `POST /readings/manual`.
    Manual,
}

impl fmt::Display for ReadingOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadingOrigin::Collected => "collected",
            ReadingOrigin::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// One stored sample of the five sensor fields. Rows are never updated or
/// deleted once written.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct SensorReading {
    /// Store-assigned, increases with insertion order.
    pub id: i64,
    pub device_id: String,
    /// Percent, 0–100.
    pub soil_moisture: f64,
    /// pH, typically 0–14.
    pub soil_ph: f64,
    /// Degrees Celsius.
    pub air_temp: f64,
    /// Relative humidity percentage.
    pub humidity: f64,
    /// Battery voltage in volts (0–5 scale).
    pub battery: f64,
    /// Solar panel voltage in volts, when the device reports it.
    pub solar_voltage: Option<f64>,
    pub origin: ReadingOrigin,
    pub recorded_at: DateTime<Utc>,
}

/// A reading that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorReading {
    pub device_id: String,
    pub soil_moisture: f64,
    pub soil_ph: f64,
    pub air_temp: f64,
    pub humidity: f64,
    pub battery: f64,
    pub solar_voltage: Option<f64>,
    pub origin: ReadingOrigin,
    pub recorded_at: DateTime<Utc>,
}

/// Truncate to microseconds, the resolution of `TIMESTAMPTZ`, so a stored
/// row compares equal to the value that was written.
pub fn stamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

impl NewSensorReading {
    pub fn into_reading(self, id: i64) -> SensorReading {
        SensorReading {
            id,
            device_id: self.device_id,
            soil_moisture: self.soil_moisture,
            soil_ph: self.soil_ph,
            air_temp: self.air_temp,
            humidity: self.humidity,
            battery: self.battery,
            solar_voltage: self.solar_voltage,
            origin: self.origin,
            recorded_at: self.recorded_at,
        }
    }
}

/// A registered monitoring site bound to exactly one device.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct System {
    pub id: i64,
    pub user_id: i64,
    pub device_id: String,
    pub name: String,
    pub region: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Hectares.
    pub farm_size: Option<f64>,
    pub crop_type: Option<String>,
    pub soil_type: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration data for a new system, already validated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewSystem {
    pub user_id: i64,
    pub device_id: String,
    pub name: String,
    pub region: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub farm_size: Option<f64>,
    pub crop_type: Option<String>,
    pub soil_type: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Partial update of a system. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, ToSchema)]
pub struct SystemPatch {
    pub device_id: Option<String>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub farm_size: Option<f64>,
    pub crop_type: Option<String>,
    pub soil_type: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl SystemPatch {
    /// Apply the present fields to `system` in place.
    pub fn apply_to(&self, system: &mut System) {
        if let Some(v) = &self.device_id {
            system.device_id = v.clone();
        }
        if let Some(v) = &self.name {
            system.name = v.clone();
        }
        if let Some(v) = &self.region {
            system.region = v.clone();
        }
        if let Some(v) = self.latitude {
            system.latitude = Some(v);
        }
        if let Some(v) = self.longitude {
            system.longitude = Some(v);
        }
        if let Some(v) = self.farm_size {
            system.farm_size = Some(v);
        }
        if let Some(v) = &self.crop_type {
            system.crop_type = Some(v.clone());
        }
        if let Some(v) = &self.soil_type {
            system.soil_type = Some(v.clone());
        }
        if let Some(v) = self.installation_date {
            system.installation_date = Some(v);
        }
        if let Some(v) = &self.notes {
            system.notes = Some(v.clone());
        }
    }
}
