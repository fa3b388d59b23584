use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    collection::{CollectionResult, Sweep, SweepScope},
    db::models::{stamp, NewSensorReading, NewSystem, ReadingOrigin},
    error::{Error, Result},
    source::models::SensorPayload,
    status::StatusPolicy,
};

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Body of `POST /systems`. Every field is optional on the wire so that a
/// missing one comes back as a 400 naming it.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateSystemRequest {
    pub user_id: Option<i64>,
    pub device_id: Option<String>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Hectares.
    pub farm_size: Option<f64>,
    pub crop_type: Option<String>,
    pub soil_type: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

fn present<T>(field: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| Error::validation(format!("missing required field '{field}'")))
}

impl TryFrom<CreateSystemRequest> for NewSystem {
    type Error = Error;

    fn try_from(req: CreateSystemRequest) -> Result<Self> {
        Ok(NewSystem {
            user_id: present("user_id", req.user_id)?,
            device_id: present("device_id", req.device_id)?,
            name: present("name", req.name)?,
            region: present("region", req.region)?,
            latitude: req.latitude,
            longitude: req.longitude,
            farm_size: req.farm_size,
            crop_type: req.crop_type,
            soil_type: req.soil_type,
            installation_date: req.installation_date,
            notes: req.notes,
        })
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SummariesQuery {
    /// Owner whose systems are summarised.
    pub user_id: Option<i64>,
    /// `recency` (default) or `battery`.
    pub policy: Option<StatusPolicy>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PolicyQuery {
    /// `recency` (default) or `battery`.
    pub policy: Option<StatusPolicy>,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub const DEFAULT_HISTORY_HOURS: i64 = 24;
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// Look-back window in hours (default 24).
    pub hours: Option<i64>,
    /// Maximum rows returned (default 100, capped at 1000).
    pub limit: Option<i64>,
}

impl HistoryParams {
    pub fn window(&self) -> Result<TimeDelta> {
        let hours = self.hours.unwrap_or(DEFAULT_HISTORY_HOURS);
        if hours < 1 {
            return Err(Error::validation("'hours' must be at least 1"));
        }
        TimeDelta::try_hours(hours).ok_or_else(|| Error::validation("'hours' is out of range"))
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RunCollectionRequest {
    /// Restrict the sweep to this user's systems.
    pub user_id: Option<i64>,
    /// Fetch only this device, registered or not. Excludes `user_id`.
    pub device_id: Option<String>,
}

impl RunCollectionRequest {
    /// All systems when neither field is given.
    pub fn scope(self) -> Result<SweepScope> {
        match (self.user_id, self.device_id) {
            (Some(_), Some(_)) => Err(Error::validation(
                "'user_id' and 'device_id' cannot be combined",
            )),
            (Some(user_id), None) => Ok(SweepScope::User(user_id)),
            (None, Some(device_id)) => {
                let device_id = device_id.trim();
                if device_id.is_empty() {
                    return Err(Error::validation("'device_id' must not be blank"));
                }
                Ok(SweepScope::Device(device_id.to_owned()))
            }
            (None, None) => Ok(SweepScope::All),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CollectionReport {
    pub sweep_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per device, in the order the devices were swept.
    pub results: Vec<CollectionResult>,
}

impl From<Sweep> for CollectionReport {
    fn from(sweep: Sweep) -> Self {
        let succeeded = sweep.results.iter().filter(|r| r.outcome.is_success()).count();
        Self {
            sweep_id: sweep.sweep_id,
            started_at: sweep.started_at,
            finished_at: sweep.finished_at,
            succeeded,
            failed: sweep.results.len() - succeeded,
            results: sweep.results,
        }
    }
}

// ---------------------------------------------------------------------------
// Manual readings
// ---------------------------------------------------------------------------

/// Body of `POST /readings/manual`. Handled as raw JSON so that type errors
/// are reported per field; this struct only documents the shape.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct ManualReadingRequest {
    pub device_id: String,
    pub soil_moisture: f64,
    pub soil_ph: f64,
    pub air_temp: f64,
    pub humidity: f64,
    /// Volts.
    pub battery: f64,
    pub solar_voltage: Option<f64>,
    /// RFC 3339. Defaults to the time the request is handled.
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Validate a manual submission into a reading ready to append.
pub fn manual_reading(body: &Value, now: DateTime<Utc>) -> Result<NewSensorReading> {
    let payload = SensorPayload::try_from(body).map_err(|e| Error::validation(e.to_string()))?;
    let device_id = payload
        .device_id
        .as_deref()
        .map(str::trim)
        .ok_or_else(|| Error::validation("missing required field 'device_id'"))?
        .to_owned();

    let recorded_at = match body.get("recorded_at") {
        None | Some(Value::Null) => now,
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map_err(|_| Error::validation("'recorded_at' must be an RFC 3339 timestamp"))?
            .with_timezone(&Utc),
        Some(_) => return Err(Error::validation("'recorded_at' must be an RFC 3339 timestamp")),
    };

    Ok(NewSensorReading {
        device_id,
        soil_moisture: payload.soil_moisture,
        soil_ph: payload.soil_ph,
        air_temp: payload.air_temp,
        humidity: payload.humidity,
        battery: payload.battery,
        solar_voltage: payload.solar_voltage,
        origin: ReadingOrigin::Manual,
        recorded_at: stamp(recorded_at),
    })
}
