use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    db::models::{SensorReading, System},
    error::{Error, Result},
    status::{Status, StatusPolicy},
    store::{ReadingStore, SystemStore},
};

/// Largest number of readings one history request may return.
pub const MAX_HISTORY_LIMIT: i64 = 1000;

/// A system joined with its device's latest reading and derived status.
/// Recomputed on every read; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SystemSummary {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: Status,
    /// `null` when the device has never reported.
    pub latest_reading: Option<SensorReading>,
}

impl SystemSummary {
    pub fn assemble(
        system: System,
        latest: Option<SensorReading>,
        policy: StatusPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let status = policy.evaluate(latest.as_ref(), now);
        Self {
            id: system.id,
            user_id: system.user_id,
            device_id: system.device_id,
            name: system.name,
            region: system.region,
            latitude: system.latitude,
            longitude: system.longitude,
            farm_size: system.farm_size,
            crop_type: system.crop_type,
            soil_type: system.soil_type,
            installation_date: system.installation_date,
            notes: system.notes,
            created_at: system.created_at,
            updated_at: system.updated_at,
            status,
            latest_reading: latest,
        }
    }
}

/// Whose readings a history query is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryTarget {
    Device(String),
    /// Resolved to the system's current device.
    System(i64),
}

/// Builds the externally visible views over systems and readings.
#[derive(Clone)]
pub struct SummaryBuilder {
    systems: Arc<dyn SystemStore>,
    readings: Arc<dyn ReadingStore>,
}

impl SummaryBuilder {
    pub fn new(systems: Arc<dyn SystemStore>, readings: Arc<dyn ReadingStore>) -> Self {
        Self { systems, readings }
    }

    async fn summarise(
        &self,
        system: System,
        policy: StatusPolicy,
        now: DateTime<Utc>,
    ) -> Result<SystemSummary> {
        let latest = self.readings.latest(&system.device_id).await?;
        Ok(SystemSummary::assemble(system, latest, policy, now))
    }

    /// Summaries of every system owned by `user_id`, most recently registered
    /// first regardless of when their readings arrived.
    pub async fn build_summaries(
        &self,
        user_id: i64,
        policy: StatusPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<SystemSummary>> {
        let systems = self.systems.list_systems_for_user(user_id).await?;
        try_join_all(systems.into_iter().map(|s| self.summarise(s, policy, now))).await
    }

    pub async fn build_summary(
        &self,
        system_id: i64,
        policy: StatusPolicy,
        now: DateTime<Utc>,
    ) -> Result<SystemSummary> {
        let system = self
            .systems
            .get_system(system_id)
            .await?
            .ok_or_else(|| Error::system_not_found(system_id))?;
        self.summarise(system, policy, now).await
    }

    /// Readings from the last `window`, most recent first. `limit` above
    /// `MAX_HISTORY_LIMIT` is capped.
    pub async fn history(
        &self,
        target: HistoryTarget,
        window: TimeDelta,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>> {
        if window <= TimeDelta::zero() {
            return Err(Error::validation("history window must be positive"));
        }
        if limit < 1 {
            return Err(Error::validation("'limit' must be at least 1"));
        }

        let device_id = match target {
            HistoryTarget::Device(device_id) => device_id,
            HistoryTarget::System(id) => {
                self.systems
                    .get_system(id)
                    .await?
                    .ok_or_else(|| Error::system_not_found(id))?
                    .device_id
            }
        };

        let since = now
            .checked_sub_signed(window)
            .ok_or_else(|| Error::validation("history window is out of range"))?;
        self.readings
            .history(&device_id, since, limit.min(MAX_HISTORY_LIMIT))
            .await
    }
}
