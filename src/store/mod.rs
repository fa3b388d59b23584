//! Persistence contracts.
//!
//! Two logical tables: `sensor_readings` (append-only) and `systems`
//! (mutable). They are joined by `device_id` at query time, never by a
//! foreign key.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::models::{NewSensorReading, NewSystem, SensorReading, System, SystemPatch},
    error::Result,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Append-only log of sensor readings keyed by device.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Store a reading and return it with its assigned id.
    async fn append(&self, reading: NewSensorReading) -> Result<SensorReading>;

    /// Most recent reading for `device_id`: highest `recorded_at`, then the
    /// latest inserted among equal timestamps.
    async fn latest(&self, device_id: &str) -> Result<Option<SensorReading>>;

    /// Readings recorded at or after `since`, most recent first, at most
    /// `limit` rows.
    async fn history(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SensorReading>>;
}

/// Registration records for monitoring systems.
#[async_trait]
pub trait SystemStore: Send + Sync {
    /// Insert a system. Fails with `Error::Conflict` without writing anything
    /// when the device is already bound to another system.
    async fn insert_system(&self, system: NewSystem) -> Result<System>;

    async fn get_system(&self, id: i64) -> Result<Option<System>>;

    /// All systems of a user, most recently created first.
    async fn list_systems_for_user(&self, user_id: i64) -> Result<Vec<System>>;

    /// Every registered system, most recently created first.
    async fn list_all_systems(&self) -> Result<Vec<System>>;

    async fn find_system_by_device(&self, device_id: &str) -> Result<Option<System>>;

    /// Apply `patch`, bumping `updated_at`. `Ok(None)` when `id` is unknown;
    /// `Error::Conflict` when the patch rebinds to a device that is taken.
    async fn update_system(&self, id: i64, patch: SystemPatch) -> Result<Option<System>>;

    /// `Ok(false)` when `id` is unknown. Readings of the device are kept.
    async fn delete_system(&self, id: i64) -> Result<bool>;
}
