use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ReadingStore, SystemStore};
use crate::{
    db::models::{stamp, NewSensorReading, NewSystem, SensorReading, System, SystemPatch},
    error::{Error, Result},
};

/// Process-local store used when no `DATABASE_URL` is configured, and as the
/// backing store in tests.
///
/// Wrapped in `Arc` so clones share state. A single `RwLock` guards both
/// tables, which makes the device-uniqueness check and the insert atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    systems: BTreeMap<i64, System>,
    /// Insertion order; ids increase monotonically.
    readings: Vec<SensorReading>,
    next_system_id: i64,
    next_reading_id: i64,
}

impl Tables {
    fn device_taken(&self, device_id: &str, except: Option<i64>) -> bool {
        self.systems
            .values()
            .any(|s| s.device_id == device_id && Some(s.id) != except)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored readings across all devices.
    pub async fn reading_count(&self) -> usize {
        self.inner.read().await.readings.len()
    }

    pub async fn system_count(&self) -> usize {
        self.inner.read().await.systems.len()
    }
}

fn newest_first(mut systems: Vec<System>) -> Vec<System> {
    systems.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    systems
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: NewSensorReading) -> Result<SensorReading> {
        let mut tables = self.inner.write().await;
        tables.next_reading_id += 1;
        let stored = reading.into_reading(tables.next_reading_id);
        tables.readings.push(stored.clone());
        Ok(stored)
    }

    async fn latest(&self, device_id: &str) -> Result<Option<SensorReading>> {
        Ok(self
            .inner
            .read()
            .await
            .readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .max_by_key(|r| (r.recorded_at, r.id))
            .cloned())
    }

    async fn history(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SensorReading>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<SensorReading> = tables
            .readings
            .iter()
            .filter(|r| r.device_id == device_id && r.recorded_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(rows)
    }
}

#[async_trait]
impl SystemStore for MemoryStore {
    async fn insert_system(&self, new: NewSystem) -> Result<System> {
        let mut tables = self.inner.write().await;
        if tables.device_taken(&new.device_id, None) {
            return Err(Error::Conflict(new.device_id));
        }
        tables.next_system_id += 1;
        let now = stamp(Utc::now());
        let system = System {
            id: tables.next_system_id,
            user_id: new.user_id,
            device_id: new.device_id,
            name: new.name,
            region: new.region,
            latitude: new.latitude,
            longitude: new.longitude,
            farm_size: new.farm_size,
            crop_type: new.crop_type,
            soil_type: new.soil_type,
            installation_date: new.installation_date,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };
        tables.systems.insert(system.id, system.clone());
        Ok(system)
    }

    async fn get_system(&self, id: i64) -> Result<Option<System>> {
        Ok(self.inner.read().await.systems.get(&id).cloned())
    }

    async fn list_systems_for_user(&self, user_id: i64) -> Result<Vec<System>> {
        let tables = self.inner.read().await;
        Ok(newest_first(
            tables
                .systems
                .values()
                .filter(|s| s.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_all_systems(&self) -> Result<Vec<System>> {
        let tables = self.inner.read().await;
        Ok(newest_first(tables.systems.values().cloned().collect()))
    }

    async fn find_system_by_device(&self, device_id: &str) -> Result<Option<System>> {
        Ok(self
            .inner
            .read()
            .await
            .systems
            .values()
            .find(|s| s.device_id == device_id)
            .cloned())
    }

    async fn update_system(&self, id: i64, patch: SystemPatch) -> Result<Option<System>> {
        let mut tables = self.inner.write().await;
        if !tables.systems.contains_key(&id) {
            return Ok(None);
        }
        if let Some(device_id) = &patch.device_id {
            if tables.device_taken(device_id, Some(id)) {
                return Err(Error::Conflict(device_id.clone()));
            }
        }
        let Some(system) = tables.systems.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply_to(system);
        system.updated_at = stamp(Utc::now());
        Ok(Some(system.clone()))
    }

    async fn delete_system(&self, id: i64) -> Result<bool> {
        Ok(self.inner.write().await.systems.remove(&id).is_some())
    }
}
