use std::sync::Arc;

use tracing::info;

use crate::{
    db::models::{NewSystem, System, SystemPatch},
    error::{Error, Result},
    store::SystemStore,
};

/// Registration, patching and removal of monitoring systems.
#[derive(Clone)]
pub struct SystemService {
    store: Arc<dyn SystemStore>,
}

/// Trim a required text field, rejecting blank values.
fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(format!("'{field}' must not be blank")));
    }
    Ok(trimmed.to_owned())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl SystemService {
    pub fn new(store: Arc<dyn SystemStore>) -> Self {
        Self { store }
    }

    /// Register a system. A device already bound to any system is a
    /// `Conflict`, and nothing is written.
    pub async fn register(&self, new: NewSystem) -> Result<System> {
        let new = NewSystem {
            device_id: required_text("device_id", &new.device_id)?,
            name: required_text("name", &new.name)?,
            region: required_text("region", &new.region)?,
            crop_type: optional_text(new.crop_type),
            soil_type: optional_text(new.soil_type),
            notes: optional_text(new.notes),
            ..new
        };

        let system = self.store.insert_system(new).await?;
        info!(
            system_id = system.id,
            user_id = system.user_id,
            device_id = %system.device_id,
            "System registered"
        );
        Ok(system)
    }

    pub async fn get(&self, id: i64) -> Result<System> {
        self.store
            .get_system(id)
            .await?
            .ok_or_else(|| Error::system_not_found(id))
    }

    /// The system a device is bound to, if it has been registered.
    pub async fn find_by_device(&self, device_id: &str) -> Result<Option<System>> {
        self.store.find_system_by_device(device_id).await
    }

    /// Apply a partial update. Present text fields must not be blank.
    pub async fn update(&self, id: i64, patch: SystemPatch) -> Result<System> {
        let patch = SystemPatch {
            device_id: patch
                .device_id
                .as_deref()
                .map(|v| required_text("device_id", v))
                .transpose()?,
            name: patch.name.as_deref().map(|v| required_text("name", v)).transpose()?,
            region: patch
                .region
                .as_deref()
                .map(|v| required_text("region", v))
                .transpose()?,
            ..patch
        };

        let system = self
            .store
            .update_system(id, patch)
            .await?
            .ok_or_else(|| Error::system_not_found(id))?;
        info!(system_id = id, "System updated");
        Ok(system)
    }

    /// Remove a system. Its device's readings stay in the store.
    pub async fn delete(&self, id: i64) -> Result<()> {
        if !self.store.delete_system(id).await? {
            return Err(Error::system_not_found(id));
        }
        info!(system_id = id, "System deleted");
        Ok(())
    }
}
