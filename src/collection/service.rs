use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::time;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{stamp, NewSensorReading, ReadingOrigin, SensorReading},
    error::Result,
    source::{models::SensorPayload, FetchError, SensorSource},
    store::{ReadingStore, SystemStore},
};

#[derive(Debug, Clone, Copy)]
pub struct CollectionSettings {
    /// Upper bound on a single device fetch.
    pub fetch_timeout: Duration,
    /// Devices fetched at the same time within one sweep.
    pub concurrency: usize,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    UpstreamStatus,
    UnknownDevice,
    InvalidPayload,
    Storage,
}

impl From<&FetchError> for FailureKind {
    fn from(e: &FetchError) -> Self {
        match e {
            FetchError::Timeout(_) => FailureKind::Timeout,
            FetchError::Transport(_) => FailureKind::Transport,
            FetchError::Status(_) => FailureKind::UpstreamStatus,
            FetchError::UnknownDevice => FailureKind::UnknownDevice,
            FetchError::InvalidPayload(_) => FailureKind::InvalidPayload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { reading: SensorReading },
    Failure { kind: FailureKind, reason: String },
}

impl Outcome {
    fn failure(kind: FailureKind, reason: impl ToString) -> Self {
        Outcome::Failure {
            kind,
            reason: reason.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// What happened to one device during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CollectionResult {
    pub device_id: String,
    pub outcome: Outcome,
}

/// Which devices a sweep covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepScope {
    User(i64),
    All,
    /// One device, registered or not.
    Device(String),
}

/// One completed sweep; `results` follows the order devices were listed in.
#[derive(Debug, Clone)]
pub struct Sweep {
    pub sweep_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<CollectionResult>,
}

/// Pulls current readings from the sensor source and appends the valid ones
/// to the reading store.
#[derive(Clone)]
pub struct CollectionService {
    source: Arc<dyn SensorSource>,
    readings: Arc<dyn ReadingStore>,
    systems: Arc<dyn SystemStore>,
    settings: CollectionSettings,
}

impl CollectionService {
    pub fn new(
        source: Arc<dyn SensorSource>,
        readings: Arc<dyn ReadingStore>,
        systems: Arc<dyn SystemStore>,
        settings: CollectionSettings,
    ) -> Self {
        Self {
            source,
            readings,
            systems,
            settings,
        }
    }

    /// Fetch, validate and persist one reading per device.
    ///
    /// Never fails as a whole: every device gets exactly one result, in input
    /// order, and a failing device does not affect the others. At most
    /// `concurrency` fetches are in flight, each bounded by `fetch_timeout`.
    pub async fn collect(&self, devices: &[String]) -> Vec<CollectionResult> {
        stream::iter(devices.iter().cloned())
            .map(|device_id| async move {
                let outcome = self.collect_one(&device_id).await;
                CollectionResult { device_id, outcome }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn collect_one(&self, device_id: &str) -> Outcome {
        let timeout = self.settings.fetch_timeout;
        // Dropping the fetch future on timeout abandons the request.
        let fetched = match time::timeout(timeout, self.source.fetch(device_id)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to fetch sensor data");
                return Outcome::failure(FailureKind::from(&e), e);
            }
        };

        let payload = match SensorPayload::try_from(&raw).and_then(|p| {
            p.ensure_device(device_id)?;
            Ok(p)
        }) {
            Ok(p) => p,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Rejected sensor payload");
                return Outcome::failure(FailureKind::InvalidPayload, e);
            }
        };

        let reading = NewSensorReading {
            device_id: device_id.to_owned(),
            soil_moisture: payload.soil_moisture,
            soil_ph: payload.soil_ph,
            air_temp: payload.air_temp,
            humidity: payload.humidity,
            battery: payload.battery,
            solar_voltage: payload.solar_voltage,
            origin: ReadingOrigin::Collected,
            recorded_at: stamp(Utc::now()),
        };

        match self.readings.append(reading).await {
            Ok(stored) => {
                info!(
                    device_id = %device_id,
                    soil_moisture = stored.soil_moisture,
                    soil_ph = stored.soil_ph,
                    air_temp = stored.air_temp,
                    humidity = stored.humidity,
                    battery = stored.battery,
                    "Sensor reading collected"
                );
                Outcome::Success { reading: stored }
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to store sensor reading");
                Outcome::failure(FailureKind::Storage, e)
            }
        }
    }

    /// Device ids in `scope`. Registered devices come most recently
    /// registered first.
    pub async fn devices_in(&self, scope: &SweepScope) -> Result<Vec<String>> {
        let systems = match scope {
            SweepScope::User(user_id) => self.systems.list_systems_for_user(*user_id).await?,
            SweepScope::All => self.systems.list_all_systems().await?,
            SweepScope::Device(device_id) => return Ok(vec![device_id.clone()]),
        };
        Ok(systems.into_iter().map(|s| s.device_id).collect())
    }

    /// Run one sweep over the devices registered in `scope`.
    ///
    /// Only listing the devices can fail; device failures land in the results.
    pub async fn sweep(&self, scope: SweepScope) -> Result<Sweep> {
        let sweep_id = Uuid::new_v4();
        let started_at = Utc::now();
        let devices = self.devices_in(&scope).await?;
        info!(sweep_id = %sweep_id, devices = devices.len(), ?scope, "Sweep started");

        let results = self.collect(&devices).await;

        let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
        info!(
            sweep_id = %sweep_id,
            succeeded,
            failed = results.len() - succeeded,
            "Sweep finished"
        );

        Ok(Sweep {
            sweep_id,
            started_at,
            finished_at: Utc::now(),
            results,
        })
    }

    /// Sweeps every registered device forever: once immediately, then every
    /// `interval`. Spawn this via `tokio::spawn`.
    pub async fn run(self, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "Collection loop started");
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(SweepScope::All).await {
                error!(error = %e, "Collection sweep could not list devices");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        db::models::NewSystem,
        source::fake::{Behaviour, FakeSource},
        store::MemoryStore,
    };

    fn service(
        source: FakeSource,
        store: &MemoryStore,
        settings: CollectionSettings,
    ) -> CollectionService {
        CollectionService::new(
            Arc::new(source),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            settings,
        )
    }

    fn ids(devices: &[&str]) -> Vec<String> {
        devices.iter().map(|d| d.to_string()).collect()
    }

    fn kinds(results: &[CollectionResult]) -> Vec<Option<FailureKind>> {
        results
            .iter()
            .map(|r| match &r.outcome {
                Outcome::Success { .. } => None,
                Outcome::Failure { kind, .. } => Some(*kind),
            })
            .collect()
    }

    #[tokio::test]
    async fn one_failing_device_does_not_affect_the_rest() {
        let store = MemoryStore::new();
        let source = FakeSource::new()
            .with("a", Behaviour::Healthy)
            .with("b", Behaviour::Fail(FetchError::Transport("connection refused".into())))
            .with("c", Behaviour::Healthy)
            .with("d", Behaviour::Healthy);
        let svc = service(source, &store, CollectionSettings::default());

        let results = svc.collect(&ids(&["a", "b", "c", "d"])).await;

        assert_eq!(results.len(), 4);
        let order: Vec<&str> = results.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(kinds(&results), vec![None, Some(FailureKind::Transport), None, None]);
        assert_eq!(store.reading_count().await, 3);
    }

    #[tokio::test]
    async fn successful_readings_are_stored_as_collected() {
        let store = MemoryStore::new();
        let source = FakeSource::new().with("a", Behaviour::Healthy);
        let svc = service(source, &store, CollectionSettings::default());

        let results = svc.collect(&ids(&["a"])).await;
        let Outcome::Success { reading } = &results[0].outcome else {
            panic!("expected success, got {:?}", results[0].outcome);
        };
        assert_eq!(reading.origin, ReadingOrigin::Collected);
        assert_eq!(reading.solar_voltage, Some(0.5));
        assert_eq!(store.latest("a").await.unwrap().as_ref(), Some(reading));
    }

    #[tokio::test]
    async fn invalid_payloads_are_failures_and_not_stored() {
        let store = MemoryStore::new();
        let source = FakeSource::new()
            .with("partial", Behaviour::Raw(json!({ "soil_moisture": 40.0, "air_temp": 22.0 })))
            .with(
                "liar",
                Behaviour::Raw(json!({
                    "device_id": "someone-else",
                    "soil_moisture": 40.0,
                    "soil_ph": 6.0,
                    "air_temp": 22.0,
                    "humidity": 50.0,
                    "battery": 3.5
                })),
            )
            .with("text", Behaviour::Raw(json!("hello")));
        let svc = service(source, &store, CollectionSettings::default());

        let results = svc.collect(&ids(&["partial", "liar", "text"])).await;

        assert_eq!(kinds(&results), vec![Some(FailureKind::InvalidPayload); 3]);
        let Outcome::Failure { reason, .. } = &results[1].outcome else {
            unreachable!()
        };
        assert!(reason.contains("someone-else"));
        assert_eq!(store.reading_count().await, 0);
    }

    #[tokio::test]
    async fn percent_scale_battery_is_rejected() {
        let store = MemoryStore::new();
        let source = FakeSource::new().with(
            "pct",
            Behaviour::Raw(json!({
                "device_id": "pct",
                "soil_moisture": 45.0,
                "soil_ph": 6.8,
                "air_temp": 24.0,
                "humidity": 55.0,
                "battery": 100.0
            })),
        );
        let svc = service(source, &store, CollectionSettings::default());

        let results = svc.collect(&ids(&["pct"])).await;

        assert_eq!(kinds(&results), vec![Some(FailureKind::InvalidPayload)]);
        let Outcome::Failure { reason, .. } = &results[0].outcome else {
            unreachable!()
        };
        assert!(reason.contains("battery"));
        assert!(store.latest("pct").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_device_is_reported() {
        let store = MemoryStore::new();
        let svc = service(FakeSource::new(), &store, CollectionSettings::default());

        let results = svc.collect(&ids(&["ghost"])).await;
        assert_eq!(kinds(&results), vec![Some(FailureKind::UnknownDevice)]);
    }

    #[tokio::test]
    async fn empty_device_list_yields_no_results() {
        let store = MemoryStore::new();
        let svc = service(FakeSource::new(), &store, CollectionSettings::default());
        assert!(svc.collect(&[]).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_device_is_abandoned_without_stalling_the_sweep() {
        let store = MemoryStore::new();
        let source = FakeSource::new()
            .with("d1", Behaviour::Slow(Duration::from_millis(300)))
            .with("d2", Behaviour::Slow(Duration::from_secs(10)))
            .with("d3", Behaviour::Slow(Duration::from_millis(500)));
        let settings = CollectionSettings {
            fetch_timeout: Duration::from_secs(5),
            concurrency: 4,
        };
        let svc = service(source, &store, settings);

        let started = time::Instant::now();
        let results = svc.collect(&ids(&["d1", "d2", "d3"])).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 3);
        assert_eq!(kinds(&results), vec![None, Some(FailureKind::Timeout), None]);
        assert!(elapsed < Duration::from_secs(6), "sweep took {elapsed:?}");
        assert_eq!(store.reading_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_sweep_is_bounded_by_the_timeout() {
        let store = MemoryStore::new();
        let source = FakeSource::new()
            .with("d1", Behaviour::Healthy)
            .with("d2", Behaviour::Hang)
            .with("d3", Behaviour::Healthy);
        let settings = CollectionSettings {
            fetch_timeout: Duration::from_secs(5),
            concurrency: 1,
        };
        let svc = service(source, &store, settings);

        let started = time::Instant::now();
        let results = svc.collect(&ids(&["d1", "d2", "d3"])).await;

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(kinds(&results), vec![None, Some(FailureKind::Timeout), None]);
    }

    #[tokio::test]
    async fn device_sweep_fetches_one_device_even_if_unregistered() {
        let store = MemoryStore::new();
        let source = Arc::new(
            FakeSource::new()
                .with("loose", Behaviour::Healthy)
                .with("other", Behaviour::Healthy),
        );
        let svc = CollectionService::new(
            source.clone(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            CollectionSettings::default(),
        );

        let sweep = svc.sweep(SweepScope::Device("loose".into())).await.unwrap();

        assert_eq!(sweep.results.len(), 1);
        assert_eq!(sweep.results[0].device_id, "loose");
        assert!(sweep.results[0].outcome.is_success());
        assert_eq!(source.calls(), 1);
        assert!(store.latest("loose").await.unwrap().is_some());
        assert_eq!(store.system_count().await, 0);
    }

    #[tokio::test]
    async fn user_sweep_covers_only_that_users_devices() {
        let store = MemoryStore::new();
        for (user_id, device_id) in [(1, "u1-a"), (1, "u1-b"), (2, "u2-a")] {
            store
                .insert_system(NewSystem {
                    user_id,
                    device_id: device_id.into(),
                    name: "Plot".into(),
                    region: "East".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let source = Arc::new(
            FakeSource::new()
                .with("u1-a", Behaviour::Healthy)
                .with("u1-b", Behaviour::Healthy)
                .with("u2-a", Behaviour::Healthy),
        );
        let svc = CollectionService::new(
            source.clone(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            CollectionSettings::default(),
        );

        let sweep = svc.sweep(SweepScope::User(1)).await.unwrap();
        let mut devices: Vec<&str> = sweep.results.iter().map(|r| r.device_id.as_str()).collect();
        devices.sort();
        assert_eq!(devices, vec!["u1-a", "u1-b"]);
        assert_eq!(source.calls(), 2);
        assert!(sweep.finished_at >= sweep.started_at);

        let all = svc.sweep(SweepScope::All).await.unwrap();
        assert_eq!(all.results.len(), 3);
        assert_eq!(store.reading_count().await, 5);
    }
}
