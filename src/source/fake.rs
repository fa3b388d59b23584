//! Stateful stand-in for the device API, used by tests.
//!
//! Mirrors the behaviour of the bench simulator: every device it knows about
//! answers with a plausible reading and its battery drains a little on each
//! pull. Individual devices can be scripted to hang, lag, fail, or lie.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{FetchError, SensorSource};

#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Answer with a generated reading.
    Healthy,
    /// Answer with a generated reading after a delay.
    Slow(Duration),
    /// Never answer.
    Hang,
    /// Answer with this exact body.
    Raw(Value),
    Fail(FetchError),
}

#[derive(Debug)]
struct Device {
    behaviour: Behaviour,
    battery: f64,
}

#[derive(Debug, Default)]
pub struct FakeSource {
    devices: Mutex<HashMap<String, Device>>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, device_id: &str, behaviour: Behaviour) -> Self {
        self.set(device_id, behaviour);
        self
    }

    pub fn set(&self, device_id: &str, behaviour: Behaviour) {
        self.devices.lock().unwrap().insert(
            device_id.to_owned(),
            Device {
                behaviour,
                battery: 4.2,
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolve the device's behaviour and, for generated readings, the body.
    fn next(&self, device_id: &str) -> Result<(Behaviour, Value), FetchError> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices.get_mut(device_id).ok_or(FetchError::UnknownDevice)?;
        device.battery = (device.battery - 0.01).max(2.0);
        let body = match &device.behaviour {
            Behaviour::Raw(v) => v.clone(),
            _ => json!({
                "device_id": device_id,
                "soil_moisture": 42.0,
                "soil_ph": 6.6,
                "air_temp": 26.5,
                "humidity": 58.0,
                "battery": (device.battery * 100.0).round() / 100.0,
                "solar_voltage": 0.5
            }),
        };
        Ok((device.behaviour.clone(), body))
    }
}

#[async_trait]
impl SensorSource for FakeSource {
    async fn fetch(&self, device_id: &str) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (behaviour, body) = self.next(device_id)?;
        match behaviour {
            Behaviour::Healthy | Behaviour::Raw(_) => Ok(body),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Fail(err) => Err(err),
        }
    }
}
