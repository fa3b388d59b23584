//! Health status derivation.
//!
//! Two independent signals can describe a device's health: how recently it
//! reported, and how charged its battery is. They are exposed as separate,
//! explicitly named policies and never combined.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::SensorReading;

/// A reading younger than this many minutes marks the device online.
pub const ONLINE_WINDOW_MINUTES: i64 = 10;
/// A reading younger than this (but older than the online window) is a warning.
pub const WARNING_WINDOW_MINUTES: i64 = 60;

/// Battery voltage at or above which the device is considered online.
pub const BATTERY_ONLINE_VOLTS: f64 = 3.0;
/// Battery voltage at or above which the device is a warning.
pub const BATTERY_WARNING_VOLTS: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Online,
    Warning,
    Offline,
}

/// Which signal a caller wants the status derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Time since the latest reading.
    #[default]
    Recency,
    /// Battery voltage of the latest reading.
    Battery,
}

impl StatusPolicy {
    pub fn evaluate(self, latest: Option<&SensorReading>, now: DateTime<Utc>) -> Status {
        match self {
            StatusPolicy::Recency => evaluate(latest.map(|r| r.recorded_at), now),
            StatusPolicy::Battery => evaluate_by_battery(latest.map(|r| r.battery)),
        }
    }
}

/// Recency policy. No reading at all is `Offline`; a reading stamped in the
/// future has a negative age and counts as `Online`.
pub fn evaluate(latest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Status {
    let Some(ts) = latest else {
        return Status::Offline;
    };
    let age = now - ts;
    if age < TimeDelta::minutes(ONLINE_WINDOW_MINUTES) {
        Status::Online
    } else if age < TimeDelta::minutes(WARNING_WINDOW_MINUTES) {
        Status::Warning
    } else {
        Status::Offline
    }
}

/// Battery policy over the latest battery voltage.
pub fn evaluate_by_battery(battery: Option<f64>) -> Status {
    match battery {
        Some(v) if v >= BATTERY_ONLINE_VOLTS => Status::Online,
        Some(v) if v >= BATTERY_WARNING_VOLTS => Status::Warning,
        _ => Status::Offline,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::models::ReadingOrigin;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn reading(recorded_at: DateTime<Utc>, battery: f64) -> SensorReading {
        SensorReading {
            id: 1,
            device_id: "dev1".into(),
            soil_moisture: 40.0,
            soil_ph: 6.5,
            air_temp: 24.0,
            humidity: 60.0,
            battery,
            solar_voltage: None,
            origin: ReadingOrigin::Collected,
            recorded_at,
        }
    }

    #[test]
    fn no_reading_is_offline() {
        assert_eq!(evaluate(None, now()), Status::Offline);
        assert_eq!(evaluate(None, Utc::now()), Status::Offline);
    }

    #[test]
    fn recency_boundaries() {
        let n = now();
        assert_eq!(evaluate(Some(n), n), Status::Online);
        assert_eq!(
            evaluate(Some(n - TimeDelta::minutes(10) + TimeDelta::milliseconds(1)), n),
            Status::Online
        );
        assert_eq!(evaluate(Some(n - TimeDelta::minutes(10)), n), Status::Warning);
        assert_eq!(evaluate(Some(n - TimeDelta::minutes(59)), n), Status::Warning);
        assert_eq!(
            evaluate(Some(n - TimeDelta::minutes(60) + TimeDelta::milliseconds(1)), n),
            Status::Warning
        );
        assert_eq!(evaluate(Some(n - TimeDelta::minutes(60)), n), Status::Offline);
        assert_eq!(evaluate(Some(n - TimeDelta::days(3)), n), Status::Offline);
    }

    #[test]
    fn future_reading_is_online() {
        let n = now();
        assert_eq!(evaluate(Some(n + TimeDelta::minutes(5)), n), Status::Online);
    }

    #[test]
    fn battery_thresholds() {
        assert_eq!(evaluate_by_battery(Some(4.2)), Status::Online);
        assert_eq!(evaluate_by_battery(Some(3.0)), Status::Online);
        assert_eq!(evaluate_by_battery(Some(2.99)), Status::Warning);
        assert_eq!(evaluate_by_battery(Some(2.5)), Status::Warning);
        assert_eq!(evaluate_by_battery(Some(2.49)), Status::Offline);
        assert_eq!(evaluate_by_battery(None), Status::Offline);
    }

    #[test]
    fn policies_read_different_signals() {
        let n = now();
        // Fresh reading with a flat battery.
        let fresh_flat = reading(n, 2.0);
        assert_eq!(StatusPolicy::Recency.evaluate(Some(&fresh_flat), n), Status::Online);
        assert_eq!(StatusPolicy::Battery.evaluate(Some(&fresh_flat), n), Status::Offline);

        // Stale reading with a full battery.
        let stale_full = reading(n - TimeDelta::hours(2), 4.0);
        assert_eq!(StatusPolicy::Recency.evaluate(Some(&stale_full), n), Status::Offline);
        assert_eq!(StatusPolicy::Battery.evaluate(Some(&stale_full), n), Status::Online);
    }

    #[test]
    fn default_policy_is_recency() {
        assert_eq!(StatusPolicy::default(), StatusPolicy::Recency);
        assert_eq!(
            serde_json::from_str::<StatusPolicy>("\"battery\"").unwrap(),
            StatusPolicy::Battery
        );
    }
}
