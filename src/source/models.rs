use std::ops::RangeInclusive;

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Sensor payload
//
// The device API answers `GET <source>/{device_id}` with one flat JSON object:
//
//   {
//     "device_id": "esp-01",          optional; must match the request
//     "soil_moisture": 41.2,          %
//     "soil_ph": 6.7,
//     "air_temp": 27.4,               °C
//     "humidity": 63.0,               %
//     "battery": 3.82,                volts, 0–5
//     "solar_voltage": 0.52           optional, volts
//   }
//
// Numbers must be JSON numbers; numeric strings are rejected. Extra keys
// (e.g. a device-side `timestamp`) are ignored: readings are stamped by the
// server.
// ---------------------------------------------------------------------------

/// The five required measurement keys, in wire order.
pub const REQUIRED_FIELDS: [&str; 5] =
    ["soil_moisture", "soil_ph", "air_temp", "humidity", "battery"];

/// Accepted battery voltage. Percent-scale values fall outside it.
pub const BATTERY_VOLTS: RangeInclusive<f64> = 0.0..=5.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' must be a finite number")]
    NotNumeric(&'static str),

    #[error("field '{field}' is {value}, outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("field 'device_id' must be a non-empty string")]
    BadDeviceId,

    #[error("payload is for device {found:?}, expected {expected:?}")]
    DeviceMismatch { expected: String, found: String },
}

/// A validated set of measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPayload {
    /// The device id the payload claims to be from, if it says.
    pub device_id: Option<String>,
    pub soil_moisture: f64,
    pub soil_ph: f64,
    pub air_temp: f64,
    pub humidity: f64,
    pub battery: f64,
    pub solar_voltage: Option<f64>,
}

impl SensorPayload {
    /// Reject a payload that names a device other than `expected`. A payload
    /// without a `device_id` is accepted as-is.
    pub fn ensure_device(&self, expected: &str) -> Result<(), PayloadError> {
        match &self.device_id {
            Some(found) if found != expected => Err(PayloadError::DeviceMismatch {
                expected: expected.to_owned(),
                found: found.clone(),
            }),
            _ => Ok(()),
        }
    }
}

fn required_number(obj: &Map<String, Value>, key: &'static str) -> Result<f64, PayloadError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(PayloadError::MissingField(key)),
        Some(v) => number(v, key),
    }
}

fn optional_number(
    obj: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<f64>, PayloadError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => number(v, key).map(Some),
    }
}

fn number(v: &Value, key: &'static str) -> Result<f64, PayloadError> {
    v.as_f64()
        .filter(|n| n.is_finite())
        .ok_or(PayloadError::NotNumeric(key))
}

fn within(value: f64, key: &'static str, range: RangeInclusive<f64>) -> Result<f64, PayloadError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(PayloadError::OutOfRange {
            field: key,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

impl TryFrom<&Value> for SensorPayload {
    type Error = PayloadError;

    fn try_from(value: &Value) -> Result<Self, PayloadError> {
        let obj = value.as_object().ok_or(PayloadError::NotAnObject)?;

        let device_id = match obj.get("device_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(_) => return Err(PayloadError::BadDeviceId),
        };

        Ok(Self {
            device_id,
            soil_moisture: required_number(obj, "soil_moisture")?,
            soil_ph: required_number(obj, "soil_ph")?,
            air_temp: required_number(obj, "air_temp")?,
            humidity: required_number(obj, "humidity")?,
            battery: within(required_number(obj, "battery")?, "battery", BATTERY_VOLTS)?,
            solar_voltage: optional_number(obj, "solar_voltage")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn full() -> Value {
        json!({
            "device_id": "esp-01",
            "soil_moisture": 41.2,
            "soil_ph": 6.7,
            "air_temp": 27.4,
            "humidity": 63,
            "battery": 3.82,
            "solar_voltage": 0.52
        })
    }

    #[test]
    fn accepts_complete_payload() {
        let p = SensorPayload::try_from(&full()).unwrap();
        assert_eq!(p.device_id.as_deref(), Some("esp-01"));
        assert_eq!(p.soil_moisture, 41.2);
        assert_eq!(p.humidity, 63.0);
        assert_eq!(p.solar_voltage, Some(0.52));
    }

    #[test]
    fn every_required_field_is_enforced() {
        for key in REQUIRED_FIELDS {
            let mut v = full();
            v.as_object_mut().unwrap().remove(key);
            assert_eq!(
                SensorPayload::try_from(&v).unwrap_err(),
                PayloadError::MissingField(key),
                "removing {key}"
            );
        }
    }

    #[test]
    fn null_counts_as_missing() {
        let mut v = full();
        v["soil_ph"] = Value::Null;
        assert_eq!(
            SensorPayload::try_from(&v).unwrap_err(),
            PayloadError::MissingField("soil_ph")
        );
    }

    #[test]
    fn numeric_strings_are_rejected() {
        let mut v = full();
        v["air_temp"] = json!("27.4");
        assert_eq!(
            SensorPayload::try_from(&v).unwrap_err(),
            PayloadError::NotNumeric("air_temp")
        );
    }

    #[test]
    fn solar_voltage_is_optional_but_typed() {
        let mut v = full();
        v.as_object_mut().unwrap().remove("solar_voltage");
        assert_eq!(SensorPayload::try_from(&v).unwrap().solar_voltage, None);

        v["solar_voltage"] = json!(true);
        assert_eq!(
            SensorPayload::try_from(&v).unwrap_err(),
            PayloadError::NotNumeric("solar_voltage")
        );
    }

    #[test]
    fn battery_must_be_volts() {
        let mut v = full();
        v["battery"] = json!(100);
        assert_eq!(
            SensorPayload::try_from(&v).unwrap_err(),
            PayloadError::OutOfRange {
                field: "battery",
                value: 100.0,
                min: 0.0,
                max: 5.0
            }
        );

        v["battery"] = json!(-0.1);
        assert!(matches!(
            SensorPayload::try_from(&v).unwrap_err(),
            PayloadError::OutOfRange { field: "battery", .. }
        ));

        for edge in [0.0, 5.0] {
            v["battery"] = json!(edge);
            assert_eq!(SensorPayload::try_from(&v).unwrap().battery, edge);
        }
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(
            SensorPayload::try_from(&json!([1, 2, 3])).unwrap_err(),
            PayloadError::NotAnObject
        );
    }

    #[test]
    fn device_id_must_be_a_string() {
        let mut v = full();
        v["device_id"] = json!(17);
        assert_eq!(SensorPayload::try_from(&v).unwrap_err(), PayloadError::BadDeviceId);
    }

    #[test]
    fn device_mismatch_is_detected() {
        let p = SensorPayload::try_from(&full()).unwrap();
        assert!(p.ensure_device("esp-01").is_ok());
        assert_eq!(
            p.ensure_device("esp-02").unwrap_err(),
            PayloadError::DeviceMismatch {
                expected: "esp-02".into(),
                found: "esp-01".into()
            }
        );

        let mut anonymous = full();
        anonymous.as_object_mut().unwrap().remove("device_id");
        let p = SensorPayload::try_from(&anonymous).unwrap();
        assert!(p.ensure_device("anything").is_ok());
    }
}
