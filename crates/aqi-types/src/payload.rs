//! Normalization of inbound sensor payloads.
//!
//! Sensor firmware has shipped with several spellings for the same
//! measurement (`pm1` vs `pm1_0`, `temp` vs `temperature`, ...). Each
//! canonical field has an ordered list of candidate keys; the first key that
//! holds a usable number wins and missing fields default to `0`.
//!
//! | Field         | Keys (in order)          |
//! |---------------|--------------------------|
//! | `pm1_0`       | `pm1`, `pm1_0`           |
//! | `pm2_5`       | `pm2_5`                  |
//! | `pm4_0`       | `pm4`, `pm4_0`           |
//! | `pm10`        | `pm10`                   |
//! | `temperature` | `temp`, `temperature`    |
//! | `humidity`    | `rh`, `humidity`         |
//! | `voc_index`   | `voc`, `voc_index`       |
//! | `nox_index`   | `nox`, `nox_index`       |
//! | `aqi`         | `aqi`                    |

use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};
use crate::types::{DEFAULT_DEVICE_ID, Reading};

pub const PM1_0_KEYS: &[&str] = &["pm1", "pm1_0"];
pub const PM2_5_KEYS: &[&str] = &["pm2_5"];
pub const PM4_0_KEYS: &[&str] = &["pm4", "pm4_0"];
pub const PM10_KEYS: &[&str] = &["pm10"];
pub const TEMPERATURE_KEYS: &[&str] = &["temp", "temperature"];
pub const HUMIDITY_KEYS: &[&str] = &["rh", "humidity"];
pub const VOC_KEYS: &[&str] = &["voc", "voc_index"];
pub const NOX_KEYS: &[&str] = &["nox", "nox_index"];
pub const AQI_KEYS: &[&str] = &["aqi"];

/// Normalize a raw payload, stamping it with the current time.
pub fn normalize(raw: &[u8]) -> ParseResult<Reading> {
    normalize_at(raw, OffsetDateTime::now_utc())
}

/// Normalize a raw payload with an explicit capture time.
pub fn normalize_at(raw: &[u8], captured_at: OffsetDateTime) -> ParseResult<Reading> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
    normalize_value(&value, captured_at)
}

/// Normalize an already-decoded JSON value.
///
/// Fails only if `value` is not a JSON object.
pub fn normalize_value(value: &Value, captured_at: OffsetDateTime) -> ParseResult<Reading> {
    let object = value
        .as_object()
        .ok_or_else(|| ParseError::NotAnObject(json_kind(value)))?;

    let device_id = object
        .get("device_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_DEVICE_ID);

    Ok(Reading::builder(device_id)
        .pm1_0(first_number(object, PM1_0_KEYS))
        .pm2_5(first_number(object, PM2_5_KEYS))
        .pm4_0(first_number(object, PM4_0_KEYS))
        .pm10(first_number(object, PM10_KEYS))
        .temperature(first_number(object, TEMPERATURE_KEYS))
        .humidity(first_number(object, HUMIDITY_KEYS))
        .voc_index(first_number(object, VOC_KEYS))
        .nox_index(first_number(object, NOX_KEYS))
        .aqi(first_number(object, AQI_KEYS))
        .build(captured_at))
}

/// Resolve the first key in `keys` that holds a usable number.
///
/// JSON numbers are used as-is; strings are accepted when they parse to a
/// finite number. Anything else (including `null`) is skipped.
fn first_number(object: &Map<String, Value>, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(as_number)
        .unwrap_or(0.0)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AqiCategory, classify};
    use proptest::prelude::*;
    use serde_json::json;

    fn at() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    #[test]
    fn test_empty_object_defaults() {
        let reading = normalize_at(b"{}", at()).unwrap();

        assert_eq!(reading.device_id, DEFAULT_DEVICE_ID);
        assert_eq!(reading.pm1_0, 0.0);
        assert_eq!(reading.pm2_5, 0.0);
        assert_eq!(reading.pm4_0, 0.0);
        assert_eq!(reading.pm10, 0.0);
        assert_eq!(reading.temperature, 0.0);
        assert_eq!(reading.humidity, 0.0);
        assert_eq!(reading.voc_index, 0.0);
        assert_eq!(reading.nox_index, 0.0);
        assert_eq!(reading.aqi(), 0.0);
        assert_eq!(reading.category(), AqiCategory::Good);
    }

    #[test]
    fn test_short_aliases() {
        let raw = br#"{"device_id":"sen55-kitchen","pm1":3.1,"pm2_5":8.4,"pm4":9.0,"pm10":12.5,
            "temp":21.7,"rh":44.0,"voc":101,"nox":1,"aqi":35}"#;
        let reading = normalize_at(raw, at()).unwrap();

        assert_eq!(reading.device_id, "sen55-kitchen");
        assert_eq!(reading.pm1_0, 3.1);
        assert_eq!(reading.pm2_5, 8.4);
        assert_eq!(reading.pm4_0, 9.0);
        assert_eq!(reading.pm10, 12.5);
        assert_eq!(reading.temperature, 21.7);
        assert_eq!(reading.humidity, 44.0);
        assert_eq!(reading.voc_index, 101.0);
        assert_eq!(reading.nox_index, 1.0);
        assert_eq!(reading.aqi(), 35.0);
    }

    #[test]
    fn test_canonical_keys() {
        let raw = br#"{"pm1_0":1.0,"pm4_0":4.0,"temperature":19.5,"humidity":60,
            "voc_index":90,"nox_index":2}"#;
        let reading = normalize_at(raw, at()).unwrap();

        assert_eq!(reading.pm1_0, 1.0);
        assert_eq!(reading.pm4_0, 4.0);
        assert_eq!(reading.temperature, 19.5);
        assert_eq!(reading.humidity, 60.0);
        assert_eq!(reading.voc_index, 90.0);
        assert_eq!(reading.nox_index, 2.0);
    }

    #[test]
    fn test_first_alias_wins() {
        let raw = br#"{"pm1":5,"pm1_0":9,"temp":20,"temperature":30,"rh":40,"humidity":50}"#;
        let reading = normalize_at(raw, at()).unwrap();

        assert_eq!(reading.pm1_0, 5.0);
        assert_eq!(reading.temperature, 20.0);
        assert_eq!(reading.humidity, 40.0);
    }

    #[test]
    fn test_null_alias_falls_through() {
        let raw = br#"{"pm1":null,"pm1_0":9}"#;
        let reading = normalize_at(raw, at()).unwrap();
        assert_eq!(reading.pm1_0, 9.0);
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let raw = br#"{"aqi":"120","pm2_5":" 40.5 ","pm10":"n/a"}"#;
        let reading = normalize_at(raw, at()).unwrap();

        assert_eq!(reading.aqi(), 120.0);
        assert_eq!(reading.category(), AqiCategory::UnhealthySensitive);
        assert_eq!(reading.pm2_5, 40.5);
        assert_eq!(reading.pm10, 0.0);
    }

    #[test]
    fn test_payload_category_ignored() {
        let raw = br#"{"aqi":250,"aqi_category":"good"}"#;
        let reading = normalize_at(raw, at()).unwrap();
        assert_eq!(reading.category(), AqiCategory::VeryUnhealthy);
    }

    #[test]
    fn test_timestamp_is_capture_time() {
        let captured = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let raw = br#"{"timestamp":"2001-01-01T00:00:00Z"}"#;
        let reading = normalize_at(raw, captured).unwrap();
        assert_eq!(reading.timestamp, captured);
    }

    #[test]
    fn test_empty_or_non_string_device_id_uses_fallback() {
        let reading = normalize_at(br#"{"device_id":""}"#, at()).unwrap();
        assert_eq!(reading.device_id, DEFAULT_DEVICE_ID);

        let reading = normalize_at(br#"{"device_id":42}"#, at()).unwrap();
        assert_eq!(reading.device_id, DEFAULT_DEVICE_ID);
    }

    #[test]
    fn test_malformed_payload() {
        let err = normalize_at(b"{\"aqi\": 4", at()).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));

        let err = normalize_at(b"not json at all", at()).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_non_object_payload() {
        assert_eq!(
            normalize_at(b"[1,2,3]", at()).unwrap_err(),
            ParseError::NotAnObject("array")
        );
        assert_eq!(
            normalize_at(b"42", at()).unwrap_err(),
            ParseError::NotAnObject("number")
        );
        assert_eq!(
            normalize_value(&json!(null), at()).unwrap_err(),
            ParseError::NotAnObject("null")
        );
    }

    #[test]
    fn test_esp32_response_body() {
        let raw = br#"{"device_id":"esp32-aqi-001","pm1_0":2.1,"pm2_5":3.4,"pm4_0":3.9,
            "pm10":4.2,"voc_index":98,"nox_index":1,"temperature":24.3,"humidity":41.2,
            "aqi":14,"aqi_category":"good"}"#;
        let reading = normalize_at(raw, at()).unwrap();

        assert_eq!(reading.device_id, "esp32-aqi-001");
        assert_eq!(reading.pm4_0, 3.9);
        assert_eq!(reading.category(), AqiCategory::Good);
    }

    proptest! {
        #[test]
        fn prop_category_matches_classifier(aqi in 0u32..1000) {
            let raw = format!(r#"{{"aqi":{}}}"#, aqi);
            let reading = normalize_at(raw.as_bytes(), at()).unwrap();
            prop_assert_eq!(reading.category(), classify(f64::from(aqi)));
        }

        #[test]
        fn prop_short_alias_precedence(short in 0.0f64..1000.0, long in 0.0f64..1000.0) {
            let value = json!({ "pm4": short, "pm4_0": long, "voc": short, "voc_index": long });
            let reading = normalize_value(&value, at()).unwrap();
            prop_assert_eq!(reading.pm4_0, short);
            prop_assert_eq!(reading.voc_index, short);
        }

        #[test]
        fn prop_classifier_monotonic(a in -100.0f64..1000.0, b in -100.0f64..1000.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(classify(lo) <= classify(hi));
        }
    }
}
