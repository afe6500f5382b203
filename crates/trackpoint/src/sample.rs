//! Inbound sample types for trackpoint.
//!
//! Every ingestion request is decoded once into a [`Sample`]: a tagged value
//! that says which shape the payload has and carries the typed fields the
//! rest of the pipeline needs. The raw JSON document travels alongside so
//! history and the location collection can keep it exactly as received.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Timestamps below this magnitude are read as epoch seconds.
///
/// `100_000_000_000` ms is March 1973; as seconds it is the year 5138.
pub const SECONDS_THRESHOLD: i64 = 100_000_000_000;

/// Convert a client timestamp to epoch milliseconds.
///
/// This is the only place timestamp units are interpreted. Missing values
/// become 0, values below [`SECONDS_THRESHOLD`] are scaled from seconds.
#[must_use]
pub fn normalize_timestamp(raw: Option<i64>) -> i64 {
    match raw {
        None => 0,
        Some(value) if value > -SECONDS_THRESHOLD && value < SECONDS_THRESHOLD => value * 1000,
        Some(value) => value,
    }
}

/// The shape of a decoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Carries `latitude` and `longitude`.
    Location,
    /// Carries a `telephony` object.
    Telephony,
    /// Carries only a non-empty `traffic` object.
    Traffic,
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Location => write!(f, "location"),
            Self::Telephony => write!(f, "telephony"),
            Self::Traffic => write!(f, "traffic"),
        }
    }
}

/// Classify a JSON document without extracting any fields.
///
/// Returns `None` for documents that match no known shape, including
/// arrays and scalars.
#[must_use]
pub fn classify(doc: &Value) -> Option<SampleKind> {
    let obj = doc.as_object()?;
    if obj.contains_key("latitude") && obj.contains_key("longitude") {
        Some(SampleKind::Location)
    } else if obj.get("telephony").is_some_and(Value::is_object) {
        Some(SampleKind::Telephony)
    } else if nested_traffic(obj).is_some() {
        Some(SampleKind::Traffic)
    } else {
        None
    }
}

/// A position fix extracted from a location payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Meters; 0 when absent.
    pub altitude: f64,
    /// Meters; 0 when absent.
    pub accuracy: f64,
    /// Epoch milliseconds; 0 when absent.
    pub timestamp_ms: i64,
}

/// Per-application usage inside a traffic record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppUsage {
    /// Human-readable application name.
    pub app_name: String,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes sent.
    pub tx_bytes: u64,
    /// Bytes in both directions.
    pub total_bytes: u64,
}

/// A normalized traffic record, as written to the traffic collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficRecord {
    /// Epoch milliseconds of the enclosing payload.
    pub timestamp: i64,
    /// Mobile bytes received.
    pub mobile_rx_bytes: u64,
    /// Mobile bytes sent.
    pub mobile_tx_bytes: u64,
    /// All-interface bytes received.
    pub total_rx_bytes: u64,
    /// All-interface bytes sent.
    pub total_tx_bytes: u64,
    /// Mobile bytes in both directions.
    pub mobile_total_bytes: u64,
    /// All-interface bytes in both directions.
    pub total_bytes: u64,
    /// Package name to usage, copied verbatim from the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_apps: Option<Value>,
}

impl TrafficRecord {
    const COUNTERS: [&'static str; 6] = [
        "mobile_rx_bytes",
        "mobile_tx_bytes",
        "total_rx_bytes",
        "total_tx_bytes",
        "mobile_total_bytes",
        "total_bytes",
    ];

    fn from_nested(traffic: &Map<String, Value>, timestamp: i64) -> Result<Self> {
        let mut counters = [0u64; 6];
        for (slot, name) in counters.iter_mut().zip(Self::COUNTERS) {
            *slot = counter_field(traffic, name)?;
        }
        let [mobile_rx_bytes, mobile_tx_bytes, total_rx_bytes, total_tx_bytes, mobile_total_bytes, total_bytes] =
            counters;

        Ok(Self {
            timestamp,
            mobile_rx_bytes,
            mobile_tx_bytes,
            total_rx_bytes,
            total_tx_bytes,
            mobile_total_bytes,
            total_bytes,
            top_apps: traffic.get("top_apps").cloned(),
        })
    }

    /// Top applications parsed leniently, largest total first.
    ///
    /// Entries that are not objects are skipped.
    #[must_use]
    pub fn ranked_apps(&self) -> Vec<(String, AppUsage)> {
        let Some(Value::Object(apps)) = &self.top_apps else {
            return Vec::new();
        };
        let mut ranked: Vec<(String, AppUsage)> = apps
            .iter()
            .filter_map(|(package, usage)| {
                serde_json::from_value::<AppUsage>(usage.clone())
                    .ok()
                    .map(|usage| (package.clone(), usage))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_bytes.cmp(&a.1.total_bytes));
        ranked
    }
}

/// A location payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    /// The extracted fix.
    pub fix: Location,
    /// Nested traffic data, if any.
    pub traffic: Option<TrafficRecord>,
    /// The document as received.
    pub payload: Value,
}

/// A telephony payload, kept opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct TelephonySample {
    /// Epoch milliseconds.
    pub timestamp_ms: i64,
    /// Nested traffic data, if any.
    pub traffic: Option<TrafficRecord>,
    /// The document as received.
    pub payload: Value,
}

/// A payload whose only recognized content is nested traffic data.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSample {
    /// The normalized record.
    pub record: TrafficRecord,
    /// The document as received.
    pub payload: Value,
}

/// One decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// See [`LocationSample`].
    Location(LocationSample),
    /// See [`TelephonySample`].
    Telephony(TelephonySample),
    /// See [`TrafficSample`].
    Traffic(TrafficSample),
}

impl Sample {
    /// Decode request bytes into a sample.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPayload`] if the bytes are not JSON.
    /// - [`Error::MissingFields`] if the document matches no known shape.
    /// - [`Error::InvalidField`] if a known field has the wrong type.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let doc: Value =
            serde_json::from_slice(bytes).map_err(|e| Error::InvalidPayload(e.to_string()))?;
        Self::from_value(doc)
    }

    /// Build a sample from an already parsed document.
    ///
    /// # Errors
    ///
    /// Same as [`Sample::decode`], minus the JSON syntax case.
    pub fn from_value(payload: Value) -> Result<Self> {
        let kind = classify(&payload).ok_or(Error::MissingFields)?;
        let Value::Object(obj) = &payload else {
            return Err(Error::MissingFields);
        };

        let timestamp_ms = normalize_timestamp(raw_timestamp(obj)?);
        let traffic = nested_traffic(obj)
            .map(|nested| TrafficRecord::from_nested(nested, timestamp_ms))
            .transpose()?;

        let sample = match kind {
            SampleKind::Location => {
                let fix = Location {
                    latitude: required_number(obj, "latitude")?,
                    longitude: required_number(obj, "longitude")?,
                    altitude: optional_number(obj, "altitude")?.unwrap_or(0.0),
                    accuracy: optional_number(obj, "accuracy")?.unwrap_or(0.0),
                    timestamp_ms,
                };
                Self::Location(LocationSample {
                    fix,
                    traffic,
                    payload,
                })
            }
            SampleKind::Telephony => Self::Telephony(TelephonySample {
                timestamp_ms,
                traffic,
                payload,
            }),
            SampleKind::Traffic => {
                let record = traffic.ok_or_else(|| Error::internal("traffic shape without record"))?;
                Self::Traffic(TrafficSample { record, payload })
            }
        };
        Ok(sample)
    }

    /// The shape of this sample.
    #[must_use]
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Location(_) => SampleKind::Location,
            Self::Telephony(_) => SampleKind::Telephony,
            Self::Traffic(_) => SampleKind::Traffic,
        }
    }

    /// The document as received.
    #[must_use]
    pub fn payload(&self) -> &Value {
        match self {
            Self::Location(s) => &s.payload,
            Self::Telephony(s) => &s.payload,
            Self::Traffic(s) => &s.payload,
        }
    }

    /// The position fix, for location samples.
    #[must_use]
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Location(s) => Some(&s.fix),
            _ => None,
        }
    }

    /// Normalized epoch milliseconds, 0 when the client sent none.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Self::Location(s) => s.fix.timestamp_ms,
            Self::Telephony(s) => s.timestamp_ms,
            Self::Traffic(s) => s.record.timestamp,
        }
    }

    /// Normalized traffic data, whatever the primary shape.
    #[must_use]
    pub fn traffic(&self) -> Option<&TrafficRecord> {
        match self {
            Self::Location(s) => s.traffic.as_ref(),
            Self::Telephony(s) => s.traffic.as_ref(),
            Self::Traffic(s) => Some(&s.record),
        }
    }
}

fn nested_traffic(obj: &Map<String, Value>) -> Option<&Map<String, Value>> {
    obj.get("traffic")
        .and_then(Value::as_object)
        .filter(|traffic| !traffic.is_empty())
}

// `timestamp` wins over `time` when both are present.
fn raw_timestamp(obj: &Map<String, Value>) -> Result<Option<i64>> {
    for field in ["timestamp", "time"] {
        match obj.get(field) {
            None | Some(Value::Null) => {}
            Some(value) => {
                let parsed = value
                    .as_i64()
                    .ok_or_else(|| Error::invalid_field(field, "expected an integer"))?;
                return Ok(Some(parsed));
            }
        }
    }
    Ok(None)
}

fn required_number(obj: &Map<String, Value>, field: &'static str) -> Result<f64> {
    optional_number(obj, field)?.ok_or(Error::MissingFields)
}

fn optional_number(obj: &Map<String, Value>, field: &'static str) -> Result<Option<f64>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| Error::invalid_field(field, "expected a number")),
    }
}

fn counter_field(obj: &Map<String, Value>, field: &'static str) -> Result<u64> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| Error::invalid_field(field, "expected a non-negative integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(text: &str) -> Result<Sample> {
        Sample::decode(text.as_bytes())
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(normalize_timestamp(None), 0);
        assert_eq!(normalize_timestamp(Some(1_700_000_000)), 1_700_000_000_000);
        assert_eq!(normalize_timestamp(Some(1_700_000_000_123)), 1_700_000_000_123);
        assert_eq!(normalize_timestamp(Some(0)), 0);
        assert_eq!(normalize_timestamp(Some(-5)), -5000);
    }

    #[test]
    fn test_normalize_timestamp_extremes() {
        assert_eq!(normalize_timestamp(Some(i64::MIN)), i64::MIN);
        assert_eq!(normalize_timestamp(Some(i64::MAX)), i64::MAX);
        assert_eq!(
            normalize_timestamp(Some(-SECONDS_THRESHOLD)),
            -SECONDS_THRESHOLD
        );
        assert_eq!(
            normalize_timestamp(Some(1 - SECONDS_THRESHOLD)),
            (1 - SECONDS_THRESHOLD) * 1000
        );
    }

    #[test]
    fn test_null_timestamp_falls_back_to_time() {
        let sample =
            decode(r#"{"latitude": 1, "longitude": 2, "timestamp": null, "time": 1700000000}"#)
                .unwrap();
        assert_eq!(sample.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(sample.location().unwrap().timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_sample_timestamp_per_kind() {
        let telephony = decode(r#"{"telephony": {}, "time": 3}"#).unwrap();
        assert_eq!(telephony.timestamp_ms(), 3000);

        let traffic = decode(r#"{"traffic": {"total_bytes": 1}, "timestamp": 1700000000001}"#)
            .unwrap();
        assert_eq!(traffic.timestamp_ms(), 1_700_000_000_001);
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&json!({"latitude": 1.0, "longitude": 2.0})),
            Some(SampleKind::Location)
        );
        assert_eq!(
            classify(&json!({"telephony": {"cell_id": 7}})),
            Some(SampleKind::Telephony)
        );
        assert_eq!(
            classify(&json!({"traffic": {"total_bytes": 1}})),
            Some(SampleKind::Traffic)
        );
        assert_eq!(classify(&json!({"traffic": {}})), None);
        assert_eq!(classify(&json!({"latitude": 1.0})), None);
        assert_eq!(classify(&json!([1, 2])), None);
        assert_eq!(classify(&json!("ping")), None);
    }

    #[test]
    fn test_decode_minimal_location() {
        let sample = decode(r#"{"latitude": 1.5, "longitude": 2.5}"#).unwrap();
        assert_eq!(sample.kind(), SampleKind::Location);
        let fix = sample.location().unwrap();
        assert_eq!(fix.latitude, 1.5);
        assert_eq!(fix.longitude, 2.5);
        assert_eq!(fix.altitude, 0.0);
        assert_eq!(fix.accuracy, 0.0);
        assert_eq!(fix.timestamp_ms, 0);
        assert!(sample.traffic().is_none());
    }

    #[test]
    fn test_decode_location_with_seconds_time() {
        let sample =
            decode(r#"{"latitude": 1, "longitude": 2, "altitude": 30.5, "time": 1700000000}"#)
                .unwrap();
        let fix = sample.location().unwrap();
        assert_eq!(fix.altitude, 30.5);
        assert_eq!(fix.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_timestamp_wins_over_time() {
        let sample = decode(
            r#"{"latitude": 1, "longitude": 2, "timestamp": 1700000000999, "time": 5}"#,
        )
        .unwrap();
        assert_eq!(sample.location().unwrap().timestamp_ms, 1_700_000_000_999);
    }

    #[test]
    fn test_decode_keeps_payload_verbatim() {
        let text = r#"{"longitude":2.5,"latitude":1.5,"provider":"gps"}"#;
        let sample = decode(text).unwrap();
        assert_eq!(serde_json::to_string(sample.payload()).unwrap(), text);
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(decode("not json"), Err(Error::InvalidPayload(_))));
        assert!(matches!(
            Sample::decode(&[0xff, 0xfe]),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_missing_fields() {
        assert!(matches!(
            decode(r#"{"latitude": 1.5}"#),
            Err(Error::MissingFields)
        ));
        assert!(matches!(decode("42"), Err(Error::MissingFields)));
        assert!(matches!(decode(r#"{"latitude": null, "longitude": 1}"#), Err(Error::MissingFields)));
    }

    #[test]
    fn test_decode_mistyped_latitude() {
        let err = decode(r#"{"latitude": "north", "longitude": 2}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "latitude", .. }));
    }

    #[test]
    fn test_decode_mistyped_timestamp() {
        let err = decode(r#"{"latitude": 1, "longitude": 2, "time": "noon"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "time", .. }));
    }

    #[test]
    fn test_decode_traffic_defaults() {
        let sample = decode(r#"{"traffic": {"total_bytes": 500}, "timestamp": 1700000000000}"#)
            .unwrap();
        assert_eq!(sample.kind(), SampleKind::Traffic);
        let record = sample.traffic().unwrap();
        assert_eq!(record.total_bytes, 500);
        assert_eq!(record.mobile_rx_bytes, 0);
        assert_eq!(record.total_tx_bytes, 0);
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert!(record.top_apps.is_none());
    }

    #[test]
    fn test_decode_negative_counter() {
        let err = decode(r#"{"traffic": {"total_bytes": -1}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "total_bytes", .. }));
    }

    #[test]
    fn test_location_with_nested_traffic() {
        let sample = decode(
            r#"{"latitude": 1, "longitude": 2, "traffic": {"mobile_rx_bytes": 10}}"#,
        )
        .unwrap();
        assert_eq!(sample.kind(), SampleKind::Location);
        assert_eq!(sample.traffic().unwrap().mobile_rx_bytes, 10);
    }

    #[test]
    fn test_telephony_sample() {
        let sample = decode(r#"{"telephony": {"operator": "x"}, "time": 12}"#).unwrap();
        assert_eq!(sample.kind(), SampleKind::Telephony);
        assert!(sample.location().is_none());
        let Sample::Telephony(telephony) = sample else {
            panic!("expected telephony");
        };
        assert_eq!(telephony.timestamp_ms, 12_000);
    }

    #[test]
    fn test_ranked_apps() {
        let record = TrafficRecord {
            top_apps: Some(json!({
                "com.small": {"app_name": "Small", "total_bytes": 10},
                "com.big": {"app_name": "Big", "rx_bytes": 60, "tx_bytes": 40, "total_bytes": 100},
                "com.broken": 3
            })),
            ..TrafficRecord::default()
        };
        let ranked = record.ranked_apps();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "com.big");
        assert_eq!(ranked[0].1.rx_bytes, 60);
        assert_eq!(ranked[1].1.app_name, "Small");
    }

    #[test]
    fn test_traffic_record_serialization_omits_missing_apps() {
        let record = TrafficRecord {
            total_bytes: 500,
            ..TrafficRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["total_bytes"], 500);
        assert_eq!(json["mobile_tx_bytes"], 0);
        assert!(json.get("top_apps").is_none());
    }

    #[test]
    fn test_sample_kind_display() {
        assert_eq!(SampleKind::Location.to_string(), "location");
        assert_eq!(SampleKind::Telephony.to_string(), "telephony");
        assert_eq!(SampleKind::Traffic.to_string(), "traffic");
    }
}
