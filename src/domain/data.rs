use super::exception::ExceptionData;
use super::sanitize::{MAX_VALUE_LENGTH, truncate_chars};
use super::serde_helpers::{default_schema_version, duration, finite, finite_opt};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Severity of a trace or exception. Encoded on the wire as 0..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SeverityLevel {
    Verbose,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
}

impl From<SeverityLevel> for u8 {
    fn from(level: SeverityLevel) -> Self {
        match level {
            SeverityLevel::Verbose => 0,
            SeverityLevel::Information => 1,
            SeverityLevel::Warning => 2,
            SeverityLevel::Error => 3,
            SeverityLevel::Critical => 4,
        }
    }
}

impl TryFrom<u8> for SeverityLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(SeverityLevel::Verbose),
            1 => Ok(SeverityLevel::Information),
            2 => Ok(SeverityLevel::Warning),
            3 => Ok(SeverityLevel::Error),
            4 => Ok(SeverityLevel::Critical),
            other => Err(format!("unknown severity level {other}")),
        }
    }
}

impl From<tracing::Level> for SeverityLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => SeverityLevel::Verbose,
            tracing::Level::INFO => SeverityLevel::Information,
            tracing::Level::WARN => SeverityLevel::Warning,
            tracing::Level::ERROR => SeverityLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DataPointKind {
    #[default]
    Measurement,
    Aggregation,
}

impl From<DataPointKind> for u8 {
    fn from(kind: DataPointKind) -> Self {
        match kind {
            DataPointKind::Measurement => 0,
            DataPointKind::Aggregation => 1,
        }
    }
}

impl TryFrom<u8> for DataPointKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataPointKind::Measurement),
            1 => Ok(DataPointKind::Aggregation),
            other => Err(format!("unknown data point kind {other}")),
        }
    }
}

/// Free-form string properties. Values are truncated to 8192 characters on
/// the way in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let mut value = value.into();
        truncate_chars(&mut value, MAX_VALUE_LENGTH);
        self.0.insert(key.into(), value)
    }

    /// Inserts only when the key is absent; call-site properties win over defaults.
    pub fn insert_default(&mut self, key: &str, value: &str) {
        if !self.0.contains_key(key) {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

/// Named numeric measurements. Non-finite values fail serialization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Measurements(BTreeMap<String, f64>);

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Measurements {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Serialize for Measurements {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            finite::check::<S>(*value)?;
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub message: String,
    #[serde(default = "default_schema_version")]
    pub ver: u32,
    #[serde(default)]
    pub severity_level: SeverityLevel,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Measurements::is_empty")]
    pub measurements: Measurements,
}

impl MessageData {
    pub fn new(message: impl Into<String>, severity_level: SeverityLevel) -> Self {
        Self {
            message: message.into(),
            ver: default_schema_version(),
            severity_level,
            properties: Properties::new(),
            measurements: Measurements::new(),
        }
    }
}

/// A single measurement or a pre-aggregated metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub name: String,
    #[serde(with = "finite")]
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ns: String,
    #[serde(default)]
    pub kind: DataPointKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, with = "finite_opt", skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, with = "finite_opt", skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, with = "finite_opt", skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
}

impl DataPoint {
    pub fn measurement(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            ns: String::new(),
            kind: DataPointKind::Measurement,
            count: None,
            min: None,
            max: None,
            std_dev: None,
        }
    }

    /// Aggregated point over `samples`; `value` is their sum.
    pub fn aggregation(name: impl Into<String>, samples: &[f64]) -> Option<Self> {
        let count = samples.len();
        if count == 0 {
            return None;
        }
        let sum: f64 = samples.iter().sum();
        let mean = sum / count as f64;
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            name: name.into(),
            value: sum,
            ns: String::new(),
            kind: DataPointKind::Aggregation,
            count: Some(count as u64),
            min: Some(min),
            max: Some(max),
            std_dev: Some(variance.sqrt()),
        })
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.ns = ns.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub metrics: Vec<DataPoint>,
    #[serde(default = "default_schema_version")]
    pub ver: u32,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl MetricData {
    pub fn new(metrics: Vec<DataPoint>) -> Self {
        Self {
            metrics,
            ver: default_schema_version(),
            properties: Properties::new(),
        }
    }

    pub fn single(name: impl Into<String>, value: f64) -> Self {
        Self::new(vec![DataPoint::measurement(name, value)])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub name: String,
    #[serde(default = "default_schema_version")]
    pub ver: u32,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Measurements::is_empty")]
    pub measurements: Measurements,
}

impl EventData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ver: default_schema_version(),
            properties: Properties::new(),
            measurements: Measurements::new(),
        }
    }
}

/// An outbound call made by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDependencyData {
    pub name: String,
    #[serde(with = "duration")]
    pub duration: Duration,
    pub success: bool,
    #[serde(default = "default_schema_version")]
    pub ver: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Measurements::is_empty")]
    pub measurements: Measurements,
}

impl RemoteDependencyData {
    pub fn new(name: impl Into<String>, duration: Duration, success: bool) -> Self {
        Self {
            name: name.into(),
            duration,
            success,
            ver: default_schema_version(),
            id: None,
            result_code: None,
            data: None,
            dependency_type: None,
            target: None,
            properties: Properties::new(),
            measurements: Measurements::new(),
        }
    }
}

/// An inbound request handled by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub id: String,
    #[serde(with = "duration")]
    pub duration: Duration,
    pub response_code: String,
    pub success: bool,
    #[serde(default = "default_schema_version")]
    pub ver: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Measurements::is_empty")]
    pub measurements: Measurements,
}

impl RequestData {
    pub fn new(
        id: impl Into<String>,
        duration: Duration,
        response_code: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            id: id.into(),
            duration,
            response_code: response_code.into(),
            success,
            ver: default_schema_version(),
            source: None,
            name: None,
            url: None,
            properties: Properties::new(),
            measurements: Measurements::new(),
        }
    }
}

/// Payload container, discriminated on the wire by `baseType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "baseType", content = "baseData")]
pub enum Data {
    #[serde(rename = "MessageData")]
    Message(MessageData),
    #[serde(rename = "ExceptionData")]
    Exception(ExceptionData),
    #[serde(rename = "MetricData")]
    Metric(MetricData),
    #[serde(rename = "EventData")]
    Event(EventData),
    #[serde(rename = "RemoteDependencyData")]
    RemoteDependency(RemoteDependencyData),
    #[serde(rename = "RequestData")]
    Request(RequestData),
}

impl Data {
    pub fn base_type(&self) -> &'static str {
        match self {
            Data::Message(_) => "MessageData",
            Data::Exception(_) => "ExceptionData",
            Data::Metric(_) => "MetricData",
            Data::Event(_) => "EventData",
            Data::RemoteDependency(_) => "RemoteDependencyData",
            Data::Request(_) => "RequestData",
        }
    }

    /// Envelope `name` for this payload kind.
    pub fn envelope_name(&self) -> &'static str {
        match self {
            Data::Message(_) => "Microsoft.ApplicationInsights.Message",
            Data::Exception(_) => "Microsoft.ApplicationInsights.Exception",
            Data::Metric(_) => "Microsoft.ApplicationInsights.Metric",
            Data::Event(_) => "Microsoft.ApplicationInsights.Event",
            Data::RemoteDependency(_) => "Microsoft.ApplicationInsights.RemoteDependency",
            Data::Request(_) => "Microsoft.ApplicationInsights.Request",
        }
    }

    pub fn properties(&self) -> &Properties {
        match self {
            Data::Message(d) => &d.properties,
            Data::Exception(d) => &d.properties,
            Data::Metric(d) => &d.properties,
            Data::Event(d) => &d.properties,
            Data::RemoteDependency(d) => &d.properties,
            Data::Request(d) => &d.properties,
        }
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        match self {
            Data::Message(d) => &mut d.properties,
            Data::Exception(d) => &mut d.properties,
            Data::Metric(d) => &mut d.properties,
            Data::Event(d) => &mut d.properties,
            Data::RemoteDependency(d) => &mut d.properties,
            Data::Request(d) => &mut d.properties,
        }
    }
}

impl From<MessageData> for Data {
    fn from(value: MessageData) -> Self {
        Data::Message(value)
    }
}

impl From<ExceptionData> for Data {
    fn from(value: ExceptionData) -> Self {
        Data::Exception(value)
    }
}

impl From<MetricData> for Data {
    fn from(value: MetricData) -> Self {
        Data::Metric(value)
    }
}

impl From<EventData> for Data {
    fn from(value: EventData) -> Self {
        Data::Event(value)
    }
}

impl From<RemoteDependencyData> for Data {
    fn from(value: RemoteDependencyData) -> Self {
        Data::RemoteDependency(value)
    }
}

impl From<RequestData> for Data {
    fn from(value: RequestData) -> Self {
        Data::Request(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_payload_shape() {
        let mut msg = MessageData::new("disk almost full", SeverityLevel::Warning);
        msg.properties.insert("logger", "storage");

        let value = serde_json::to_value(Data::from(msg)).unwrap();
        assert_eq!(
            value,
            json!({
                "baseType": "MessageData",
                "baseData": {
                    "message": "disk almost full",
                    "ver": 2,
                    "severityLevel": 2,
                    "properties": {"logger": "storage"}
                }
            })
        );
    }

    #[test]
    fn test_dependency_duration_and_type_field() {
        let mut dep = RemoteDependencyData::new("GET /users", Duration::from_millis(250), true);
        dep.dependency_type = Some("HTTP".to_string());
        dep.result_code = Some("200".to_string());

        let value = serde_json::to_value(Data::from(dep)).unwrap();
        let base = &value["baseData"];
        assert_eq!(value["baseType"], "RemoteDependencyData");
        assert_eq!(base["duration"], "00:00:00.250000");
        assert_eq!(base["type"], "HTTP");
        assert_eq!(base["resultCode"], "200");
        assert!(base.get("id").is_none());
    }

    #[test]
    fn test_request_duration_with_days() {
        let req = RequestData::new(
            "req-1",
            Duration::from_secs(86_400 + 61),
            "500",
            false,
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["duration"], "1.00:01:01.000000");
        assert_eq!(value["responseCode"], "500");
    }

    #[test]
    fn test_metric_aggregation_fields() {
        let point = DataPoint::aggregation("latency", &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(point.count, Some(3));
        assert_eq!(point.min, Some(1.0));
        assert_eq!(point.max, Some(3.0));
        assert_eq!(point.value, 6.0);

        let value = serde_json::to_value(MetricData::new(vec![point])).unwrap();
        assert_eq!(value["metrics"][0]["kind"], 1);
        assert!(value["metrics"][0]["stdDev"].as_f64().unwrap() > 0.0);
        assert!(DataPoint::aggregation("empty", &[]).is_none());
    }

    #[test]
    fn test_measurement_has_no_aggregate_fields() {
        let value = serde_json::to_value(MetricData::single("queue_depth", 7.0)).unwrap();
        let point = &value["metrics"][0];
        assert_eq!(point["kind"], 0);
        assert!(point.get("count").is_none());
        assert!(point.get("min").is_none());
    }

    #[test]
    fn test_non_finite_measurement_fails() {
        let mut event = EventData::new("checkout");
        event.measurements.insert("total", f64::NAN);
        assert!(serde_json::to_vec(&Data::from(event)).is_err());

        assert!(serde_json::to_vec(&MetricData::single("x", f64::INFINITY)).is_err());
    }

    #[test]
    fn test_properties_truncate_values() {
        let mut props = Properties::new();
        props.insert("big", "x".repeat(10_000));
        assert_eq!(props.get("big").unwrap().len(), MAX_VALUE_LENGTH);

        props.insert_default("big", "ignored");
        assert_eq!(props.get("big").unwrap().len(), MAX_VALUE_LENGTH);
    }

    #[test]
    fn test_data_deserializes_by_base_type() {
        let data: Data = serde_json::from_value(json!({
            "baseType": "EventData",
            "baseData": {"name": "signup", "ver": 2}
        }))
        .unwrap();
        assert_eq!(data.base_type(), "EventData");
        assert_eq!(data.envelope_name(), "Microsoft.ApplicationInsights.Event");
    }

    #[test]
    fn test_severity_wire_values() {
        assert_eq!(serde_json::to_value(SeverityLevel::Verbose).unwrap(), json!(0));
        assert_eq!(serde_json::to_value(SeverityLevel::Critical).unwrap(), json!(4));
        let level: SeverityLevel = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(level, SeverityLevel::Error);
        assert!(serde_json::from_value::<SeverityLevel>(json!(9)).is_err());
        assert_eq!(SeverityLevel::try_from(2), Ok(SeverityLevel::Warning));
        assert_eq!(
            SeverityLevel::try_from(7),
            Err("unknown severity level 7".to_string())
        );
    }
}
