//! OTLP metrics messages, limited to what integer counters and gauges need.
//!
//! Field numbers follow `opentelemetry/proto/collector/metrics/v1/metrics_service.proto` and its imports.
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    exporter::ExportRequest,
    instrument::{Attributes, Instrument, InstrumentKind},
};

/// .proto:
/// ```protobuf
/// message ExportMetricsServiceRequest {
///   repeated opentelemetry.proto.metrics.v1.ResourceMetrics resource_metrics = 1;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct ExportMetricsServiceRequest {
    #[prost(message, repeated, tag = "1")]
    pub resource_metrics: Vec<ResourceMetrics>,
}

/// .proto:
/// ```protobuf
/// message ExportMetricsServiceResponse {
///   ExportMetricsPartialSuccess partial_success = 1;
/// }
///
/// message ExportMetricsPartialSuccess {
///   int64 rejected_data_points = 1;
///   string error_message = 2;
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct ExportMetricsServiceResponse {
    #[prost(message, optional, tag = "1")]
    pub partial_success: Option<ExportMetricsPartialSuccess>,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct ExportMetricsPartialSuccess {
    #[prost(int64, tag = "1")]
    pub rejected_data_points: i64,
    #[prost(string, tag = "2")]
    pub error_message: String,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct ResourceMetrics {
    #[prost(message, optional, tag = "1")]
    pub resource: Option<Resource>,
    #[prost(message, repeated, tag = "2")]
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct Resource {
    #[prost(message, repeated, tag = "1")]
    pub attributes: Vec<KeyValue>,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct ScopeMetrics {
    #[prost(message, optional, tag = "1")]
    pub scope: Option<InstrumentationScope>,
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct InstrumentationScope {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
}

/// .proto:
/// ```protobuf
/// message Metric {
///   string name = 1;
///   string description = 2;
///   string unit = 3;
///   oneof data {
///     Gauge gauge = 5;
///     Sum sum = 7;
///     // histogram = 9, exponential_histogram = 10, summary = 11 are not produced.
///   }
/// }
/// ```
#[derive(prost::Message, Clone, PartialEq)]
pub struct Metric {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(string, tag = "3")]
    pub unit: String,
    #[prost(oneof = "metric::Data", tags = "5, 7")]
    pub data: Option<metric::Data>,
}

pub mod metric {
    #[derive(prost::Oneof, Clone, PartialEq)]
    pub enum Data {
        #[prost(message, tag = "5")]
        Gauge(super::Gauge),
        #[prost(message, tag = "7")]
        Sum(super::Sum),
    }
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct Gauge {
    #[prost(message, repeated, tag = "1")]
    pub data_points: Vec<NumberDataPoint>,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct Sum {
    #[prost(message, repeated, tag = "1")]
    pub data_points: Vec<NumberDataPoint>,
    #[prost(enumeration = "AggregationTemporality", tag = "2")]
    pub aggregation_temporality: i32,
    #[prost(bool, tag = "3")]
    pub is_monotonic: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AggregationTemporality {
    Unspecified = 0,
    Delta = 1,
    Cumulative = 2,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct NumberDataPoint {
    #[prost(message, repeated, tag = "7")]
    pub attributes: Vec<KeyValue>,
    #[prost(fixed64, tag = "2")]
    pub start_time_unix_nano: u64,
    #[prost(fixed64, tag = "3")]
    pub time_unix_nano: u64,
    #[prost(oneof = "number_data_point::Value", tags = "4, 6")]
    pub value: Option<number_data_point::Value>,
}

pub mod number_data_point {
    #[derive(prost::Oneof, Clone, PartialEq)]
    pub enum Value {
        #[prost(double, tag = "4")]
        AsDouble(f64),
        #[prost(sfixed64, tag = "6")]
        AsInt(i64),
    }
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<AnyValue>,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct AnyValue {
    #[prost(oneof = "any_value::Value", tags = "1")]
    pub value: Option<any_value::Value>,
}

pub mod any_value {
    #[derive(prost::Oneof, Clone, PartialEq)]
    pub enum Value {
        #[prost(string, tag = "1")]
        StringValue(String),
    }
}

impl From<&ExportRequest<'_>> for ExportMetricsServiceRequest {
    fn from(request: &ExportRequest<'_>) -> Self {
        let resource = Resource { attributes: key_values(request.resource().attributes()) };
        let scope = InstrumentationScope {
            name: request.scope().name().to_string(),
            version: request.scope().version().to_string(),
        };

        ExportMetricsServiceRequest {
            resource_metrics: vec![ResourceMetrics {
                resource: Some(resource),
                scope_metrics: vec![ScopeMetrics {
                    scope: Some(scope),
                    metrics: request.instruments().iter().map(Metric::from).collect(),
                }],
            }],
        }
    }
}

impl From<&Instrument> for Metric {
    fn from(instrument: &Instrument) -> Self {
        let descriptor = instrument.descriptor();
        let point = NumberDataPoint {
            attributes: key_values(descriptor.attributes()),
            start_time_unix_nano: 0,
            time_unix_nano: unix_nanos(instrument.last_update()),
            value: Some(number_data_point::Value::AsInt(instrument.value())),
        };

        // Counters accept negative deltas, so sums are never flagged as monotonic.
        let data = match descriptor.kind() {
            InstrumentKind::Counter => metric::Data::Sum(Sum {
                data_points: vec![point],
                aggregation_temporality: AggregationTemporality::Cumulative as i32,
                is_monotonic: false,
            }),
            InstrumentKind::Gauge => metric::Data::Gauge(Gauge { data_points: vec![point] }),
        };

        Metric {
            name: descriptor.name().to_string(),
            description: descriptor.description().to_string(),
            unit: descriptor.unit().to_string(),
            data: Some(data),
        }
    }
}

fn key_values(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| KeyValue {
            key: key.clone(),
            value: Some(AnyValue { value: Some(any_value::Value::StringValue(value.clone())) }),
        })
        .collect()
}

/// Converts a capture time to nanoseconds since the epoch, with zero meaning "never updated".
fn unix_nanos(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}
