use std::{num::NonZeroUsize, time::Duration};

use crossbeam_channel::bounded;
use thiserror::Error;

use crate::{
    exporter::{Exporter, InstrumentationScope, Resource},
    handles::Meter,
    instrument::Attributes,
    transport::Transport,
    worker::Worker,
};

/// Default interval between export cycles.
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "localhost:4317";

/// Default maximum number of metric records per export request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Default capacity of each inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default timeout for a single export request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default instrumentation scope version.
pub const DEFAULT_SCOPE_VERSION: &str = "1.0.0";

/// Configuration key for the export interval, as a duration string such as `60s` or `1m30s`.
pub const EXPORT_INTERVAL_KEY: &str = "OTEL_METRIC_EXPORT_INTERVAL";

/// Configuration key for the collector endpoint.
pub const ENDPOINT_KEY: &str = "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT";

/// Errors that could occur while building a meter.
///
/// A meter that fails to build never starts its worker: without a valid schedule and transport there is nothing to
/// export to.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the export interval.
    #[error("invalid export interval '{value}': {reason}")]
    InvalidExportInterval {
        /// The rejected value.
        value: String,

        /// Details about the parsing failure.
        reason: String,
    },

    /// Failed to parse the collector endpoint.
    #[error("invalid collector endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The rejected endpoint.
        endpoint: String,

        /// Details about the parsing failure.
        reason: String,
    },

    /// A setting that must be non-zero was set to zero.
    #[error("{setting} must be greater than zero")]
    ZeroSetting {
        /// Name of the offending setting.
        setting: &'static str,
    },

    /// Failed to create the runtime driving the transport.
    #[error("failed to create runtime for the collector transport: {0}")]
    FailedToCreateRuntime(String),

    /// Failed to spawn the background worker thread.
    #[error("failed to spawn background thread for meter worker: {0}")]
    Backend(String),
}

/// Builder for a [`Meter`].
///
/// All settings are fixed once the meter is built: the export schedule cannot be changed while the worker runs.
pub struct MeterBuilder {
    name: String,
    export_interval: Duration,
    endpoint: String,
    max_batch_size: usize,
    queue_capacity: usize,
    request_timeout: Duration,
    resource_attributes: Attributes,
    scope_version: String,
}

impl MeterBuilder {
    /// Creates a new `MeterBuilder` for a meter with the given name.
    ///
    /// The name is exported as the instrumentation scope name.
    pub fn new<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        let mut resource_attributes = Attributes::new();
        resource_attributes.insert("env".to_string(), "production".to_string());

        MeterBuilder {
            name: name.into(),
            export_interval: DEFAULT_EXPORT_INTERVAL,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resource_attributes,
            scope_version: DEFAULT_SCOPE_VERSION.to_string(),
        }
    }

    /// Applies settings from a key/value configuration source.
    ///
    /// [`EXPORT_INTERVAL_KEY`] and [`ENDPOINT_KEY`] are looked up; keys that are absent or empty leave the current
    /// setting untouched. To configure from the process environment:
    ///
    /// ```no_run
    /// # use metrics_otlp::MeterBuilder;
    /// let builder = MeterBuilder::new("my_app")
    ///     .with_config_lookup(|key| std::env::var(key).ok())
    ///     .expect("invalid meter configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// If the export interval is present but cannot be parsed as a non-zero duration, an error will be returned.
    pub fn with_config_lookup<F>(mut self, lookup: F) -> Result<Self, BuildError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(EXPORT_INTERVAL_KEY).filter(|v| !v.is_empty()) {
            self.export_interval = parse_export_interval(&value)?;
        }

        if let Some(endpoint) = lookup(ENDPOINT_KEY).filter(|v| !v.is_empty()) {
            self.endpoint = endpoint;
        }

        Ok(self)
    }

    /// Sets the interval between export cycles.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = interval;
        self
    }

    /// Sets the collector endpoint.
    ///
    /// Either `<host>:<port>` or `http://<host>:<port>`.
    ///
    /// Defaults to `localhost:4317`.
    #[must_use]
    pub fn with_endpoint<E>(mut self, endpoint: E) -> Self
    where
        E: Into<String>,
    {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the maximum number of metric records per export request.
    ///
    /// An export cycle over `N` instruments sends `ceil(N / max_batch_size)` requests.
    ///
    /// Defaults to 500.
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets the capacity of the registration and operation queues.
    ///
    /// When a queue is full, the call creating an instrument or updating it blocks until the worker catches up. Nothing
    /// is dropped. Since export cycles block the worker, a slow or unreachable collector can stall every producer once
    /// the queues saturate: size the queues for the update rate expected over one request timeout.
    ///
    /// Defaults to 256.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the timeout for a single export request.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Adds an attribute to the exported resource.
    ///
    /// If this method is called multiple times, the latest value for a given key is used.
    ///
    /// Defaults to a single `env=production` attribute.
    #[must_use]
    pub fn with_resource_attribute<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the exported instrumentation scope version.
    ///
    /// Defaults to `1.0.0`.
    #[must_use]
    pub fn with_scope_version<V>(mut self, version: V) -> Self
    where
        V: Into<String>,
    {
        self.scope_version = version.into();
        self
    }

    /// Builds the meter, exporting over OTLP/gRPC to the configured endpoint.
    ///
    /// The transport is created once and reused for every export cycle.
    ///
    /// # Errors
    ///
    /// If the endpoint cannot be parsed, any setting is invalid, or the transport runtime or worker thread cannot be
    /// created, an error will be returned.
    #[cfg(feature = "grpc")]
    #[cfg_attr(docsrs, doc(cfg(feature = "grpc")))]
    pub fn build(self) -> Result<Meter, BuildError> {
        self.validate()?;
        let transport = crate::transport::GrpcTransport::new(&self.endpoint, self.request_timeout)?;
        self.build_with_transport(transport)
    }

    /// Builds the meter with a custom transport.
    ///
    /// The configured endpoint and request timeout are ignored: they only apply to the built-in transport.
    ///
    /// # Errors
    ///
    /// If any setting is invalid, or the worker thread cannot be spawned, an error will be returned.
    pub fn build_with_transport<T>(self, transport: T) -> Result<Meter, BuildError>
    where
        T: Transport + Send + 'static,
    {
        let max_batch_size = self.validate()?;

        let (registrations_tx, registrations_rx) = bounded(self.queue_capacity);
        let (ops_tx, ops_rx) = bounded(self.queue_capacity);

        let exporter = Exporter::new(
            max_batch_size,
            Resource::new(self.resource_attributes),
            InstrumentationScope::new(self.name.clone(), self.scope_version),
        );
        let worker =
            Worker::new(registrations_rx, ops_rx, self.export_interval, exporter, transport);

        std::thread::Builder::new()
            .name("metrics-otlp-meter".to_string())
            .spawn(move || worker.run())
            .map_err(|e| BuildError::Backend(e.to_string()))?;

        Ok(Meter::new(self.name, registrations_tx, ops_tx))
    }

    /// Checks every setting, returning the maximum batch size the exporter is built with.
    fn validate(&self) -> Result<NonZeroUsize, BuildError> {
        if self.export_interval.is_zero() {
            return Err(BuildError::ZeroSetting { setting: "export interval" });
        }
        if self.queue_capacity == 0 {
            return Err(BuildError::ZeroSetting { setting: "queue capacity" });
        }
        NonZeroUsize::new(self.max_batch_size)
            .ok_or(BuildError::ZeroSetting { setting: "maximum batch size" })
    }
}

fn parse_export_interval(value: &str) -> Result<Duration, BuildError> {
    let interval = humantime::parse_duration(value.trim()).map_err(|e| {
        BuildError::InvalidExportInterval { value: value.to_string(), reason: e.to_string() }
    })?;

    if interval.is_zero() {
        return Err(BuildError::InvalidExportInterval {
            value: value.to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }

    Ok(interval)
}
