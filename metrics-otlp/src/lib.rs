//! An in-process meter that accumulates integer counters and gauges and periodically exports them to an
//! [OpenTelemetry][otel] collector over OTLP.
//!
//! [otel]: https://opentelemetry.io/docs/specs/otlp/
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_otlp::MeterBuilder;
//! // Create a meter, which spawns the background worker that owns every instrument and exports them to the
//! // collector on a fixed schedule.
//! let meter = MeterBuilder::new("checkout")
//!     .with_endpoint("localhost:4317")
//!     .build()
//!     .expect("failed to build meter");
//!
//! // Instruments are created through the meter, and updated through their handles from any thread.
//! let requests = meter
//!     .int64_counter("requests_total")
//!     .with_description("Total number of requests served.")
//!     .with_attributes([("route", "/cart")])
//!     .build();
//! requests.add(1);
//!
//! let in_flight = meter.int64_gauge("requests_in_flight").build();
//! in_flight.record(12);
//! ```
//!
//! # Design
//!
//! ## Single owner
//!
//! Every instrument is owned by a single background worker thread. Handles never touch instrument state directly:
//! creating an instrument, updating it, or reading it back all send a message to the worker over a bounded queue, and
//! the worker applies those messages one at a time. Export cycles run on the same thread, between two messages, so an
//! export always sees a consistent view of every instrument without any locking.
//!
//! Messages sent from one thread are applied in the order they were sent. In particular, an update sent through a
//! freshly created handle is always applied after the instrument's registration. Messages sent from different threads
//! are interleaved in an unspecified order.
//!
//! ## Backpressure
//!
//! Both inbound queues (registrations and updates) are bounded, 256 messages each by default. When a queue is full,
//! the producing call blocks until the worker catches up: nothing is ever dropped, and no error is raised.
//!
//! While an export cycle is in flight, the worker applies no updates. Against a slow or unreachable collector, the
//! queues can fill up and stall every producer in the process until the transport gives up, which is bounded by the
//! request timeout of each batch. Tune the queue capacity and request timeout accordingly.
//!
//! ## Export
//!
//! On every tick of the export interval, 60 seconds by default, the registry is split into batches of at most 500
//! records and sent to the collector sequentially. Each record carries the instrument's name, description, unit,
//! attributes, current value and the capture time of its latest update. Counters are exported as cumulative sums and
//! gauges as instantaneous values.
//!
//! A batch that fails to send is logged and dropped without retry. Instruments are never reset by an export, so the
//! next cycle includes their current values again.
//!
//! # Features
//!
//! - `grpc` (default): the built-in OTLP/gRPC transport, [`GrpcTransport`]. Without it, meters are built with
//!   [`MeterBuilder::build_with_transport`] and a custom [`Transport`].
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{
    BuildError, MeterBuilder, DEFAULT_ENDPOINT, DEFAULT_EXPORT_INTERVAL, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCOPE_VERSION, ENDPOINT_KEY,
    EXPORT_INTERVAL_KEY,
};

mod exporter;
pub use self::exporter::{ExportRequest, ExportStats, InstrumentationScope, Resource};

mod handles;
pub use self::handles::{Counter, Gauge, InstrumentBuilder, Meter};

mod instrument;
pub use self::instrument::{
    Attributes, Descriptor, Instrument, InstrumentId, InstrumentKind, Snapshot, DEFAULT_UNIT,
};

mod transport;
#[cfg(feature = "grpc")]
#[cfg_attr(docsrs, doc(cfg(feature = "grpc")))]
pub use self::transport::GrpcTransport;
pub use self::transport::{Transport, TransportError};

mod worker;
