use std::num::NonZeroUsize;

use tracing::{debug, error};

use crate::{
    instrument::{Attributes, Instrument},
    transport::Transport,
};

/// The producing environment, attached to every export request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    attributes: Attributes,
}

impl Resource {
    pub(crate) fn new(attributes: Attributes) -> Self {
        Resource { attributes }
    }

    /// Returns the resource attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// The instrumentation scope, attached to every export request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentationScope {
    name: String,
    version: String,
}

impl InstrumentationScope {
    pub(crate) fn new(name: String, version: String) -> Self {
        InstrumentationScope { name, version }
    }

    /// Returns the scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the scope version.
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// A single batch of instruments, ready to be transmitted.
///
/// Requests borrow the meter's registry directly, so they are only valid for the duration of
/// [`Transport::export`][crate::Transport::export].
#[derive(Clone, Copy, Debug)]
pub struct ExportRequest<'a> {
    resource: &'a Resource,
    scope: &'a InstrumentationScope,
    instruments: &'a [Instrument],
}

impl<'a> ExportRequest<'a> {
    pub(crate) fn new(
        resource: &'a Resource,
        scope: &'a InstrumentationScope,
        instruments: &'a [Instrument],
    ) -> Self {
        ExportRequest { resource, scope, instruments }
    }

    /// Returns the resource describing the producing environment.
    pub fn resource(&self) -> &'a Resource {
        self.resource
    }

    /// Returns the instrumentation scope.
    pub fn scope(&self) -> &'a InstrumentationScope {
        self.scope
    }

    /// Returns the instruments in this batch, in registration order.
    pub fn instruments(&self) -> &'a [Instrument] {
        self.instruments
    }

    /// Returns the number of metric records in this batch.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Returns `true` if this batch carries no metric records.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

/// Outcome of a single export cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportStats {
    batches_sent: u64,
    batches_failed: u64,
    records_sent: u64,
    records_dropped: u64,
}

impl ExportStats {
    /// Returns the number of batches the collector accepted.
    pub fn batches_sent(&self) -> u64 {
        self.batches_sent
    }

    /// Returns the number of batches that failed to transmit.
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed
    }

    /// Returns the number of metric records the collector accepted.
    pub fn records_sent(&self) -> u64 {
        self.records_sent
    }

    /// Returns the number of metric records lost to failed batches.
    pub fn records_dropped(&self) -> u64 {
        self.records_dropped
    }

    /// Returns the number of batches attempted.
    pub fn batches(&self) -> u64 {
        self.batches_sent + self.batches_failed
    }

    fn track_batch_sent(&mut self, records: usize) {
        self.batches_sent += 1;
        self.records_sent += records as u64;
    }

    fn track_batch_failed(&mut self, records: usize) {
        self.batches_failed += 1;
        self.records_dropped += records as u64;
    }
}

/// Splits the registry into bounded batches and hands them to a transport.
///
/// The exporter retains nothing between cycles.
pub(crate) struct Exporter {
    max_batch_size: NonZeroUsize,
    resource: Resource,
    scope: InstrumentationScope,
}

impl Exporter {
    pub fn new(
        max_batch_size: NonZeroUsize,
        resource: Resource,
        scope: InstrumentationScope,
    ) -> Self {
        Exporter { max_batch_size, resource, scope }
    }

    /// Exports every instrument, in order, as `ceil(N / max_batch_size)` sequential requests.
    ///
    /// A failed batch is logged and dropped; the remaining batches are still attempted.
    pub fn export<T>(&self, instruments: &[Instrument], transport: &mut T) -> ExportStats
    where
        T: Transport + ?Sized,
    {
        let mut stats = ExportStats::default();

        for (batch, chunk) in instruments.chunks(self.max_batch_size.get()).enumerate() {
            let request = ExportRequest::new(&self.resource, &self.scope, chunk);
            match transport.export(&request) {
                Ok(()) => stats.track_batch_sent(chunk.len()),
                Err(e) => {
                    error!(error = %e, batch, records = chunk.len(), "Failed to export batch.");
                    stats.track_batch_failed(chunk.len());
                }
            }
        }

        debug!(
            instruments = instruments.len(),
            batches_sent = stats.batches_sent,
            batches_failed = stats.batches_failed,
            records_dropped = stats.records_dropped,
            "Finished export cycle."
        );

        stats
    }
}
