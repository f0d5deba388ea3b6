use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::SystemTime,
};

use crossbeam_channel::{bounded, Sender};
use tracing::trace;

use crate::{
    exporter::ExportStats,
    instrument::{
        Attributes, Descriptor, Instrument, InstrumentId, InstrumentKind, Mutation, Snapshot,
    },
};

/// Operations carried on the meter's operation queue.
///
/// Reads and flushes travel on the same queue as updates so that they observe every update previously issued by the
/// same caller.
pub(crate) enum Op {
    Mutate(Mutation),
    Read { target: InstrumentId, reply: Sender<Option<Snapshot>> },
    Flush { reply: Sender<ExportStats> },
}

struct Shared {
    name: String,
    next_id: AtomicU64,
    registrations: Sender<Instrument>,
    ops: Sender<Op>,
}

/// Entry point for creating instruments.
///
/// A `Meter` is a lightweight handle to a background worker that owns every instrument it creates. Cloning is shallow:
/// clones create instruments on the same worker.
///
/// Meters are created with [`MeterBuilder`][crate::MeterBuilder].
#[derive(Clone)]
pub struct Meter {
    shared: Arc<Shared>,
}

impl Meter {
    pub(crate) fn new(name: String, registrations: Sender<Instrument>, ops: Sender<Op>) -> Self {
        Meter {
            shared: Arc::new(Shared { name, next_id: AtomicU64::new(0), registrations, ops }),
        }
    }

    /// Returns the name of the meter, which is also the name of the exported instrumentation scope.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Starts building a signed 64-bit counter.
    pub fn int64_counter<N>(&self, name: N) -> InstrumentBuilder<'_, Counter>
    where
        N: Into<String>,
    {
        InstrumentBuilder::new(self, InstrumentKind::Counter, name.into())
    }

    /// Starts building a signed 64-bit gauge.
    pub fn int64_gauge<N>(&self, name: N) -> InstrumentBuilder<'_, Gauge>
    where
        N: Into<String>,
    {
        InstrumentBuilder::new(self, InstrumentKind::Gauge, name.into())
    }

    /// Runs an export cycle immediately, outside of the regular schedule.
    ///
    /// The cycle runs after every instrument previously created from the calling thread has been registered, and every
    /// update previously issued from it has been applied. Blocks until the cycle has completed, and returns its outcome,
    /// or `None` if the worker is no longer running.
    pub fn flush(&self) -> Option<ExportStats> {
        let (reply, outcome) = bounded(1);
        self.shared.ops.send(Op::Flush { reply }).ok()?;
        outcome.recv().ok()
    }

    fn register(
        &self,
        kind: InstrumentKind,
        name: String,
        description: String,
        unit: Option<String>,
        attributes: Attributes,
    ) -> Handle {
        let id = InstrumentId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let descriptor = Arc::new(Descriptor::new(kind, name, description, unit, attributes));

        // Blocks while the registration queue is full.
        let instrument = Instrument::new(id, Arc::clone(&descriptor));
        if self.shared.registrations.send(instrument).is_err() {
            let instrument = id.as_u64();
            trace!(instrument, "Meter worker stopped; instrument will not be exported.");
        }

        Handle { id, descriptor, ops: self.shared.ops.clone() }
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter").field("name", &self.shared.name).finish_non_exhaustive()
    }
}

/// Builder for a counter or gauge.
///
/// Created with [`Meter::int64_counter`] or [`Meter::int64_gauge`].
#[must_use = "instruments are only registered once `build` is called"]
pub struct InstrumentBuilder<'m, H> {
    meter: &'m Meter,
    kind: InstrumentKind,
    name: String,
    description: String,
    unit: Option<String>,
    attributes: Option<Attributes>,
    _handle: PhantomData<fn() -> H>,
}

impl<'m, H> InstrumentBuilder<'m, H> {
    fn new(meter: &'m Meter, kind: InstrumentKind, name: String) -> Self {
        InstrumentBuilder {
            meter,
            kind,
            name,
            description: String::new(),
            unit: None,
            attributes: None,
            _handle: PhantomData,
        }
    }

    /// Sets the description.
    ///
    /// Defaults to an empty description.
    pub fn with_description<D>(mut self, description: D) -> Self
    where
        D: Into<String>,
    {
        self.description = description.into();
        self
    }

    /// Sets the unit.
    ///
    /// Defaults to `"1"`.
    pub fn with_unit<U>(mut self, unit: U) -> Self
    where
        U: Into<String>,
    {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the attributes of the instrument.
    ///
    /// Attribute sets are not merged: only the first set supplied is kept, and subsequent calls are ignored.
    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if self.attributes.is_none() {
            self.attributes =
                Some(attributes.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        }
        self
    }

    fn register(self) -> Handle {
        self.meter.register(
            self.kind,
            self.name,
            self.description,
            self.unit,
            self.attributes.unwrap_or_default(),
        )
    }
}

impl InstrumentBuilder<'_, Counter> {
    /// Registers the counter and returns its handle.
    ///
    /// The handle is usable immediately: updates sent through it are applied after the registration, even if the
    /// worker has not processed the registration yet. Blocks while the registration queue is full.
    pub fn build(self) -> Counter {
        Counter { handle: self.register() }
    }
}

impl InstrumentBuilder<'_, Gauge> {
    /// Registers the gauge and returns its handle.
    ///
    /// The handle is usable immediately: updates sent through it are applied after the registration, even if the
    /// worker has not processed the registration yet. Blocks while the registration queue is full.
    pub fn build(self) -> Gauge {
        Gauge { handle: self.register() }
    }
}

#[derive(Clone)]
struct Handle {
    id: InstrumentId,
    descriptor: Arc<Descriptor>,
    ops: Sender<Op>,
}

impl Handle {
    fn mutate(&self, amount: i64, captured_at: SystemTime) {
        let mutation = Mutation { target: self.id, amount, captured_at };
        if self.ops.send(Op::Mutate(mutation)).is_err() {
            trace!(instrument = self.id.as_u64(), "Meter worker stopped; dropping update.");
        }
    }

    fn snapshot(&self) -> Option<Snapshot> {
        let (reply, outcome) = bounded(1);
        self.ops.send(Op::Read { target: self.id, reply }).ok()?;
        outcome.recv().ok().flatten()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// A handle to a counter.
///
/// The counter's value is the running sum of every delta added through any of its handles. Deltas may be negative.
///
/// Handles are cheap to clone and can be shared freely across threads. Updates never fail from the caller's
/// perspective: they block only while the meter's operation queue is full.
#[derive(Clone, Debug)]
pub struct Counter {
    handle: Handle,
}

impl Counter {
    /// Adds `delta` to the counter, captured now.
    pub fn add(&self, delta: i64) {
        self.add_at(delta, SystemTime::now());
    }

    /// Adds `delta` to the counter, captured at the given time.
    pub fn add_at(&self, delta: i64, captured_at: SystemTime) {
        self.handle.mutate(delta, captured_at);
    }

    /// Returns the identity of the counter.
    pub fn id(&self) -> InstrumentId {
        self.handle.id
    }

    /// Returns the immutable descriptor of the counter.
    pub fn descriptor(&self) -> &Descriptor {
        &self.handle.descriptor
    }

    /// Reads the current state of the counter from the meter worker.
    ///
    /// The read observes every update previously issued from the calling thread. Returns `None` if the worker is no
    /// longer running.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.handle.snapshot()
    }
}

/// A handle to a gauge.
///
/// The gauge's value is the most recently recorded value.
///
/// Handles are cheap to clone and can be shared freely across threads. Updates never fail from the caller's
/// perspective: they block only while the meter's operation queue is full.
#[derive(Clone, Debug)]
pub struct Gauge {
    handle: Handle,
}

impl Gauge {
    /// Records `value`, captured now.
    pub fn record(&self, value: i64) {
        self.record_at(value, SystemTime::now());
    }

    /// Records `value`, captured at the given time.
    pub fn record_at(&self, value: i64, captured_at: SystemTime) {
        self.handle.mutate(value, captured_at);
    }

    /// Returns the identity of the gauge.
    pub fn id(&self) -> InstrumentId {
        self.handle.id
    }

    /// Returns the immutable descriptor of the gauge.
    pub fn descriptor(&self) -> &Descriptor {
        &self.handle.descriptor
    }

    /// Reads the current state of the gauge from the meter worker.
    ///
    /// The read observes every update previously issued from the calling thread. Returns `None` if the worker is no
    /// longer running.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.handle.snapshot()
    }
}
