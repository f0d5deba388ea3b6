use std::{collections::BTreeMap, fmt, sync::Arc, time::SystemTime};

/// Unit reported for instruments that were created without an explicit unit.
pub const DEFAULT_UNIT: &str = "1";

/// Attributes attached to an instrument.
///
/// Attributes are captured once, when the instrument is created, and define its dimensional identity on export.
pub type Attributes = BTreeMap<String, String>;

/// The kind of an instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    /// Value is the running sum of every applied delta.
    Counter,

    /// Value is the most recently recorded value.
    Gauge,
}

impl InstrumentKind {
    /// Returns a short, lowercase name for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::Gauge => "gauge",
        }
    }

    /// Returns `true` if values of this kind are exported as a cumulative sum rather than an instantaneous value.
    pub const fn is_cumulative(self) -> bool {
        matches!(self, InstrumentKind::Counter)
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a registered instrument.
///
/// Identifiers are allocated by the meter and are unique for its lifetime. Names are not: two instruments may share a
/// name and are still tracked, and exported, independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentId(u64);

impl InstrumentId {
    pub(crate) const fn new(raw: u64) -> Self {
        InstrumentId(raw)
    }

    /// Returns the raw identifier.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// The immutable part of an instrument.
///
/// A descriptor is written once at creation and shared between the meter worker and every handle, so it can be read
/// from any thread without synchronization.
#[derive(Debug, PartialEq, Eq)]
pub struct Descriptor {
    kind: InstrumentKind,
    name: String,
    description: String,
    unit: Option<String>,
    attributes: Attributes,
}

impl Descriptor {
    pub(crate) fn new(
        kind: InstrumentKind,
        name: String,
        description: String,
        unit: Option<String>,
        attributes: Attributes,
    ) -> Self {
        Descriptor { kind, name, description, unit, attributes }
    }

    /// Returns the kind of the instrument.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Returns the name of the instrument.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description of the instrument, which may be empty.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the unit of the instrument.
    ///
    /// Instruments created without a unit report [`DEFAULT_UNIT`].
    pub fn unit(&self) -> &str {
        self.unit.as_deref().unwrap_or(DEFAULT_UNIT)
    }

    /// Returns the attributes captured when the instrument was created.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// A single update to a single instrument.
///
/// For counters, `amount` is added to the current value. For gauges, it replaces it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Mutation {
    pub target: InstrumentId,
    pub amount: i64,
    pub captured_at: SystemTime,
}

/// A registered instrument, as held by the meter worker.
///
/// Only the worker mutates the value and last update time. Transports see instruments through a shared borrow while
/// an export is in progress.
#[derive(Debug)]
pub struct Instrument {
    id: InstrumentId,
    descriptor: Arc<Descriptor>,
    value: i64,
    last_update: Option<SystemTime>,
}

impl Instrument {
    pub(crate) fn new(id: InstrumentId, descriptor: Arc<Descriptor>) -> Self {
        Instrument { id, descriptor, value: 0, last_update: None }
    }

    /// Returns the identity of the instrument.
    pub fn id(&self) -> InstrumentId {
        self.id
    }

    /// Returns the immutable descriptor of the instrument.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Returns the current value.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Returns the capture time of the most recently applied update, if any update has been applied.
    pub fn last_update(&self) -> Option<SystemTime> {
        self.last_update
    }

    /// Returns an owned, point-in-time copy of the instrument.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            descriptor: Arc::clone(&self.descriptor),
            value: self.value,
            last_update: self.last_update,
        }
    }

    pub(crate) fn apply(&mut self, mutation: &Mutation) {
        debug_assert_eq!(mutation.target, self.id);

        // Counters accept negative deltas: no monotonicity is enforced here.
        match self.descriptor.kind {
            InstrumentKind::Counter => self.value = self.value.wrapping_add(mutation.amount),
            InstrumentKind::Gauge => self.value = mutation.amount,
        }
        self.last_update = Some(mutation.captured_at);
    }
}

/// An owned, point-in-time copy of an instrument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    descriptor: Arc<Descriptor>,
    value: i64,
    last_update: Option<SystemTime>,
}

impl Snapshot {
    /// Returns the immutable descriptor of the instrument.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Returns the value at the time the snapshot was taken.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Returns the capture time of the most recently applied update, if any.
    pub fn last_update(&self) -> Option<SystemTime> {
        self.last_update
    }
}
