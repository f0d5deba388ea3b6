use std::{collections::HashMap, time::Duration};

use crossbeam_channel::{never, select, tick, Receiver};
use tracing::{debug, trace, trace_span, warn};

use crate::{
    exporter::Exporter,
    handles::Op,
    instrument::{Instrument, InstrumentId},
    transport::Transport,
};

/// Every registered instrument, in registration order.
///
/// The registry is append-only: instruments are never removed for the lifetime of the worker.
#[derive(Default)]
pub(crate) struct Registry {
    instruments: Vec<Instrument>,
    index: HashMap<InstrumentId, usize>,
}

impl Registry {
    pub fn register(&mut self, instrument: Instrument) {
        trace!(
            instrument = instrument.id().as_u64(),
            name = instrument.descriptor().name(),
            kind = %instrument.descriptor().kind(),
            "Registered instrument."
        );
        self.index.insert(instrument.id(), self.instruments.len());
        self.instruments.push(instrument);
    }

    /// Applies every registration still waiting in the queue.
    ///
    /// Handles are returned to callers as soon as their registration is enqueued, so an operation
    /// can be dequeued before the registrations it depends on. Any operation that looks at the
    /// registry runs this first.
    pub fn sync(&mut self, pending: &Receiver<Instrument>) {
        for instrument in pending.try_iter() {
            self.register(instrument);
        }
    }

    /// Looks up an instrument by identity, applying pending registrations if it is unknown.
    pub fn resolve(
        &mut self,
        id: InstrumentId,
        pending: &Receiver<Instrument>,
    ) -> Option<&mut Instrument> {
        if !self.index.contains_key(&id) {
            self.sync(pending);
        }

        let idx = *self.index.get(&id)?;
        self.instruments.get_mut(idx)
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }
}

/// The single owner of all instrument state.
///
/// The worker applies registrations, updates and export cycles one at a time, so no instrument is
/// ever observed mid-update and no locking is needed around instrument values.
pub(crate) struct Worker<T> {
    registrations: Receiver<Instrument>,
    ops: Receiver<Op>,
    export_interval: Duration,
    registry: Registry,
    exporter: Exporter,
    transport: T,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        registrations: Receiver<Instrument>,
        ops: Receiver<Op>,
        export_interval: Duration,
        exporter: Exporter,
        transport: T,
    ) -> Self {
        Worker {
            registrations,
            ops,
            export_interval,
            registry: Registry::default(),
            exporter,
            transport,
        }
    }

    /// Runs the worker until every meter and instrument handle has been dropped.
    pub fn run(self) {
        let Worker { registrations, ops, export_interval, mut registry, exporter, mut transport } =
            self;

        let ticker = tick(export_interval);
        let closed = never();
        let mut registrations_open = true;

        debug!(?export_interval, "Meter worker started.");

        loop {
            let _span = trace_span!("meter worker").entered();

            let pending = if registrations_open { &registrations } else { &closed };
            select! {
                recv(pending) -> msg => match msg {
                    Ok(instrument) => registry.register(instrument),
                    Err(_) => {
                        // Handles can still update existing instruments.
                        debug!("Meter dropped; no further instruments will be registered.");
                        registrations_open = false;
                    }
                },
                recv(ops) -> msg => match msg {
                    Ok(op) => {
                        handle_op(op, &mut registry, &registrations, &exporter, &mut transport);
                    }
                    Err(_) => {
                        let instruments = registry.len();
                        debug!(instruments, "All handles dropped; stopping meter worker.");
                        return;
                    }
                },
                recv(ticker) -> _ => {
                    registry.sync(&registrations);
                    let _ = exporter.export(registry.instruments(), &mut transport);
                },
            }
        }
    }
}

fn handle_op<T: Transport>(
    op: Op,
    registry: &mut Registry,
    pending: &Receiver<Instrument>,
    exporter: &Exporter,
    transport: &mut T,
) {
    match op {
        Op::Mutate(mutation) => match registry.resolve(mutation.target, pending) {
            Some(instrument) => instrument.apply(&mutation),
            None => {
                let instrument = mutation.target.as_u64();
                warn!(instrument, "Dropping update for unknown instrument.");
            }
        },
        Op::Read { target, reply } => {
            let snapshot = registry.resolve(target, pending).map(|i| i.snapshot());
            let _ = reply.send(snapshot);
        }
        Op::Flush { reply } => {
            registry.sync(pending);
            let stats = exporter.export(registry.instruments(), transport);
            let _ = reply.send(stats);
        }
    }
}
