use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use metrics_otlp::{ExportRequest, Snapshot, Transport, TransportError};

/// A transport that hands every batch it is given back to the test, as owned snapshots.
pub struct RecordingTransport {
    batches: Sender<Vec<Snapshot>>,
    failing: Arc<AtomicBool>,
}

/// The test's side of a [`RecordingTransport`].
pub struct Collector {
    pub batches: Receiver<Vec<Snapshot>>,
    failing: Arc<AtomicBool>,
}

impl Collector {
    /// Makes every subsequent export fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drains every batch received so far.
    pub fn drain(&self) -> Vec<Vec<Snapshot>> {
        self.batches.try_iter().collect()
    }
}

pub fn recording_transport() -> (RecordingTransport, Collector) {
    let (tx, rx) = unbounded();
    let failing = Arc::new(AtomicBool::new(false));
    (
        RecordingTransport { batches: tx, failing: Arc::clone(&failing) },
        Collector { batches: rx, failing },
    )
}

impl Transport for RecordingTransport {
    fn export(&mut self, request: &ExportRequest<'_>) -> Result<(), TransportError> {
        // Failed batches are still recorded, so tests can tell they were attempted.
        let _ = self.batches.send(request.instruments().iter().map(|i| i.snapshot()).collect());

        if self.failing.load(Ordering::SeqCst) {
            Err(TransportError::Connection { reason: "collector unavailable".to_string() })
        } else {
            Ok(())
        }
    }
}

/// Finds the only snapshot with the given name in a set of batches.
pub fn find<'a>(batches: &'a [Vec<Snapshot>], name: &str) -> &'a Snapshot {
    let mut matches = batches.iter().flatten().filter(|s| s.descriptor().name() == name);
    let found = matches.next().unwrap_or_else(|| panic!("no instrument named {name}"));
    assert!(matches.next().is_none(), "more than one instrument named {name}");
    found
}
