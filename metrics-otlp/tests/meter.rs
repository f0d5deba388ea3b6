mod support;

use std::{
    thread,
    time::{Duration, SystemTime},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use metrics_otlp::{
    BuildError, ExportRequest, InstrumentKind, Meter, MeterBuilder, Transport, TransportError,
};
use proptest::{collection::vec as arb_vec, prelude::*};

use support::{find, recording_transport, Collector};

fn meter() -> (Meter, Collector) {
    meter_with(MeterBuilder::new("test"))
}

fn meter_with(builder: MeterBuilder) -> (Meter, Collector) {
    let (transport, collector) = recording_transport();
    let meter = builder.build_with_transport(transport).expect("failed to build meter");
    (meter, collector)
}

#[test]
fn counter_sums_signed_deltas() {
    let (meter, collector) = meter();

    let requests = meter.int64_counter("requests_total").build();
    requests.add(5);
    requests.add(-2);

    let stats = meter.flush().expect("worker should be running");
    assert_eq!(stats.batches_sent(), 1);

    let batches = collector.drain();
    let record = find(&batches, "requests_total");
    assert_eq!(record.value(), 3);
    assert_eq!(record.descriptor().unit(), "1");
    assert_eq!(record.descriptor().description(), "");
    assert_eq!(record.descriptor().kind(), InstrumentKind::Counter);
    assert!(record.descriptor().attributes().is_empty());
}

#[test]
fn gauge_keeps_last_value_and_capture_time() {
    let (meter, collector) = meter();

    let depth = meter.int64_gauge("queue_depth").with_unit("{item}").build();
    let first = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
    let last = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000);
    depth.record_at(40, first);
    depth.record_at(12, last);

    meter.flush().expect("worker should be running");

    let batches = collector.drain();
    let record = find(&batches, "queue_depth");
    assert_eq!(record.value(), 12);
    assert_eq!(record.last_update(), Some(last));
    assert_eq!(record.descriptor().unit(), "{item}");
    assert_eq!(record.descriptor().kind(), InstrumentKind::Gauge);
}

#[test]
fn exports_in_bounded_batches() {
    let (meter, collector) = meter_with(MeterBuilder::new("test").with_max_batch_size(500));

    let counters = (0..1200)
        .map(|i| meter.int64_counter(format!("counter_{i}")).build())
        .collect::<Vec<_>>();

    let stats = meter.flush().expect("worker should be running");
    assert_eq!(stats.batches_sent(), 3);
    assert_eq!(stats.records_sent(), 1200);

    let batches = collector.drain();
    let sizes = batches.iter().map(Vec::len).collect::<Vec<_>>();
    assert_eq!(sizes, vec![500, 500, 200]);

    // Every instrument exactly once, in registration order.
    let exported = batches.iter().flatten().map(|s| s.descriptor().name()).collect::<Vec<_>>();
    let registered = counters.iter().map(|c| c.descriptor().name()).collect::<Vec<_>>();
    assert_eq!(exported, registered);
}

#[test]
fn flush_includes_instruments_created_just_before() {
    for _ in 0..20 {
        let (meter, collector) = meter();

        let counters =
            (0..200).map(|i| meter.int64_counter(format!("idle_{i}")).build()).collect::<Vec<_>>();

        let stats = meter.flush().expect("worker should be running");
        assert_eq!(stats.records_sent(), counters.len() as u64);
        assert_eq!(collector.drain().iter().map(Vec::len).sum::<usize>(), counters.len());
    }
}

#[test]
fn failed_cycle_keeps_values_for_next_cycle() {
    let (meter, collector) = meter_with(MeterBuilder::new("test").with_max_batch_size(2));

    let hits = meter.int64_counter("hits").build();
    let misses = meter.int64_counter("misses").build();
    let size = meter.int64_gauge("size").build();
    hits.add(10);
    misses.add(1);
    size.record(7);

    collector.set_failing(true);
    let stats = meter.flush().expect("worker should be running");
    assert_eq!(stats.batches_failed(), 2);
    assert_eq!(stats.records_dropped(), 3);
    assert_eq!(collector.drain().len(), 2, "both batches should have been attempted");

    collector.set_failing(false);
    hits.add(5);

    let stats = meter.flush().expect("worker should survive failed exports");
    assert_eq!(stats.batches_sent(), 2);

    let batches = collector.drain();
    assert_eq!(find(&batches, "hits").value(), 15);
    assert_eq!(find(&batches, "misses").value(), 1);
    assert_eq!(find(&batches, "size").value(), 7);
}

#[test]
fn concurrent_updates_are_all_applied() {
    let (meter, _collector) = meter();
    let counter = meter.int64_counter("events_total").build();

    let workers = (0..8)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    counter.add(1);
                }
            })
        })
        .collect::<Vec<_>>();
    for worker in workers {
        worker.join().expect("producer thread panicked");
    }

    let snapshot = counter.snapshot().expect("worker should be running");
    assert_eq!(snapshot.value(), 8000);
}

#[test]
fn reads_are_idempotent_between_updates() {
    let (meter, _collector) = meter();
    let gauge = meter.int64_gauge("temperature").build();
    gauge.record(21);

    let first = gauge.snapshot().expect("worker should be running");
    meter.flush().expect("worker should be running");
    let second = gauge.snapshot().expect("worker should be running");

    assert_eq!(first, second);
    assert_eq!(second.value(), 21);
}

#[test]
fn updates_through_fresh_handles_are_never_lost() {
    // A tiny queue forces the worker to see updates for instruments whose registration it has not applied yet.
    let (meter, collector) = meter_with(MeterBuilder::new("test").with_queue_capacity(1));

    let counters = (0..300)
        .map(|i| {
            let counter = meter.int64_counter(format!("fresh_{i}")).build();
            counter.add(1);
            counter
        })
        .collect::<Vec<_>>();

    meter.flush().expect("worker should be running");

    let batches = collector.drain();
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), counters.len());
    assert!(batches.iter().flatten().all(|s| s.value() == 1));
}

/// A transport whose first export blocks until the test releases it.
struct GatedTransport {
    gate: Option<(Sender<()>, Receiver<()>)>,
}

impl Transport for GatedTransport {
    fn export(&mut self, _: &ExportRequest<'_>) -> Result<(), TransportError> {
        if let Some((entered, release)) = self.gate.take() {
            let _ = entered.send(());
            let _ = release.recv();
        }
        Ok(())
    }
}

#[test]
fn producers_block_while_export_is_stalled() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let transport = GatedTransport { gate: Some((entered_tx, release_rx)) };
    let meter = MeterBuilder::new("test")
        .with_queue_capacity(1)
        .build_with_transport(transport)
        .expect("failed to build meter");

    let counter = meter.int64_counter("queued").build();
    counter.snapshot().expect("worker should be running");

    let flusher = {
        let meter = meter.clone();
        thread::spawn(move || meter.flush())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("export never started");

    let (done_tx, done_rx) = bounded(1);
    let producer = {
        let counter = counter.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                counter.add(1);
            }
            let _ = done_tx.send(());
        })
    };

    // The queue holds a single update, so the producer cannot finish while the worker is exporting.
    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

    release_tx.send(()).expect("export should still be waiting");
    done_rx.recv_timeout(Duration::from_secs(5)).expect("producer never unblocked");
    producer.join().expect("producer thread panicked");

    let stats = flusher.join().expect("flush thread panicked").expect("worker should be running");
    assert_eq!(stats.records_sent(), 1);
    assert_eq!(counter.snapshot().map(|s| s.value()), Some(50));
}

#[test]
fn duplicate_names_are_tracked_independently() {
    let (meter, collector) = meter();

    let a = meter.int64_counter("jobs").with_attributes([("queue", "a")]).build();
    let b = meter.int64_counter("jobs").with_attributes([("queue", "b")]).build();
    assert_ne!(a.id(), b.id());
    a.add(1);
    b.add(2);

    meter.flush().expect("worker should be running");

    let batches = collector.drain();
    let values = batches
        .iter()
        .flatten()
        .map(|s| (s.descriptor().attributes()["queue"].clone(), s.value()))
        .collect::<Vec<_>>();
    assert_eq!(values, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
}

#[test]
fn first_attribute_set_wins() {
    let (meter, _collector) = meter();

    let counter = meter
        .int64_counter("logins")
        .with_description("Successful logins.")
        .with_attributes([("method", "password")])
        .with_attributes([("method", "sso"), ("region", "eu")])
        .build();

    let attributes = counter.descriptor().attributes();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes["method"], "password");
    assert_eq!(counter.descriptor().description(), "Successful logins.");
}

#[test]
fn scheduled_export_runs_on_interval() {
    let (meter, collector) =
        meter_with(MeterBuilder::new("test").with_export_interval(Duration::from_millis(50)));

    let counter = meter.int64_counter("ticks").build();
    counter.add(4);
    counter.snapshot().expect("worker should be running");
    collector.drain();

    let batch = collector
        .batches
        .recv_timeout(Duration::from_secs(5))
        .expect("no scheduled export within five seconds");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].value(), 4);
}

#[test]
fn handles_outlive_the_meter() {
    let (meter, _collector) = meter();
    let counter = meter.int64_counter("orphaned").build();
    drop(meter);

    counter.add(2);
    assert_eq!(counter.snapshot().map(|s| s.value()), Some(2));
}

#[test]
fn invalid_settings_fail_the_build() {
    let (transport, _collector) = recording_transport();
    let result = MeterBuilder::new("test").with_max_batch_size(0).build_with_transport(transport);
    assert!(matches!(result, Err(BuildError::ZeroSetting { .. })));
}

#[derive(Clone, Debug)]
enum Update {
    Add(usize, i64),
    Record(i64),
}

fn arb_update() -> impl Strategy<Value = Update> {
    prop_oneof![
        (0usize..2, -1_000i64..1_000).prop_map(|(idx, delta)| Update::Add(idx, delta)),
        any::<i64>().prop_map(Update::Record),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn exported_values_follow_update_laws(updates in arb_vec(arb_update(), 1..200)) {
        let (meter, collector) = meter();
        let counters = [meter.int64_counter("c0").build(), meter.int64_counter("c1").build()];
        let gauge = meter.int64_gauge("g").build();

        let mut sums = [0i64; 2];
        let mut last = None;
        for update in &updates {
            match *update {
                Update::Add(idx, delta) => {
                    counters[idx].add(delta);
                    sums[idx] += delta;
                }
                Update::Record(value) => {
                    gauge.record(value);
                    last = Some(value);
                }
            }
        }

        meter.flush().expect("worker should be running");
        let batches = collector.drain();

        prop_assert_eq!(find(&batches, "c0").value(), sums[0]);
        prop_assert_eq!(find(&batches, "c1").value(), sums[1]);
        prop_assert_eq!(find(&batches, "g").value(), last.unwrap_or(0));
    }
}
