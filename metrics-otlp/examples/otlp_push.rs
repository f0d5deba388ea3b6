use std::{thread, time::Duration};

use metrics_otlp::MeterBuilder;

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let meter = MeterBuilder::new("otlp_push")
        .with_export_interval(Duration::from_secs(5))
        .with_config_lookup(|key| std::env::var(key).ok())
        .expect("invalid meter configuration")
        .with_resource_attribute("service.name", "otlp-push-example")
        .build()
        .expect("failed to build meter");

    let loops = meter
        .int64_counter("example_loops_total")
        .with_description("Iterations of the example loop.")
        .with_attributes([("system", "foo")])
        .build();
    let lucky = meter.int64_gauge("example_lucky_number").build();

    // Loop over and over, pretending to do some work.
    let mut n: i64 = 0;
    loop {
        loops.add(1);
        n = (n * 31 + 7) % 101;
        lucky.record(n);

        thread::sleep(Duration::from_millis(100));
    }
}
