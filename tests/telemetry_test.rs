//! Telemetry initialization and span helpers.

use fdrun::telemetry::batch::start_batch_span;
use fdrun::telemetry::metrics::RunnerInstruments;
use fdrun::telemetry::{TelemetryConfig, init_telemetry};
use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // attempt returning Err is acceptable here.
    let guard = init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "fdrun-test".to_string(),
        log_level: "debug".to_string(),
    });
    if let Ok(guard) = guard {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn batch_span_and_instruments_work_without_a_provider() {
    let span = start_batch_span(&Uuid::new_v4(), 3);
    span.in_scope(|| tracing::info!("inside batch span"));

    let instruments = RunnerInstruments::new();
    instruments.items_completed.add(1, &[]);
    instruments.batch_duration_ms.record(1.5, &[]);
}
