use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created. Labels: status.
pub const BOOKINGS_CREATED_TOTAL: &str = "plait_bookings_created_total";

/// Counter: booking requests rejected by the capacity validator.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "plait_capacity_rejections_total";

/// Counter: successful provider assignments.
pub const ASSIGNMENTS_TOTAL: &str = "plait_assignments_total";

/// Counter: assignment failures (booking proceeds unassigned).
pub const ASSIGNMENT_FAILURES_TOTAL: &str = "plait_assignment_failures_total";

/// Counter: lifecycle transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "plait_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active studios (loaded engines).
pub const STUDIOS_ACTIVE: &str = "plait_studios_active";

/// Counter: delayed side-effect jobs dispatched to collaborators.
pub const JOBS_DISPATCHED_TOTAL: &str = "plait_jobs_dispatched_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "plait_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "plait_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the default fmt tracing subscriber for embedding applications
/// that have not set one up themselves.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
