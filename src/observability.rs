use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "clinicslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "clinicslot_query_duration_seconds";

/// Counter: reservation attempts from create/reschedule. Labels: op, outcome.
pub const RESERVATIONS_TOTAL: &str = "clinicslot_reservations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "clinicslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "clinicslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "clinicslot_connections_rejected_total";

/// Counter: statements refused by the role gate.
pub const PERMISSION_DENIED_TOTAL: &str = "clinicslot_permission_denied_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "clinicslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "clinicslot_wal_flush_batch_size";

/// Counter: completed WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "clinicslot_wal_compactions_total";

/// Install the fmt subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateAppointment(_) => "create_appointment",
        Command::ConfirmAppointment { .. } => "confirm_appointment",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::RescheduleAppointment { .. } => "reschedule_appointment",
        Command::SelectAppointment { .. } => "select_appointment",
        Command::SelectPatientAppointments { .. } => "select_patient_appointments",
        Command::SelectAllAppointments => "select_all_appointments",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectDoctors { .. } => "select_doctors",
        Command::SelectExport { .. } => "select_export",
        Command::SelectCounts => "select_counts",
    }
}
