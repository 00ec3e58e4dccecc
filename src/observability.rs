use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "vetsched_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "vetsched_query_duration_seconds";

// ── Scheduling decisions ────────────────────────────────────────

/// Counter: visits written by create or reschedule. Labels: op.
pub const VISITS_ADMITTED_TOTAL: &str = "vetsched_visits_admitted_total";

/// Counter: create/reschedule refusals. Labels: op, reason.
pub const VISITS_REJECTED_TOTAL: &str = "vetsched_visits_rejected_total";

/// Counter: visit reloads because its date moved while we waited on a lock.
pub const LOCK_RETRIES_TOTAL: &str = "vetsched_lock_retries_total";

// ── Resource utilization ────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "vetsched_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vetsched_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vetsched_connections_rejected_total";

/// Gauge: per-date locks currently allocated.
pub const DATE_LOCKS_ACTIVE: &str = "vetsched_date_locks_active";

/// Counter: idle per-date locks evicted by the janitor.
pub const DATE_LOCKS_EVICTED_TOTAL: &str = "vetsched_date_locks_evicted_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::InsertOwner { .. } => "insert_owner",
        Command::UpdateOwner { .. } => "update_owner",
        Command::DeleteOwner { .. } => "delete_owner",
        Command::InsertAnimal { .. } => "insert_animal",
        Command::UpdateAnimal { .. } => "update_animal",
        Command::DeleteAnimal { .. } => "delete_animal",
        Command::InsertVisit { .. } => "insert_visit",
        Command::UpdateVisit { .. } => "update_visit",
        Command::DeleteVisit { .. } => "delete_visit",
        Command::SelectVisits { .. } => "select_visits",
        Command::SelectOwners { .. } => "select_owners",
        Command::SelectAnimals { .. } => "select_animals",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectDayLoad { .. } => "select_day_load",
    }
}
