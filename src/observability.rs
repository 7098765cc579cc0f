use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "meftahi_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "meftahi_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "meftahi_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "meftahi_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "meftahi_connections_rejected_total";

/// Gauge: listings currently held in memory.
pub const LISTINGS_ACTIVE: &str = "meftahi_listings_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "meftahi_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "meftahi_wal_flush_batch_size";

/// Counter: WAL compactions run by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "meftahi_wal_compactions_total";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: reservation requests admitted as pending.
pub const RESERVATIONS_ADMITTED_TOTAL: &str = "meftahi_reservations_admitted_total";

/// Counter: reservation requests refused. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "meftahi_reservations_rejected_total";

/// Counter: stored periods skipped because their dates did not parse.
pub const MALFORMED_PERIODS_SKIPPED_TOTAL: &str = "meftahi_malformed_periods_skipped_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertListing { .. } => "insert_listing",
        Command::SetListingStatus { .. } => "set_listing_status",
        Command::DeleteListing { .. } => "delete_listing",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SetReservationStatus { .. } => "set_reservation_status",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::InsertVisit { .. } => "insert_visit",
        Command::SetVisitStatus { .. } => "set_visit_status",
        Command::CancelVisit { .. } => "cancel_visit",
        Command::SelectListings(_) => "select_listings",
        Command::SelectListingById { .. } => "select_listing_by_id",
        Command::SelectListingBySlug { .. } => "select_listing_by_slug",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectVisits { .. } => "select_visits",
        Command::SelectStats => "select_stats",
        Command::SelectBlockedDates { .. } => "select_blocked_dates",
        Command::SelectAdmissible { .. } => "select_admissible",
        Command::SelectDateBlocked { .. } => "select_date_blocked",
        Command::SelectFreeDates { .. } => "select_free_dates",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
