//! Prometheus text-format `/metrics` rendering, grounded in
//! `telemetry_core::main::return_prometheus_metrics`: hand-rolled text output
//! rather than the `prometheus` crate's global-registry style, since we only
//! ever have one snapshot (pulled fresh from the core loop per request) to
//! render rather than many independently-updated global counters.

use crate::core::stats::StatsSnapshot;
use std::fmt::Write;

/// Render a `StatsSnapshot` as a Prometheus exposition-format text body.
/// See <https://github.com/prometheus/docs/blob/master/content/docs/instrumenting/exposition_formats.md#text-format-details>.
pub fn render(snapshot: &StatsSnapshot) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "# HELP relay_active_producers Connected producers on /pocket-parrot.");
    let _ = writeln!(s, "# TYPE relay_active_producers gauge");
    let _ = writeln!(s, "relay_active_producers {}", snapshot.active_producers);

    let _ = writeln!(s, "# HELP relay_passive_listeners Connected subscribers on /listener.");
    let _ = writeln!(s, "# TYPE relay_passive_listeners gauge");
    let _ = writeln!(s, "relay_passive_listeners {}", snapshot.passive_listeners);

    let _ = writeln!(s, "# HELP relay_orientation_listeners Connected subscribers on /orientation.");
    let _ = writeln!(s, "# TYPE relay_orientation_listeners gauge");
    let _ = writeln!(s, "relay_orientation_listeners {}", snapshot.orientation_listeners);

    let _ = writeln!(s, "# HELP relay_bulk_listeners Connected subscribers on /bulk.");
    let _ = writeln!(s, "# TYPE relay_bulk_listeners gauge");
    let _ = writeln!(s, "relay_bulk_listeners {}", snapshot.bulk_listeners);

    let _ = writeln!(s, "# HELP relay_active_sender Whether an active sender is currently assigned.");
    let _ = writeln!(s, "# TYPE relay_active_sender gauge");
    let _ = writeln!(
        s,
        "relay_active_sender {}",
        if snapshot.active_sender_id.is_some() { 1 } else { 0 }
    );

    let _ = writeln!(s, "# HELP relay_total_data_points Total accepted data frames since start.");
    let _ = writeln!(s, "# TYPE relay_total_data_points counter");
    let _ = writeln!(s, "relay_total_data_points {}", snapshot.total_data_points);

    let _ = writeln!(s, "# HELP relay_data_points_last_minute Accepted data frames in the current rate window.");
    let _ = writeln!(s, "# TYPE relay_data_points_last_minute gauge");
    let _ = writeln!(s, "relay_data_points_last_minute {}", snapshot.data_points_last_minute);

    let _ = writeln!(s, "# HELP relay_bulk_queue_size Bulk records queued awaiting flush.");
    let _ = writeln!(s, "# TYPE relay_bulk_queue_size gauge");
    let _ = writeln!(s, "relay_bulk_queue_size {}", snapshot.bulk_queue_size);

    let _ = writeln!(s, "# HELP relay_uptime_seconds Seconds since the relay started.");
    let _ = writeln!(s, "# TYPE relay_uptime_seconds counter");
    let _ = writeln!(s, "relay_uptime_seconds {}", snapshot.uptime_seconds);

    s
}
