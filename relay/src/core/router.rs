//! Fan-out Router: per-role broadcast helpers for an accepted `data` frame and
//! for periodic snapshots. Grounded in
//! `telemetry_core::aggregator::inner_loop`'s broadcast-to-a-role-set helpers,
//! which iterate a role's channel set and best-effort `try_send` rather than
//! block the core loop on one slow subscriber (see the concurrency model).

use super::batcher::Batcher;
use super::registry::Registry;
use super::stats::StatsSnapshot;
use super::types::{send, BulkRecord, ConnId};
use crate::messages::{
    BulkOutbound, DashboardOutbound, DataPayload, ListenerOutbound, OrientationOutbound,
};

/// Dispatch one accepted `data` frame. Performs, in order, the
/// orientation-immediate path, the bulk enqueue, the legacy full-payload
/// path, and the dashboard `dataReceived` notice. Returns `true` if this push
/// reached the bulk batcher's size trigger, so the caller can flush it
/// immediately afterward (preserving ordering: orientation before bulk).
pub fn dispatch_data(
    registry: &Registry,
    batcher: &mut Batcher,
    producer_id: &ConnId,
    username: Option<&str>,
    data: &DataPayload,
) -> bool {
    if let Some(orientation) = &data.orientation {
        let msg = OrientationOutbound::OrientationData {
            timestamp: data.timestamp,
            producer_id: producer_id.clone(),
            username: username.map(String::from),
            orientation: orientation.into(),
        };
        for (_, sub) in registry.orientation_listeners() {
            send(&sub.outbound, &msg);
        }
    }

    let size_triggered = batcher.push(BulkRecord {
        timestamp: data.timestamp,
        producer_id: producer_id.clone(),
        username: username.map(String::from),
        fields: data.fields.clone(),
    });

    let sensor_msg = ListenerOutbound::SensorData {
        producer_id: producer_id.clone(),
        username: username.map(String::from),
        timestamp: data.timestamp,
        id: data.id.clone(),
        orientation: data.orientation.as_ref().map(Into::into),
        fields: data.fields.clone(),
    };
    for (_, sub) in registry.passive_listeners() {
        send(&sub.outbound, &sensor_msg);
    }

    let received_msg = DashboardOutbound::DataReceived {
        user_id: producer_id.clone(),
        timestamp: data.timestamp,
    };
    for (_, sub) in registry.dashboards() {
        send(&sub.outbound, &received_msg);
    }

    size_triggered
}

/// Drain the batcher and emit a `bulk_data_batch` to every bulk-listener, if
/// there was anything queued. No-op (and queue left untouched) when the
/// batcher is empty, or when no bulk-listener is registered to receive the
/// batch — records accumulate rather than being discarded (see DESIGN.md).
pub fn flush_bulk(registry: &Registry, batcher: &mut Batcher, now: u64) {
    if registry.bulk_listener_count() == 0 {
        return;
    }
    let Some(records) = batcher.flush() else {
        return;
    };
    let msg = BulkOutbound::BulkDataBatch {
        batch_size: records.len(),
        timestamp: now,
        records,
    };
    for (_, sub) in registry.bulk_listeners() {
        send(&sub.outbound, &msg);
    }
}

/// Push a stats snapshot to dashboards and passive-listeners.
pub fn dispatch_stats(registry: &Registry, snapshot: &StatsSnapshot) {
    let dashboard_msg = DashboardOutbound::Stats {
        snapshot: snapshot.clone(),
    };
    for (_, sub) in registry.dashboards() {
        send(&sub.outbound, &dashboard_msg);
    }
    let listener_msg = ListenerOutbound::Stats {
        snapshot: snapshot.clone(),
    };
    for (_, sub) in registry.passive_listeners() {
        send(&sub.outbound, &listener_msg);
    }
}
