//! Statistics Aggregator: running counters plus an on-demand snapshot of
//! registry/arbiter state, matching the shape dashboards and passive
//! listeners are pushed after every accepted `data` frame and at every
//! connection/disconnection event.

use super::arbiter::Arbiter;
use super::registry::Registry;
use super::types::ConnId;
use serde::Serialize;

const RATE_RESET_INTERVAL_MS: u64 = 60_000;

pub struct Stats {
    total_data_points: u64,
    data_points_this_minute: u64,
    last_rate_reset: u64,
    server_start_time: u64,
}

impl Stats {
    pub fn new(now: u64) -> Self {
        Self {
            total_data_points: 0,
            data_points_this_minute: 0,
            last_rate_reset: now,
            server_start_time: now,
        }
    }

    /// Reset the per-minute counter if more than 60s have elapsed since the
    /// last reset. Called both on the periodic tick and lazily before
    /// recording a new data point, so a burst after a long quiet spell still
    /// starts its rate count from zero.
    pub fn maybe_reset_rate(&mut self, now: u64) {
        if now.saturating_sub(self.last_rate_reset) > RATE_RESET_INTERVAL_MS {
            self.data_points_this_minute = 0;
            self.last_rate_reset = now;
        }
    }

    pub fn record_data_point(&mut self, now: u64) {
        self.maybe_reset_rate(now);
        self.total_data_points += 1;
        self.data_points_this_minute += 1;
    }

    pub fn uptime_seconds(&self, now: u64) -> u64 {
        now.saturating_sub(self.server_start_time) / 1000
    }

    pub fn snapshot(
        &self,
        now: u64,
        registry: &Registry,
        arbiter: &Arbiter,
        bulk_queue_size: usize,
    ) -> StatsSnapshot {
        StatsSnapshot {
            active_producers: registry.producer_count(),
            passive_listeners: registry.passive_listener_count(),
            orientation_listeners: registry.orientation_listener_count(),
            bulk_listeners: registry.bulk_listener_count(),
            active_sender_id: arbiter.active_sender().cloned(),
            total_data_points: self.total_data_points,
            data_points_last_minute: self.data_points_this_minute,
            bulk_queue_size,
            uptime_seconds: self.uptime_seconds(now),
            producers: registry
                .producers()
                .map(|(id, rec)| ProducerStat {
                    id: id.clone(),
                    connected_at: rec.connected_at,
                    data_count: rec.data_count,
                    last_data_time: rec.last_data_time,
                    username: rec.username.clone(),
                    is_active_sender: arbiter.is_active_sender(id),
                    device_id: rec.device_id.clone(),
                    remote_address: rec.remote_addr.map(|a| a.to_string()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerStat {
    pub id: ConnId,
    pub connected_at: u64,
    pub data_count: u64,
    pub last_data_time: Option<u64>,
    pub username: Option<String>,
    pub is_active_sender: bool,
    pub device_id: String,
    pub remote_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub active_producers: usize,
    pub passive_listeners: usize,
    pub orientation_listeners: usize,
    pub bulk_listeners: usize,
    pub active_sender_id: Option<ConnId>,
    pub total_data_points: u64,
    pub data_points_last_minute: u64,
    pub bulk_queue_size: usize,
    pub uptime_seconds: u64,
    pub producers: Vec<ProducerStat>,
}
