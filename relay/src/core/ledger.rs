//! Device Session Ledger: remembers the most recent disconnect of each device-id,
//! for reconnect continuity. Private state of the core loop; no `Mutex` is needed
//! here the way `telemetry_core`'s `BlockedAddrs` needs one, since this map is
//! never shared outside the single task that owns all core state (see DESIGN.md).

use super::types::{ConnId, DeviceId, DeviceSession};
use std::collections::HashMap;

pub struct Ledger {
    sessions: HashMap<DeviceId, DeviceSession>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Record a producer's disconnect. Overwrites any prior entry for this device-id;
    /// only the most recent disconnect matters.
    pub fn record_disconnect(
        &mut self,
        device_id: DeviceId,
        conn_id: ConnId,
        username: Option<String>,
        data_count: u64,
        was_active_sender: bool,
        now: u64,
    ) {
        self.sessions.insert(
            device_id,
            DeviceSession {
                disconnected_at: now,
                last_connection_id: conn_id,
                last_username: username,
                last_data_count: data_count,
                was_active_sender,
            },
        );
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceSession> {
        self.sessions.get(device_id)
    }
}
