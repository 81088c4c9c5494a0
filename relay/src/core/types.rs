//! Shared identifiers and per-connection records used across the core components.

use serde::Serialize;
use std::net::IpAddr;

/// A client-supplied identifier correlating a producer's disconnect/reconnect pairs.
pub type DeviceId = String;

/// Opaque, process-wide-unique connection identifier. For producers this takes the
/// `user_<millis>_<rand>` shape clients are shown; for other roles the shape is an
/// implementation detail since those ids never leave the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnId(String);

impl ConnId {
    /// Mint a fresh id with the given role prefix (`user`, `dash`, `listen`, `orient`, `bulk`).
    pub fn generate(prefix: &str) -> Self {
        use rand::Rng;
        let millis = relay_common::time::now();
        let rand_part: u32 = rand::thread_rng().gen();
        ConnId(format!("{prefix}_{millis}_{rand_part:08x}"))
    }

    /// Wrap an already-known id string (used by tests, and for ids received
    /// from dashboard commands that name an existing producer by its id).
    pub fn from_raw(s: impl Into<String>) -> Self {
        ConnId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound channel a connection task drains to forward already-serialized text
/// frames to its socket. Bounded and best-effort: a full channel means the consumer
/// is slow, and we drop rather than block the core loop (see the concurrency model).
pub type Outbound = flume::Sender<String>;

fn try_send(tx: &Outbound, text: String) {
    // A closed or full channel both mean "this subscriber doesn't get the message";
    // neither is an error worth propagating into the core loop.
    let _ = tx.try_send(text);
}

/// Serialize `msg` and best-effort deliver it, silently dropping on backpressure
/// or if the connection has already gone away.
pub fn send(tx: &Outbound, msg: &impl Serialize) {
    match serde_json::to_string(msg) {
        Ok(text) => try_send(tx, text),
        Err(e) => log::error!("failed to serialize outbound message: {}", e),
    }
}

/// A subscriber connection that has no producer-specific state: dashboards, passive
/// listeners, orientation listeners, and bulk listeners all look like this.
pub struct Subscriber {
    pub remote_addr: Option<IpAddr>,
    pub connected_at: u64,
    pub outbound: Outbound,
}

/// Live state for one connection on `/pocket-parrot`.
pub struct ProducerRecord {
    pub conn_id: ConnId,
    pub device_id: DeviceId,
    pub username: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub connected_at: u64,
    pub data_count: u64,
    pub last_data_time: Option<u64>,
    pub outbound: Outbound,
}

/// What we remember about a device-id after its most recent producer disconnects.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub disconnected_at: u64,
    pub last_connection_id: ConnId,
    pub last_username: Option<String>,
    pub last_data_count: u64,
    pub was_active_sender: bool,
}

/// One accepted `data` frame's non-orientation fields, queued for later batched
/// delivery to bulk-listeners.
#[derive(Debug, Clone, Serialize)]
pub struct BulkRecord {
    pub timestamp: u64,
    #[serde(rename = "producerId")]
    pub producer_id: ConnId,
    pub username: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}
