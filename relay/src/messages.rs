//! Wire message envelopes, one tagged enum per direction/role pair, the same
//! pattern `common::json::node_message`'s `Payload` uses (there tagged on
//! `msg`; here on `type`, per the external wire contract).

use crate::core::stats::StatsSnapshot;
use crate::core::types::ConnId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Sender,
    Observer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Orientation {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// The `data` field of an inbound `data` frame. Sensor fields beyond `id` and
/// `timestamp` are all optional; unrecognized extra fields are preserved via
/// `fields` so they survive into the bulk/listener fan-out untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct DataPayload {
    pub id: Value,
    pub timestamp: u64,
    pub orientation: Option<Orientation>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ProducerInbound {
    #[serde(rename = "handshake")]
    Handshake {
        client: Option<String>,
        version: Option<String>,
        timestamp: Option<u64>,
        #[serde(rename = "deviceId")]
        device_id: Option<String>,
        username: Option<String>,
    },
    #[serde(rename = "data")]
    Data { data: DataPayload },
    #[serde(rename = "request_sender_role")]
    RequestSenderRole {},
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DashboardInbound {
    #[serde(rename = "getStats")]
    GetStats {},
    #[serde(rename = "kickUser")]
    KickUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "promoteUser")]
    PromoteUser {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "demoteUser")]
    DemoteUser {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProducerOutbound {
    #[serde(rename = "welcome")]
    Welcome { role: SenderRole },
    #[serde(rename = "observer_mode")]
    ObserverMode {
        #[serde(rename = "currentSender")]
        current_sender: ConnId,
    },
    #[serde(rename = "promoted")]
    Promoted { role: SenderRole },
    #[serde(rename = "demoted")]
    Demoted {},
    #[serde(rename = "sender_changed")]
    SenderChanged {
        #[serde(rename = "activeSender")]
        active_sender: ConnId,
    },
    #[serde(rename = "ack")]
    Ack { received: Value },
    #[serde(rename = "rejected")]
    Rejected { reason: &'static str },
    #[serde(rename = "kicked")]
    Kicked {},
    #[serde(rename = "server_shutdown")]
    ServerShutdown {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DashboardOutbound {
    #[serde(rename = "stats")]
    Stats {
        #[serde(flatten)]
        snapshot: StatsSnapshot,
    },
    #[serde(rename = "userConnected")]
    UserConnected {
        #[serde(rename = "userId")]
        user_id: ConnId,
        username: Option<String>,
    },
    #[serde(rename = "userDisconnected")]
    UserDisconnected {
        #[serde(rename = "userId")]
        user_id: ConnId,
    },
    #[serde(rename = "senderPromoted")]
    SenderPromoted {
        #[serde(rename = "userId")]
        user_id: ConnId,
    },
    #[serde(rename = "dataReceived")]
    DataReceived {
        #[serde(rename = "userId")]
        user_id: ConnId,
        timestamp: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ListenerOutbound {
    #[serde(rename = "listener_connected")]
    ListenerConnected {},
    #[serde(rename = "sensor_data")]
    SensorData {
        #[serde(rename = "producerId")]
        producer_id: ConnId,
        username: Option<String>,
        timestamp: u64,
        id: Value,
        orientation: Option<SerializableOrientation>,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    #[serde(rename = "stats")]
    Stats {
        #[serde(flatten)]
        snapshot: StatsSnapshot,
    },
    #[serde(rename = "server_shutdown")]
    ServerShutdown {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OrientationOutbound {
    #[serde(rename = "orientation_listener_connected")]
    OrientationListenerConnected {},
    #[serde(rename = "orientation_data")]
    OrientationData {
        timestamp: u64,
        #[serde(rename = "producerId")]
        producer_id: ConnId,
        username: Option<String>,
        orientation: SerializableOrientation,
    },
    #[serde(rename = "server_shutdown")]
    ServerShutdown {},
}

/// `Orientation` mirrored with `Serialize` for outbound use; kept distinct
/// from the inbound-only `Orientation` so the wire-in/wire-out types don't
/// have to share derives neither side needs.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SerializableOrientation {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl From<&Orientation> for SerializableOrientation {
    fn from(o: &Orientation) -> Self {
        Self {
            alpha: o.alpha,
            beta: o.beta,
            gamma: o.gamma,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BulkOutbound {
    #[serde(rename = "bulk_listener_connected")]
    BulkListenerConnected {
        #[serde(rename = "batchInterval")]
        batch_interval: u64,
        #[serde(rename = "maxBatchSize")]
        max_batch_size: usize,
    },
    #[serde(rename = "bulk_data_batch")]
    BulkDataBatch {
        #[serde(rename = "batchSize")]
        batch_size: usize,
        timestamp: u64,
        records: Vec<crate::core::types::BulkRecord>,
    },
    #[serde(rename = "server_shutdown")]
    ServerShutdown {},
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handshake_deserializes_with_optional_fields_absent() {
        let json = r#"{"type":"handshake","client":"pocket-parrot","version":"1.0"}"#;
        let msg: ProducerInbound = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            ProducerInbound::Handshake {
                device_id: None,
                username: None,
                ..
            }
        ));
    }

    #[test]
    fn data_frame_preserves_unrecognized_fields() {
        let json = r#"{"type":"data","data":{"id":"1","timestamp":1000,"gps":{"lat":1.0,"lon":2.0}}}"#;
        let msg: ProducerInbound = serde_json::from_str(json).unwrap();
        match msg {
            ProducerInbound::Data { data } => {
                assert!(data.fields.contains_key("gps"));
                assert!(data.orientation.is_none());
            }
            _ => panic!("expected Data variant"),
        }
    }

    #[test]
    fn dashboard_kick_user_deserializes() {
        let json = r#"{"type":"kickUser","userId":"user_1_abc"}"#;
        let msg: DashboardInbound = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, DashboardInbound::KickUser { user_id } if user_id == "user_1_abc"));
    }

    #[test]
    fn promoted_serializes_with_type_tag() {
        let msg = ProducerOutbound::Promoted {
            role: SenderRole::Sender,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"promoted""#));
        assert!(json.contains(r#""role":"sender""#));
    }

    #[test]
    fn rejected_carries_reason() {
        let msg = ProducerOutbound::Rejected {
            reason: "You are not the active data sender",
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("You are not the active data sender"));
    }
}
