//! Sender Arbiter: the single-active-sender state machine.
//!
//! Mirrors `telemetry_core::state::State`'s shape: mutator methods
//! take the event's data plus whatever registry/ledger context they need, and
//! return a small result enum describing exactly what the caller must do
//! (send which message to whom, rearm or cancel the inactivity timer). The
//! arbiter itself never touches a socket or a channel.

use super::constants::{RECLAIM_IDLE_THRESHOLD_MS, RECONNECT_PROMOTION_WINDOW_MS, SENDER_INACTIVITY_TIMEOUT_MS};
use super::ledger::Ledger;
use super::registry::Registry;
use super::types::ConnId;

/// A promotion, with the incumbent it displaced (if any).
#[derive(Debug, PartialEq, Eq)]
pub struct Promotion {
    pub promoted: ConnId,
    /// Set when `apply_promotion` itself must still tell this producer it was
    /// demoted (hot-reconnect reclaim, dashboard `promoteUser`). `None` when
    /// there was no incumbent, or the caller already notified it separately.
    pub demoted_incumbent: Option<ConnId>,
    /// Whether this promotion replaces a previously active sender (even one
    /// that has since disconnected), as opposed to the very first promotion
    /// out of Idle. A changeover means the promoted producer itself also
    /// receives `sender_changed` ahead of its own `promoted` message.
    pub is_changeover: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// `promoted` requires the promoted producer to be told `promoted`, every
    /// other producer `sender_changed`, and dashboards `senderPromoted`. If
    /// `demoted_incumbent` is set, that producer additionally gets `demoted`.
    Promoted(Promotion),
    /// The handshaking producer stays an observer; it alone gets `welcome`
    /// (role=observer) and `observer_mode` naming `current_sender`.
    Observer { current_sender: ConnId },
    /// Send `rejected` with this reason to the requester; no state change.
    Rejected(&'static str),
    /// A `data` frame from the active sender was accepted; rearm the
    /// inactivity timer. No message beyond the caller's own `ack`.
    DataAccepted,
    /// `demoted` requires the demoted producer be told so. If `promoted` is
    /// set, that producer is promoted per the `Promoted` semantics above
    /// (minus a second `demoted` message — only one is ever sent per event).
    Demoted {
        demoted: ConnId,
        promoted: Option<ConnId>,
    },
    /// Nothing changed and nothing need be sent (e.g. `demoteUser` while Idle).
    NoOp,
}

pub struct Arbiter {
    active_sender: Option<ConnId>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self { active_sender: None }
    }

    pub fn active_sender(&self) -> Option<&ConnId> {
        self.active_sender.as_ref()
    }

    pub fn is_active_sender(&self, id: &ConnId) -> bool {
        self.active_sender.as_ref() == Some(id)
    }

    /// A producer has just sent its `handshake`.
    pub fn on_handshake(
        &mut self,
        producer_id: &ConnId,
        device_id: &str,
        ledger: &Ledger,
        registry: &Registry,
        now: u64,
    ) -> Outcome {
        let incumbent = match self.active_sender.clone() {
            None => {
                self.active_sender = Some(producer_id.clone());
                return Outcome::Promoted(Promotion {
                    promoted: producer_id.clone(),
                    demoted_incumbent: None,
                    is_changeover: false,
                });
            }
            Some(incumbent) => incumbent,
        };

        let hot_reconnect_eligible = ledger.get(device_id).is_some_and(|session| {
            session.was_active_sender
                && now.saturating_sub(session.disconnected_at) <= RECONNECT_PROMOTION_WINDOW_MS
        });

        if !hot_reconnect_eligible {
            return Outcome::Observer {
                current_sender: incumbent,
            };
        }

        let incumbent_silent = registry
            .producer(&incumbent)
            .and_then(|rec| rec.last_data_time)
            .map_or(true, |last| now.saturating_sub(last) > RECLAIM_IDLE_THRESHOLD_MS);

        if incumbent_silent {
            self.active_sender = Some(producer_id.clone());
            Outcome::Promoted(Promotion {
                promoted: producer_id.clone(),
                demoted_incumbent: Some(incumbent),
                is_changeover: true,
            })
        } else {
            Outcome::Observer {
                current_sender: incumbent,
            }
        }
    }

    /// A `data` frame arrived from `producer_id`.
    pub fn on_data(&mut self, producer_id: &ConnId) -> Outcome {
        if self.is_active_sender(producer_id) {
            Outcome::DataAccepted
        } else {
            Outcome::Rejected("You are not the active data sender")
        }
    }

    /// `request_sender_role` from `requester`.
    pub fn on_request_sender_role(
        &mut self,
        requester: &ConnId,
        registry: &Registry,
        now: u64,
    ) -> Outcome {
        let eligible = match &self.active_sender {
            None => true,
            Some(active) => registry
                .producer(active)
                .and_then(|rec| rec.last_data_time)
                .map_or(true, |last| now.saturating_sub(last) > SENDER_INACTIVITY_TIMEOUT_MS),
        };

        if !eligible {
            return Outcome::Rejected("Another producer already holds the sender role");
        }

        let demoted_incumbent = self.active_sender.take();
        let is_changeover = demoted_incumbent.is_some();
        self.active_sender = Some(requester.clone());
        Outcome::Promoted(Promotion {
            promoted: requester.clone(),
            demoted_incumbent,
            is_changeover,
        })
    }

    /// The inactivity timer fired: demote the current sender and attempt to
    /// promote a replacement.
    pub fn on_inactivity_timeout(&mut self, registry: &Registry) -> Outcome {
        let demoted = match self.active_sender.take() {
            Some(id) => id,
            None => return Outcome::NoOp,
        };
        let promoted = registry.most_recently_connected_producer_excluding(&demoted);
        self.active_sender = promoted.clone();
        Outcome::Demoted { demoted, promoted }
    }

    /// A producer connection closed. Returns the newly-promoted producer, if
    /// any, when the departing producer was the active sender; `None`
    /// otherwise (including when the departing producer wasn't the sender).
    pub fn on_producer_disconnected(
        &mut self,
        disconnecting: &ConnId,
        registry: &Registry,
    ) -> Option<ConnId> {
        if self.active_sender.as_ref() != Some(disconnecting) {
            return None;
        }
        let promoted = registry.most_recently_connected_producer_excluding(disconnecting);
        self.active_sender = promoted.clone();
        promoted
    }

    /// Dashboard `promoteUser`: unconditional, overrides freshness checks.
    pub fn promote_unconditionally(&mut self, target: ConnId) -> Outcome {
        let demoted_incumbent = self
            .active_sender
            .clone()
            .filter(|incumbent| incumbent != &target);
        let is_changeover = demoted_incumbent.is_some();
        self.active_sender = Some(target.clone());
        Outcome::Promoted(Promotion {
            promoted: target,
            demoted_incumbent,
            is_changeover,
        })
    }

    /// Dashboard `demoteUser`: unconditional; no automatic replacement.
    pub fn demote_unconditionally(&mut self) -> Outcome {
        match self.active_sender.take() {
            Some(id) => Outcome::Demoted {
                demoted: id,
                promoted: None,
            },
            None => Outcome::NoOp,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::types::{Outbound, ProducerRecord};

    fn registry_with_producer(id: &str, connected_at: u64, last_data_time: Option<u64>) -> Registry {
        let mut registry = Registry::new();
        let (tx, _rx): (Outbound, _) = flume::bounded(8);
        registry
            .register_producer(ProducerRecord {
                conn_id: ConnId::from_raw(id),
                device_id: format!("device-{id}"),
                username: None,
                remote_addr: None,
                connected_at,
                data_count: 0,
                last_data_time,
                outbound: tx,
            })
            .unwrap();
        registry
    }

    #[test]
    fn first_handshake_while_idle_promotes_unconditionally() {
        let mut arbiter = Arbiter::new();
        let ledger = Ledger::new();
        let registry = Registry::new();
        let a = ConnId::from_raw("a");

        let outcome = arbiter.on_handshake(&a, "D1", &ledger, &registry, 1_000);
        assert_eq!(
            outcome,
            Outcome::Promoted(Promotion {
                promoted: a.clone(),
                demoted_incumbent: None,
                is_changeover: false,
            })
        );
        assert!(arbiter.is_active_sender(&a));
    }

    #[test]
    fn second_handshake_while_active_becomes_observer() {
        let mut arbiter = Arbiter::new();
        let ledger = Ledger::new();
        let registry = registry_with_producer("a", 0, Some(0));
        let a = ConnId::from_raw("a");
        let b = ConnId::from_raw("b");

        arbiter.on_handshake(&a, "D1", &ledger, &registry, 0);
        let outcome = arbiter.on_handshake(&b, "D2", &ledger, &registry, 500);
        assert_eq!(
            outcome,
            Outcome::Observer {
                current_sender: a.clone()
            }
        );
        assert!(arbiter.is_active_sender(&a));
    }

    #[test]
    fn hot_reconnect_reclaims_role_when_incumbent_has_been_silent() {
        let mut ledger = Ledger::new();
        // B is the current, silent-for-20s incumbent.
        let registry = registry_with_producer("b", 0, Some(0));
        let a = ConnId::from_raw("a");
        let b = ConnId::from_raw("b");
        let mut arbiter = Arbiter::new();
        arbiter.active_sender = Some(b.clone());

        ledger.record_disconnect("D1".into(), a.clone(), None, 5, true, 10_000);

        // 20s after B's last data, and 30s after A's disconnect (within the 60s window).
        let outcome = arbiter.on_handshake(&a, "D1", &ledger, &registry, 40_000);
        assert_eq!(
            outcome,
            Outcome::Promoted(Promotion {
                promoted: a.clone(),
                demoted_incumbent: Some(b.clone()),
                is_changeover: true,
            })
        );
        assert!(arbiter.is_active_sender(&a));
    }

    #[test]
    fn hot_reconnect_stays_observer_when_incumbent_is_fresh() {
        let mut ledger = Ledger::new();
        let registry = registry_with_producer("b", 0, Some(39_500));
        let a = ConnId::from_raw("a");
        let b = ConnId::from_raw("b");
        let mut arbiter = Arbiter::new();
        arbiter.active_sender = Some(b.clone());

        ledger.record_disconnect("D1".into(), a.clone(), None, 5, true, 10_000);

        let outcome = arbiter.on_handshake(&a, "D1", &ledger, &registry, 40_000);
        assert_eq!(
            outcome,
            Outcome::Observer {
                current_sender: b.clone()
            }
        );
    }

    #[test]
    fn data_from_non_active_producer_is_rejected() {
        let mut arbiter = Arbiter::new();
        let a = ConnId::from_raw("a");
        let b = ConnId::from_raw("b");
        arbiter.active_sender = Some(a.clone());

        assert_eq!(arbiter.on_data(&a), Outcome::DataAccepted);
        assert_eq!(
            arbiter.on_data(&b),
            Outcome::Rejected("You are not the active data sender")
        );
    }

    #[test]
    fn inactivity_timeout_demotes_and_promotes_most_recently_connected() {
        let mut registry = Registry::new();
        let (tx, _rx): (Outbound, _) = flume::bounded(8);
        registry
            .register_producer(ProducerRecord {
                conn_id: ConnId::from_raw("b"),
                device_id: "D2".into(),
                username: None,
                remote_addr: None,
                connected_at: 50,
                data_count: 0,
                last_data_time: None,
                outbound: tx,
            })
            .unwrap();
        let a = ConnId::from_raw("a");
        let b = ConnId::from_raw("b");
        let mut arbiter = Arbiter::new();
        arbiter.active_sender = Some(a.clone());

        let outcome = arbiter.on_inactivity_timeout(&registry);
        assert_eq!(
            outcome,
            Outcome::Demoted {
                demoted: a,
                promoted: Some(b.clone())
            }
        );
        assert!(arbiter.is_active_sender(&b));
    }

    #[test]
    fn inactivity_timeout_with_lone_sender_enters_idle() {
        let registry = Registry::new();
        let a = ConnId::from_raw("a");
        let mut arbiter = Arbiter::new();
        arbiter.active_sender = Some(a.clone());

        let outcome = arbiter.on_inactivity_timeout(&registry);
        assert_eq!(
            outcome,
            Outcome::Demoted {
                demoted: a,
                promoted: None
            }
        );
        assert!(arbiter.active_sender().is_none());
    }

    #[test]
    fn repeated_demote_user_while_idle_is_a_no_op() {
        let mut arbiter = Arbiter::new();
        assert_eq!(arbiter.demote_unconditionally(), Outcome::NoOp);
        assert_eq!(arbiter.demote_unconditionally(), Outcome::NoOp);
    }
}
