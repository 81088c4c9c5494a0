//! The core event loop: a single `tokio::spawn`-ed task that owns the
//! Registry, Ledger, Arbiter, Batcher, and Stats outright and processes one
//! `CoreEvent` at a time from a unified channel, exactly as
//! `telemetry_core::aggregator::inner_loop::InnerLoop` owns its node state
//! and processes one `ToAggregator` message at a time. No `Mutex` anywhere
//! here: ownership by this single task is the serialization mechanism.

use super::arbiter::{Arbiter, Outcome, Promotion};
use super::batcher::Batcher;
use super::constants::{
    BATCH_INTERVAL_MS, RATE_RESET_INTERVAL_MS, SENDER_INACTIVITY_TIMEOUT_MS, STATUS_LOG_INTERVAL_MS,
};
use super::ledger::Ledger;
use super::registry::Registry;
use super::router;
use super::stats::{Stats, StatsSnapshot};
use super::types::{send, ConnId, Outbound, ProducerRecord, Subscriber};
use crate::messages::{
    BulkOutbound, DashboardInbound, DashboardOutbound, ListenerOutbound, OrientationOutbound,
    ProducerInbound, ProducerOutbound, SenderRole,
};
use std::net::IpAddr;
use std::time::Duration;

/// Everything the run loop (in `server.rs`) needs to react to after handling
/// one event: whether to (re)arm or cancel the single inactivity timer.
/// Every other timer (bulk flush, rate reset, status log) is level-triggered
/// off getter state the run loop already polls each tick, so it needs no
/// equivalent here.
#[derive(Debug, PartialEq, Eq)]
pub enum TimerAction {
    None,
    ArmInactivity(u64),
    CancelInactivity,
}

#[derive(Debug)]
pub enum CoreEvent {
    ProducerConnected {
        id: ConnId,
        remote_addr: Option<IpAddr>,
        outbound: Outbound,
        now: u64,
    },
    ProducerMessage {
        id: ConnId,
        msg: ProducerInbound,
        now: u64,
    },
    ProducerDisconnected {
        id: ConnId,
        now: u64,
    },
    DashboardConnected {
        id: ConnId,
        remote_addr: Option<IpAddr>,
        outbound: Outbound,
        now: u64,
    },
    DashboardMessage {
        id: ConnId,
        msg: DashboardInbound,
        now: u64,
    },
    DashboardDisconnected {
        id: ConnId,
        now: u64,
    },
    PassiveListenerConnected {
        id: ConnId,
        remote_addr: Option<IpAddr>,
        outbound: Outbound,
        now: u64,
    },
    PassiveListenerDisconnected {
        id: ConnId,
        now: u64,
    },
    OrientationListenerConnected {
        id: ConnId,
        remote_addr: Option<IpAddr>,
        outbound: Outbound,
        now: u64,
    },
    OrientationListenerDisconnected {
        id: ConnId,
        now: u64,
    },
    BulkListenerConnected {
        id: ConnId,
        remote_addr: Option<IpAddr>,
        outbound: Outbound,
        now: u64,
    },
    BulkListenerDisconnected {
        id: ConnId,
        now: u64,
    },
    InactivityTimeout {
        now: u64,
    },
    BulkFlushTick {
        now: u64,
    },
    RateResetTick {
        now: u64,
    },
    StatusLogTick {
        now: u64,
    },
    Shutdown {
        now: u64,
    },
    /// Lets the `/metrics` route pull a
    /// snapshot out of the core loop without it ever sharing state outside
    /// its owning task, the same `reply`-channel-over-the-event-enum shape
    /// as `telemetry_core`'s `ToAggregator::GatherMetrics`.
    GatherStats {
        reply: flume::Sender<StatsSnapshot>,
        now: u64,
    },
}

pub struct Aggregator {
    registry: Registry,
    ledger: Ledger,
    arbiter: Arbiter,
    batcher: Batcher,
    stats: Stats,
}

impl Aggregator {
    pub fn new(now: u64) -> Self {
        Self {
            registry: Registry::new(),
            ledger: Ledger::new(),
            arbiter: Arbiter::new(),
            batcher: Batcher::new(),
            stats: Stats::new(now),
        }
    }

    pub fn bulk_listener_count(&self) -> usize {
        self.registry.bulk_listener_count()
    }

    pub fn any_subscriber_connected(&self) -> bool {
        self.registry.any_subscriber_connected()
    }

    pub fn handle_event(&mut self, event: CoreEvent) -> TimerAction {
        match event {
            CoreEvent::ProducerConnected {
                id,
                remote_addr,
                outbound,
                now,
            } => self.on_producer_connected(id, remote_addr, outbound, now),
            CoreEvent::ProducerMessage { id, msg, now } => self.on_producer_message(id, msg, now),
            CoreEvent::ProducerDisconnected { id, now } => self.disconnect_producer(&id, now),
            CoreEvent::DashboardConnected {
                id,
                remote_addr,
                outbound,
                now,
            } => {
                self.registry.register_dashboard(
                    id,
                    Subscriber {
                        remote_addr,
                        connected_at: now,
                        outbound,
                    },
                );
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::DashboardMessage { id, msg, now } => self.on_dashboard_message(id, msg, now),
            CoreEvent::DashboardDisconnected { id, now } => {
                self.registry.remove_dashboard(&id);
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::PassiveListenerConnected {
                id,
                remote_addr,
                outbound,
                now,
            } => {
                send(&outbound, &ListenerOutbound::ListenerConnected {});
                self.registry.register_passive_listener(
                    id,
                    Subscriber {
                        remote_addr,
                        connected_at: now,
                        outbound,
                    },
                );
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::PassiveListenerDisconnected { id, now } => {
                self.registry.remove_passive_listener(&id);
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::OrientationListenerConnected {
                id,
                remote_addr,
                outbound,
                now,
            } => {
                send(
                    &outbound,
                    &OrientationOutbound::OrientationListenerConnected {},
                );
                self.registry.register_orientation_listener(
                    id,
                    Subscriber {
                        remote_addr,
                        connected_at: now,
                        outbound,
                    },
                );
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::OrientationListenerDisconnected { id, now } => {
                self.registry.remove_orientation_listener(&id);
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::BulkListenerConnected {
                id,
                remote_addr,
                outbound,
                now,
            } => {
                send(
                    &outbound,
                    &BulkOutbound::BulkListenerConnected {
                        batch_interval: super::constants::BATCH_INTERVAL_MS,
                        max_batch_size: super::constants::MAX_BATCH_SIZE,
                    },
                );
                self.registry.register_bulk_listener(
                    id,
                    Subscriber {
                        remote_addr,
                        connected_at: now,
                        outbound,
                    },
                );
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::BulkListenerDisconnected { id, now } => {
                self.registry.remove_bulk_listener(&id);
                self.push_stats(now);
                TimerAction::None
            }
            CoreEvent::InactivityTimeout { now } => self.on_inactivity_timeout(now),
            CoreEvent::BulkFlushTick { now } => {
                router::flush_bulk(&self.registry, &mut self.batcher, now);
                TimerAction::None
            }
            CoreEvent::RateResetTick { now } => {
                self.stats.maybe_reset_rate(now);
                TimerAction::None
            }
            CoreEvent::StatusLogTick { now } => {
                self.log_status(now);
                TimerAction::None
            }
            CoreEvent::Shutdown { now } => self.on_shutdown(now),
            CoreEvent::GatherStats { reply, now } => {
                let snapshot =
                    self.stats
                        .snapshot(now, &self.registry, &self.arbiter, self.batcher.len());
                let _ = reply.send(snapshot);
                TimerAction::None
            }
        }
    }

    fn on_producer_connected(
        &mut self,
        id: ConnId,
        remote_addr: Option<IpAddr>,
        outbound: Outbound,
        now: u64,
    ) -> TimerAction {
        let record = ProducerRecord {
            conn_id: id.clone(),
            device_id: format!("unknown_{id}"),
            username: None,
            remote_addr,
            connected_at: now,
            data_count: 0,
            last_data_time: None,
            outbound: outbound.clone(),
        };
        if self.registry.register_producer(record).is_err() {
            send(
                &outbound,
                &ProducerOutbound::Rejected {
                    reason: "Server capacity reached",
                },
            );
        } else {
            self.push_stats(now);
        }
        TimerAction::None
    }

    fn on_producer_message(&mut self, id: ConnId, msg: ProducerInbound, now: u64) -> TimerAction {
        match msg {
            ProducerInbound::Handshake {
                device_id,
                username,
                ..
            } => {
                let device_id = device_id.unwrap_or_else(|| format!("unknown_{id}"));
                if let Some(rec) = self.registry.producer_mut(&id) {
                    rec.device_id = device_id.clone();
                    rec.username = username.clone();
                }
                let outcome = self
                    .arbiter
                    .on_handshake(&id, &device_id, &self.ledger, &self.registry, now);
                self.notify_dashboards_user_connected(&id, username.as_deref());
                self.apply_outcome(outcome, Some(&id), now)
            }
            ProducerInbound::Data { data } => match self.arbiter.on_data(&id) {
                Outcome::DataAccepted => {
                    let username = self
                        .registry
                        .producer(&id)
                        .and_then(|rec| rec.username.clone());
                    if let Some(rec) = self.registry.producer_mut(&id) {
                        rec.data_count += 1;
                        rec.last_data_time = Some(now);
                    }
                    self.stats.record_data_point(now);
                    let size_triggered = router::dispatch_data(
                        &self.registry,
                        &mut self.batcher,
                        &id,
                        username.as_deref(),
                        &data,
                    );
                    if size_triggered {
                        router::flush_bulk(&self.registry, &mut self.batcher, now);
                    }
                    self.push_stats(now);
                    if let Some(rec) = self.registry.producer(&id) {
                        send(&rec.outbound, &ProducerOutbound::Ack { received: data.id });
                    }
                    TimerAction::ArmInactivity(now + SENDER_INACTIVITY_TIMEOUT_MS)
                }
                Outcome::Rejected(reason) => {
                    if let Some(rec) = self.registry.producer(&id) {
                        send(&rec.outbound, &ProducerOutbound::Rejected { reason });
                    }
                    TimerAction::None
                }
                _ => TimerAction::None,
            },
            ProducerInbound::RequestSenderRole {} => {
                let outcome = self
                    .arbiter
                    .on_request_sender_role(&id, &self.registry, now);
                self.apply_outcome(outcome, Some(&id), now)
            }
        }
    }

    /// Shared by both a normal socket close and a dashboard `kickUser`.
    fn disconnect_producer(&mut self, id: &ConnId, now: u64) -> TimerAction {
        let Some(rec) = self.registry.remove_producer(id) else {
            return TimerAction::None;
        };
        let was_active_sender = self.arbiter.is_active_sender(id);
        self.ledger.record_disconnect(
            rec.device_id,
            id.clone(),
            rec.username,
            rec.data_count,
            was_active_sender,
            now,
        );
        self.notify_dashboards_user_disconnected(id);

        let promoted = self.arbiter.on_producer_disconnected(id, &self.registry);
        let action = match promoted {
            Some(p) => {
                self.apply_promotion(&Promotion {
                    promoted: p,
                    demoted_incumbent: None,
                    is_changeover: true,
                });
                TimerAction::ArmInactivity(now + SENDER_INACTIVITY_TIMEOUT_MS)
            }
            None if was_active_sender => TimerAction::CancelInactivity,
            None => TimerAction::None,
        };
        self.push_stats(now);
        action
    }

    fn on_dashboard_message(&mut self, id: ConnId, msg: DashboardInbound, now: u64) -> TimerAction {
        match msg {
            DashboardInbound::GetStats {} => {
                let snapshot =
                    self.stats
                        .snapshot(now, &self.registry, &self.arbiter, self.batcher.len());
                if let Some(sub) = self.registry.dashboard(&id) {
                    send(&sub.outbound, &DashboardOutbound::Stats { snapshot });
                }
                TimerAction::None
            }
            DashboardInbound::KickUser { user_id } => {
                let target = ConnId::from_raw(user_id);
                match self.registry.producer(&target) {
                    Some(rec) => {
                        send(&rec.outbound, &ProducerOutbound::Kicked {});
                        self.disconnect_producer(&target, now)
                    }
                    None => {
                        log::warn!("kickUser: unknown producer {target}");
                        TimerAction::None
                    }
                }
            }
            DashboardInbound::PromoteUser { user_id } => {
                let target = ConnId::from_raw(user_id);
                if self.registry.producer(&target).is_none() {
                    log::warn!("promoteUser: unknown producer {target}");
                    return TimerAction::None;
                }
                let outcome = self.arbiter.promote_unconditionally(target);
                self.apply_outcome(outcome, None, now)
            }
            DashboardInbound::DemoteUser {} => {
                let outcome = self.arbiter.demote_unconditionally();
                self.apply_outcome(outcome, None, now)
            }
        }
    }

    fn on_inactivity_timeout(&mut self, now: u64) -> TimerAction {
        let outcome = self.arbiter.on_inactivity_timeout(&self.registry);
        self.apply_outcome(outcome, None, now)
    }

    fn on_shutdown(&mut self, now: u64) -> TimerAction {
        router::flush_bulk(&self.registry, &mut self.batcher, now);
        for (_, rec) in self.registry.producers() {
            send(&rec.outbound, &ProducerOutbound::ServerShutdown {});
        }
        for (_, sub) in self.registry.passive_listeners() {
            send(&sub.outbound, &ListenerOutbound::ServerShutdown {});
        }
        for (_, sub) in self.registry.orientation_listeners() {
            send(&sub.outbound, &OrientationOutbound::ServerShutdown {});
        }
        for (_, sub) in self.registry.bulk_listeners() {
            send(&sub.outbound, &BulkOutbound::ServerShutdown {});
        }
        TimerAction::CancelInactivity
    }

    /// Translate an arbiter `Outcome` into outbound messages and a timer
    /// action. `requester` is who a `Rejected`/`Observer` outcome replies to;
    /// it is `None` for the purely-internal outcomes (`promoteUser`,
    /// `demoteUser`, inactivity timeout) that can never produce those two
    /// variants.
    fn apply_outcome(&mut self, outcome: Outcome, requester: Option<&ConnId>, now: u64) -> TimerAction {
        match outcome {
            Outcome::Promoted(promotion) => {
                self.apply_promotion(&promotion);
                TimerAction::ArmInactivity(now + SENDER_INACTIVITY_TIMEOUT_MS)
            }
            Outcome::Observer { current_sender } => {
                if let Some(rec) = requester.and_then(|r| self.registry.producer(r)) {
                    send(&rec.outbound, &ProducerOutbound::Welcome { role: SenderRole::Observer });
                    send(
                        &rec.outbound,
                        &ProducerOutbound::ObserverMode { current_sender },
                    );
                }
                TimerAction::None
            }
            Outcome::Rejected(reason) => {
                if let Some(rec) = requester.and_then(|r| self.registry.producer(r)) {
                    send(&rec.outbound, &ProducerOutbound::Rejected { reason });
                }
                TimerAction::None
            }
            Outcome::Demoted { demoted, promoted } => {
                if let Some(rec) = self.registry.producer(&demoted) {
                    send(&rec.outbound, &ProducerOutbound::Demoted {});
                }
                match promoted {
                    Some(p) => {
                        self.apply_promotion(&Promotion {
                            promoted: p,
                            demoted_incumbent: None,
                            is_changeover: true,
                        });
                        TimerAction::ArmInactivity(now + SENDER_INACTIVITY_TIMEOUT_MS)
                    }
                    None => TimerAction::CancelInactivity,
                }
            }
            Outcome::DataAccepted | Outcome::NoOp => TimerAction::None,
        }
    }

    fn apply_promotion(&mut self, promotion: &Promotion) {
        for (pid, rec) in self.registry.producers() {
            if *pid != promotion.promoted {
                send(
                    &rec.outbound,
                    &ProducerOutbound::SenderChanged {
                        active_sender: promotion.promoted.clone(),
                    },
                );
            }
        }
        if let Some(rec) = self.registry.producer(&promotion.promoted) {
            // A changeover replaces a previously active sender (even one that
            // has since disconnected), so the newly promoted producer is told
            // the sender changed before it is told it is the new one. The very
            // first promotion out of Idle has no prior sender to announce.
            if promotion.is_changeover {
                send(
                    &rec.outbound,
                    &ProducerOutbound::SenderChanged {
                        active_sender: promotion.promoted.clone(),
                    },
                );
            }
            send(
                &rec.outbound,
                &ProducerOutbound::Promoted {
                    role: SenderRole::Sender,
                },
            );
        }
        for (_, sub) in self.registry.dashboards() {
            send(
                &sub.outbound,
                &DashboardOutbound::SenderPromoted {
                    user_id: promotion.promoted.clone(),
                },
            );
        }
        if let Some(demoted) = &promotion.demoted_incumbent {
            if let Some(rec) = self.registry.producer(demoted) {
                send(&rec.outbound, &ProducerOutbound::Demoted {});
            }
        }
    }

    /// Push a fresh stats snapshot to dashboards and passive-listeners; called
    /// after every accepted `data` frame and after every connection or
    /// disconnection, since either can change the population counts the
    /// snapshot reports.
    fn push_stats(&mut self, now: u64) {
        let snapshot = self
            .stats
            .snapshot(now, &self.registry, &self.arbiter, self.batcher.len());
        router::dispatch_stats(&self.registry, &snapshot);
    }

    fn notify_dashboards_user_connected(&self, id: &ConnId, username: Option<&str>) {
        let msg = DashboardOutbound::UserConnected {
            user_id: id.clone(),
            username: username.map(String::from),
        };
        for (_, sub) in self.registry.dashboards() {
            send(&sub.outbound, &msg);
        }
    }

    fn notify_dashboards_user_disconnected(&self, id: &ConnId) {
        let msg = DashboardOutbound::UserDisconnected { user_id: id.clone() };
        for (_, sub) in self.registry.dashboards() {
            send(&sub.outbound, &msg);
        }
    }

    fn log_status(&self, now: u64) {
        if !self.registry.any_subscriber_connected() {
            return;
        }
        log::info!(
            "status: producers={} dashboards={} passive_listeners={} orientation_listeners={} bulk_listeners={} bulk_queue={} uptime={}s",
            self.registry.producer_count(),
            self.registry.dashboard_count(),
            self.registry.passive_listener_count(),
            self.registry.orientation_listener_count(),
            self.registry.bulk_listener_count(),
            self.batcher.len(),
            self.stats.uptime_seconds(now),
        );
    }
}

/// Convert an absolute deadline expressed as epoch-ms (the shape every
/// `TimerAction::ArmInactivity` carries, since core logic only ever deals in
/// `now: u64` rather than calling a clock mid-computation) into a monotonic
/// `tokio::time::Instant` suitable for `sleep_until`.
fn instant_at_epoch_ms(deadline_ms: u64) -> tokio::time::Instant {
    let now_ms = relay_common::time::now();
    let delay = Duration::from_millis(deadline_ms.saturating_sub(now_ms));
    tokio::time::Instant::now() + delay
}

/// The run loop: owns the one `Aggregator` outright and races its event
/// channel against the three independent tickers (inactivity, bulk flush,
/// rate reset, status log), exactly as `InnerLoop::handle` races its message
/// channel against a periodic tick inside one `tokio::select!`.
pub async fn run(events: flume::Receiver<CoreEvent>) {
    let mut aggregator = Aggregator::new(relay_common::time::now());
    let mut inactivity_deadline: Option<tokio::time::Instant> = None;
    let mut bulk_flush_tick = tokio::time::interval(Duration::from_millis(BATCH_INTERVAL_MS));
    let mut rate_reset_tick = tokio::time::interval(Duration::from_millis(RATE_RESET_INTERVAL_MS));
    let mut status_log_tick = tokio::time::interval(Duration::from_millis(STATUS_LOG_INTERVAL_MS));

    loop {
        let inactivity_sleep = async {
            match inactivity_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let action = tokio::select! {
            event = events.recv_async() => {
                let Ok(event) = event else { break };
                let is_shutdown = matches!(event, CoreEvent::Shutdown { .. });
                let action = aggregator.handle_event(event);
                if is_shutdown {
                    break;
                }
                action
            }
            _ = inactivity_sleep => {
                aggregator.handle_event(CoreEvent::InactivityTimeout { now: relay_common::time::now() })
            }
            _ = bulk_flush_tick.tick() => {
                aggregator.handle_event(CoreEvent::BulkFlushTick { now: relay_common::time::now() })
            }
            _ = rate_reset_tick.tick() => {
                aggregator.handle_event(CoreEvent::RateResetTick { now: relay_common::time::now() })
            }
            _ = status_log_tick.tick() => {
                aggregator.handle_event(CoreEvent::StatusLogTick { now: relay_common::time::now() })
            }
        };

        match action {
            TimerAction::None => {}
            TimerAction::ArmInactivity(deadline_ms) => {
                inactivity_deadline = Some(instant_at_epoch_ms(deadline_ms));
            }
            TimerAction::CancelInactivity => {
                inactivity_deadline = None;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::types::Outbound;

    fn channel() -> (Outbound, flume::Receiver<String>) {
        flume::bounded(16)
    }

    /// A lone producer handshakes, is promoted, sends data,
    /// and a pre-attached passive listener sees the fan-out.
    #[test]
    fn lone_producer_is_promoted_and_fans_out_to_a_listener() {
        let mut agg = Aggregator::new(0);
        let (prod_tx, prod_rx) = channel();
        let (listen_tx, listen_rx) = channel();

        agg.handle_event(CoreEvent::ProducerConnected {
            id: ConnId::from_raw("a"),
            remote_addr: None,
            outbound: prod_tx.clone(),
            now: 0,
        });
        agg.handle_event(CoreEvent::PassiveListenerConnected {
            id: ConnId::from_raw("l1"),
            remote_addr: None,
            outbound: listen_tx,
            now: 0,
        });
        assert!(listen_rx.try_recv().unwrap().contains("listener_connected"));
        // The listener's own connection is itself a connection event, so it
        // gets an immediate stats snapshot too.
        assert!(listen_rx.try_recv().unwrap().contains(r#""type":"stats""#));

        let action = agg.handle_event(CoreEvent::ProducerMessage {
            id: ConnId::from_raw("a"),
            msg: ProducerInbound::Handshake {
                client: None,
                version: None,
                timestamp: None,
                device_id: Some("D1".into()),
                username: None,
            },
            now: 1_000,
        });
        assert_eq!(action, TimerAction::ArmInactivity(31_000));
        assert!(prod_rx.try_recv().unwrap().contains(r#""type":"promoted""#));

        let action = agg.handle_event(CoreEvent::ProducerMessage {
            id: ConnId::from_raw("a"),
            msg: ProducerInbound::Data {
                data: crate::messages::DataPayload {
                    id: serde_json::json!("f1"),
                    timestamp: 2_000,
                    orientation: None,
                    fields: serde_json::Map::new(),
                },
            },
            now: 2_000,
        });
        assert_eq!(action, TimerAction::ArmInactivity(32_000));
        assert!(prod_rx.try_recv().unwrap().contains(r#""type":"ack""#));
        assert!(listen_rx.try_recv().unwrap().contains("sensor_data"));
        assert!(listen_rx.try_recv().unwrap().contains(r#""type":"stats""#));
    }

    /// B observes A's handshake, then is promoted with
    /// `sender_changed` + `promoted` once A disconnects.
    #[test]
    fn observer_is_promoted_when_active_sender_disconnects() {
        let mut agg = Aggregator::new(0);
        let (a_tx, a_rx) = channel();
        let (b_tx, b_rx) = channel();

        agg.handle_event(CoreEvent::ProducerConnected {
            id: ConnId::from_raw("a"),
            remote_addr: None,
            outbound: a_tx,
            now: 0,
        });
        agg.handle_event(CoreEvent::ProducerConnected {
            id: ConnId::from_raw("b"),
            remote_addr: None,
            outbound: b_tx.clone(),
            now: 0,
        });

        agg.handle_event(CoreEvent::ProducerMessage {
            id: ConnId::from_raw("a"),
            msg: ProducerInbound::Handshake {
                client: None,
                version: None,
                timestamp: None,
                device_id: Some("D1".into()),
                username: None,
            },
            now: 0,
        });
        let _ = a_rx.try_recv(); // promoted

        agg.handle_event(CoreEvent::ProducerMessage {
            id: ConnId::from_raw("b"),
            msg: ProducerInbound::Handshake {
                client: None,
                version: None,
                timestamp: None,
                device_id: Some("D2".into()),
                username: None,
            },
            now: 100,
        });
        let welcome = b_rx.try_recv().unwrap();
        assert!(welcome.contains(r#""role":"observer""#));
        let observer_mode = b_rx.try_recv().unwrap();
        assert!(observer_mode.contains(r#""currentSender":"a""#));

        let action = agg.handle_event(CoreEvent::ProducerDisconnected {
            id: ConnId::from_raw("a"),
            now: 5_000,
        });
        assert_eq!(action, TimerAction::ArmInactivity(35_000));
        let sender_changed = b_rx.try_recv().unwrap();
        assert!(sender_changed.contains("sender_changed"));
        let promoted = b_rx.try_recv().unwrap();
        assert!(promoted.contains(r#""type":"promoted""#));
    }

    /// An idle active sender is demoted after the
    /// inactivity timer fires, and the remaining producer is promoted.
    #[test]
    fn inactivity_timeout_demotes_and_promotes_the_other_producer() {
        let mut agg = Aggregator::new(0);
        let (a_tx, a_rx) = channel();
        let (b_tx, b_rx) = channel();

        agg.handle_event(CoreEvent::ProducerConnected {
            id: ConnId::from_raw("a"),
            remote_addr: None,
            outbound: a_tx.clone(),
            now: 0,
        });
        agg.handle_event(CoreEvent::ProducerMessage {
            id: ConnId::from_raw("a"),
            msg: ProducerInbound::Handshake {
                client: None,
                version: None,
                timestamp: None,
                device_id: Some("D1".into()),
                username: None,
            },
            now: 0,
        });
        let _ = a_rx.try_recv(); // promoted

        agg.handle_event(CoreEvent::ProducerConnected {
            id: ConnId::from_raw("b"),
            remote_addr: None,
            outbound: b_tx,
            now: 10_000,
        });

        let action = agg.handle_event(CoreEvent::InactivityTimeout { now: 30_000 });
        assert_eq!(action, TimerAction::ArmInactivity(60_000));
        assert!(a_rx.try_recv().unwrap().contains(r#""type":"demoted""#));
        let sender_changed = b_rx.try_recv().unwrap();
        assert!(sender_changed.contains("sender_changed"));
        let promoted = b_rx.try_recv().unwrap();
        assert!(promoted.contains(r#""type":"promoted""#));
    }

    /// Lone active sender timing out with nobody else connected enters Idle
    /// rather than arming a timer with no sender.
    #[test]
    fn inactivity_timeout_with_no_other_producer_enters_idle() {
        let mut agg = Aggregator::new(0);
        let a = ConnId::from_raw("a");
        let (a_tx, a_rx) = channel();
        agg.handle_event(CoreEvent::ProducerConnected {
            id: a.clone(),
            remote_addr: None,
            outbound: a_tx,
            now: 0,
        });
        agg.handle_event(CoreEvent::ProducerMessage {
            id: ConnId::from_raw("a"),
            msg: ProducerInbound::Handshake {
                client: None,
                version: None,
                timestamp: None,
                device_id: Some("D1".into()),
                username: None,
            },
            now: 0,
        });
        let _ = a_rx.try_recv(); // promoted

        let action = agg.handle_event(CoreEvent::InactivityTimeout { now: 30_000 });
        assert_eq!(action, TimerAction::CancelInactivity);
    }
}
