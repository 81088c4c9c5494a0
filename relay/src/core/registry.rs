//! Connection Registry: indexes every live connection by role.
//!
//! Each role is backed by a plain `HashMap<ConnId, _>`; O(1) add/remove/lookup falls
//! out of that directly; there's no need for `telemetry_core`'s slab-style
//! `DenseMap` here since our ids are opaque, externally-minted strings rather
//! than densely packed small integers (see DESIGN.md).

use super::types::{ConnId, ProducerRecord, Subscriber};
use std::collections::HashMap;

/// Maximum number of concurrent producer connections (MAX_PRODUCERS).
pub const MAX_PRODUCERS: usize = 25;

/// A role with no numeric admission cap: dashboards, and the three listener kinds.
#[derive(Default)]
struct RoleTable<T> {
    conns: HashMap<ConnId, T>,
}

impl<T> RoleTable<T> {
    fn new() -> Self {
        Self {
            conns: HashMap::new(),
        }
    }

    fn insert(&mut self, id: ConnId, value: T) {
        self.conns.insert(id, value);
    }

    fn remove(&mut self, id: &ConnId) -> Option<T> {
        self.conns.remove(id)
    }

    fn get(&self, id: &ConnId) -> Option<&T> {
        self.conns.get(id)
    }

    fn get_mut(&mut self, id: &ConnId) -> Option<&mut T> {
        self.conns.get_mut(id)
    }

    fn iter(&self) -> impl Iterator<Item = (&ConnId, &T)> {
        self.conns.iter()
    }

    fn len(&self) -> usize {
        self.conns.len()
    }
}

/// Raised when a producer tries to register past the admission cap.
pub struct CapacityReached;

pub struct Registry {
    producers: RoleTable<ProducerRecord>,
    dashboards: RoleTable<Subscriber>,
    passive_listeners: RoleTable<Subscriber>,
    orientation_listeners: RoleTable<Subscriber>,
    bulk_listeners: RoleTable<Subscriber>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            producers: RoleTable::new(),
            dashboards: RoleTable::new(),
            passive_listeners: RoleTable::new(),
            orientation_listeners: RoleTable::new(),
            bulk_listeners: RoleTable::new(),
        }
    }

    // -- producers --

    /// Register a new producer, enforcing the `MAX_PRODUCERS` admission cap.
    pub fn register_producer(&mut self, record: ProducerRecord) -> Result<(), CapacityReached> {
        if self.producers.len() >= MAX_PRODUCERS {
            return Err(CapacityReached);
        }
        self.producers.insert(record.conn_id.clone(), record);
        Ok(())
    }

    pub fn remove_producer(&mut self, id: &ConnId) -> Option<ProducerRecord> {
        self.producers.remove(id)
    }

    pub fn producer(&self, id: &ConnId) -> Option<&ProducerRecord> {
        self.producers.get(id)
    }

    pub fn producer_mut(&mut self, id: &ConnId) -> Option<&mut ProducerRecord> {
        self.producers.get_mut(id)
    }

    pub fn producers(&self) -> impl Iterator<Item = (&ConnId, &ProducerRecord)> {
        self.producers.iter()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    /// The most-recently-connected producer other than `exclude`, if any (used to
    /// pick a promotion candidate; ties broken by later `connected_at`).
    pub fn most_recently_connected_producer_excluding(&self, exclude: &ConnId) -> Option<ConnId> {
        self.producers
            .iter()
            .filter(|(id, _)| *id != exclude)
            .max_by_key(|(_, rec)| rec.connected_at)
            .map(|(id, _)| id.clone())
    }

    // -- dashboards --

    pub fn register_dashboard(&mut self, id: ConnId, sub: Subscriber) {
        self.dashboards.insert(id, sub);
    }

    pub fn remove_dashboard(&mut self, id: &ConnId) -> Option<Subscriber> {
        self.dashboards.remove(id)
    }

    pub fn dashboard(&self, id: &ConnId) -> Option<&Subscriber> {
        self.dashboards.get(id)
    }

    pub fn dashboards(&self) -> impl Iterator<Item = (&ConnId, &Subscriber)> {
        self.dashboards.iter()
    }

    pub fn dashboard_count(&self) -> usize {
        self.dashboards.len()
    }

    // -- passive listeners --

    pub fn register_passive_listener(&mut self, id: ConnId, sub: Subscriber) {
        self.passive_listeners.insert(id, sub);
    }

    pub fn remove_passive_listener(&mut self, id: &ConnId) -> Option<Subscriber> {
        self.passive_listeners.remove(id)
    }

    pub fn passive_listener(&self, id: &ConnId) -> Option<&Subscriber> {
        self.passive_listeners.get(id)
    }

    pub fn passive_listeners(&self) -> impl Iterator<Item = (&ConnId, &Subscriber)> {
        self.passive_listeners.iter()
    }

    pub fn passive_listener_count(&self) -> usize {
        self.passive_listeners.len()
    }

    // -- orientation listeners --

    pub fn register_orientation_listener(&mut self, id: ConnId, sub: Subscriber) {
        self.orientation_listeners.insert(id, sub);
    }

    pub fn remove_orientation_listener(&mut self, id: &ConnId) -> Option<Subscriber> {
        self.orientation_listeners.remove(id)
    }

    pub fn orientation_listener(&self, id: &ConnId) -> Option<&Subscriber> {
        self.orientation_listeners.get(id)
    }

    pub fn orientation_listeners(&self) -> impl Iterator<Item = (&ConnId, &Subscriber)> {
        self.orientation_listeners.iter()
    }

    pub fn orientation_listener_count(&self) -> usize {
        self.orientation_listeners.len()
    }

    // -- bulk listeners --

    pub fn register_bulk_listener(&mut self, id: ConnId, sub: Subscriber) {
        self.bulk_listeners.insert(id, sub);
    }

    pub fn remove_bulk_listener(&mut self, id: &ConnId) -> Option<Subscriber> {
        self.bulk_listeners.remove(id)
    }

    pub fn bulk_listener(&self, id: &ConnId) -> Option<&Subscriber> {
        self.bulk_listeners.get(id)
    }

    pub fn bulk_listeners(&self) -> impl Iterator<Item = (&ConnId, &Subscriber)> {
        self.bulk_listeners.iter()
    }

    pub fn bulk_listener_count(&self) -> usize {
        self.bulk_listeners.len()
    }

    pub fn any_subscriber_connected(&self) -> bool {
        self.producer_count() > 0
            || self.dashboard_count() > 0
            || self.passive_listener_count() > 0
            || self.orientation_listener_count() > 0
            || self.bulk_listener_count() > 0
    }
}
