//! Location source seam.
//!
//! The engine consumes position fixes from a host-provided source: one-shot
//! queries for checkpoint creation, and a throttled subscription for
//! autonomous delivery in automatic mode. Delivery itself is pull/feed
//! style — the host receives fixes from its platform and forwards them to
//! [`SessionEngine::accept_sample`](crate::session::SessionEngine::accept_sample)
//! one at a time, which keeps the single-writer mutation order.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A single raw position reading obtained from the location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters, when the hardware provides one.
    pub elevation: Option<f64>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl Fix {
    /// Create a new fix.
    pub fn new(latitude: f64, longitude: f64, elevation: Option<f64>, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
            timestamp,
        }
    }

    /// Check if the fix has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Opaque handle for an active fix subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Host-provided source of position fixes.
pub trait LocationSource {
    /// Request a single current position fix, if one is obtainable right now.
    fn current_fix(&mut self) -> Option<Fix>;

    /// Ask the source to begin autonomous fix delivery, throttled to at most
    /// one fix per `min_distance_m` meters moved and `min_interval_s` seconds
    /// elapsed.
    fn subscribe(&mut self, min_distance_m: f64, min_interval_s: u32) -> SubscriptionId;

    /// Stop autonomous delivery for the given subscription.
    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// Scripted location source for tests and host simulators.
///
/// Fixes are queued with [`push_fix`](Self::push_fix) and handed out in
/// order by [`current_fix`](LocationSource::current_fix). Subscriptions are
/// only bookkeeping; the "delivery" side of a scripted run is the test
/// feeding `accept_sample` directly.
#[derive(Debug, Default)]
pub struct ScriptedLocationSource {
    queue: VecDeque<Fix>,
    next_id: u64,
    active: Vec<SubscriptionId>,
    last_request: Option<(f64, u32)>,
}

impl ScriptedLocationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fix to be returned by the next `current_fix` call.
    pub fn push_fix(&mut self, fix: Fix) {
        self.queue.push_back(fix);
    }

    /// Number of currently active subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.active.len()
    }

    /// Throttling parameters of the most recent `subscribe` call.
    pub fn last_subscription_request(&self) -> Option<(f64, u32)> {
        self.last_request
    }
}

impl LocationSource for ScriptedLocationSource {
    fn current_fix(&mut self) -> Option<Fix> {
        self.queue.pop_front()
    }

    fn subscribe(&mut self, min_distance_m: f64, min_interval_s: u32) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.active.push(id);
        self.last_request = Some((min_distance_m, min_interval_s));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.active.retain(|active| *active != id);
    }
}
