//! # Delivery Tracker
//!
//! The pending-message table at the heart of the confirmation subsystem.
//! Every reading sent with an ack request is registered here under its
//! transport-assigned packet id; routing replies arrive later on the
//! transport's event path and are classified into one of three terminal
//! states:
//!
//! - `Acked` - a node *other than ours* confirmed the packet. Real delivery.
//! - `ImplicitAcked` - the reply originated from our own node: the radio is
//!   only confirming local queuing. The radio reports both cases through the
//!   same event shape, so without the origin-address comparison every send
//!   would look successful even with the antenna unplugged.
//! - `Naked` - the radio reported a routing error.
//!
//! Entries transition out of `Pending` exactly once; anything that never
//! hears back is removed by the expiry sweep. Stale or duplicate events for
//! unknown ids are ignored - the mesh happily re-delivers routing replies.
//!
//! The table is the only state shared between the tick path and the event
//! pump, so every access goes through one mutex.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::metrics;
use crate::transport::{reason_label, AckEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Acked,
    ImplicitAcked,
    Naked,
}

/// Point-in-time answer for a status query. `Unknown` covers ids never
/// registered as well as ids already expired or evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Acked,
    ImplicitAcked,
    Naked,
    Unknown,
}

/// What `on_event` decided, handed back so the event pump can schedule a
/// confirmation reply on a real ack without the tracker knowing about
/// scheduling.
#[derive(Debug, Clone, PartialEq)]
pub enum AckClass {
    Acked {
        peer: String,
        signal_at_send: Option<f32>,
    },
    ImplicitAcked {
        peer: String,
    },
    Naked {
        peer: String,
        reason: i32,
    },
    /// Unknown id or an event for an already-terminal entry.
    Stale,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    peer: String,
    signal_at_send: Option<f32>,
    created_at: Instant,
    state: DeliveryState,
}

/// Result of sampling tracker state for one fan-out batch.
///
/// An implicitly-acked peer counts as pending here: the packet is queued
/// locally but nothing confirmed the far end, so it is still a retry
/// candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub sent: usize,
    pub acked: BTreeSet<String>,
    pub naked: BTreeSet<String>,
    pub pending: BTreeSet<String>,
}

impl DeliveryOutcome {
    /// Batch sent without acknowledgment requests: complete at send time.
    pub fn fire_and_forget(sent: usize) -> Self {
        Self {
            sent,
            ..Self::default()
        }
    }
}

struct TrackerInner {
    pending: HashMap<u32, PendingEntry>,
    local_addr: Option<u32>,
}

/// Shared handle to the pending-message table. Clones refer to the same
/// table; hand one to the event pump and keep one on the tick path.
#[derive(Clone)]
pub struct DeliveryTracker {
    inner: Arc<Mutex<TrackerInner>>,
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner {
                pending: HashMap::new(),
                local_addr: None,
            })),
        }
    }

    /// Install the local node address used to tell real acks from implicit
    /// ones. Called after every (re)connect; the address can change when a
    /// different radio comes back on the cable.
    pub fn set_local_address(&self, addr: u32) {
        let mut inner = self.inner.lock().expect("delivery table mutex poisoned");
        inner.local_addr = Some(addr);
    }

    /// Track an outgoing packet awaiting confirmation. A duplicate id is a
    /// protocol anomaly: overwrite the old entry and warn, never panic.
    pub fn register(&self, id: u32, peer: &str, signal_at_send: Option<f32>) {
        let mut inner = self.inner.lock().expect("delivery table mutex poisoned");
        let entry = PendingEntry {
            peer: peer.to_string(),
            signal_at_send,
            created_at: Instant::now(),
            state: DeliveryState::Pending,
        };
        if let Some(prev) = inner.pending.insert(id, entry) {
            warn!(
                "duplicate registration for id={} (was awaiting {}, now {})",
                id, prev.peer, peer
            );
        }
    }

    /// Classify one routing reply under the table lock.
    pub fn on_event(&self, event: &AckEvent) -> AckClass {
        let mut inner = self.inner.lock().expect("delivery table mutex poisoned");
        let local_addr = inner.local_addr;
        let entry = match inner.pending.get_mut(&event.id) {
            Some(e) => e,
            None => {
                debug!(
                    "routing reply for untracked id={} from=0x{:08x} (stale or duplicate)",
                    event.id, event.from
                );
                return AckClass::Stale;
            }
        };
        if entry.state != DeliveryState::Pending {
            debug!(
                "duplicate routing reply for id={} (already {:?})",
                event.id, entry.state
            );
            return AckClass::Stale;
        }
        if let Some(reason) = event.error_reason {
            entry.state = DeliveryState::Naked;
            metrics::inc_naked();
            warn!(
                "delivery failed id={} peer={} reason={} ({})",
                event.id,
                entry.peer,
                reason,
                reason_label(reason)
            );
            return AckClass::Naked {
                peer: entry.peer.clone(),
                reason,
            };
        }
        if Some(event.from) == local_addr {
            // Our own node confirming it queued the packet. Not delivery.
            entry.state = DeliveryState::ImplicitAcked;
            metrics::inc_implicit_acked();
            debug!(
                "implicit ack id={} peer={} (local queue only)",
                event.id, entry.peer
            );
            return AckClass::ImplicitAcked {
                peer: entry.peer.clone(),
            };
        }
        entry.state = DeliveryState::Acked;
        metrics::inc_acked();
        metrics::observe_ack_latency(entry.created_at);
        debug!(
            "delivered id={} peer={} from=0x{:08x} latency_ms={}",
            event.id,
            entry.peer,
            event.from,
            entry.created_at.elapsed().as_millis()
        );
        AckClass::Acked {
            peer: entry.peer.clone(),
            signal_at_send: entry.signal_at_send,
        }
    }

    pub fn status(&self, id: u32) -> DeliveryStatus {
        let inner = self.inner.lock().expect("delivery table mutex poisoned");
        match inner.pending.get(&id).map(|e| e.state) {
            None => DeliveryStatus::Unknown,
            Some(DeliveryState::Pending) => DeliveryStatus::Pending,
            Some(DeliveryState::Acked) => DeliveryStatus::Acked,
            Some(DeliveryState::ImplicitAcked) => DeliveryStatus::ImplicitAcked,
            Some(DeliveryState::Naked) => DeliveryStatus::Naked,
        }
    }

    /// Remove entries older than `max_age`. Still-pending removals are the
    /// interesting ones (nothing ever answered); terminal removals are
    /// routine housekeeping. Returns how many still-pending entries expired.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        self.sweep_expired_at(Instant::now(), max_age)
    }

    /// Sweep against an explicit `now`, so tests can advance a virtual clock
    /// instead of sleeping.
    pub fn sweep_expired_at(&self, now: Instant, max_age: Duration) -> usize {
        let mut inner = self.inner.lock().expect("delivery table mutex poisoned");
        let mut expired_pending = 0usize;
        inner.pending.retain(|id, entry| {
            let age = now.saturating_duration_since(entry.created_at);
            if age <= max_age {
                return true;
            }
            if entry.state == DeliveryState::Pending {
                expired_pending += 1;
                metrics::inc_expired();
                warn!(
                    "expired id={} after {:?} still awaiting ack from {}",
                    id, age, entry.peer
                );
            } else {
                debug!("evicted settled id={} ({:?}, peer={})", id, entry.state, entry.peer);
            }
            false
        });
        expired_pending
    }

    /// Sample the table for one fan-out batch of `(peer, id)` pairs.
    pub fn outcome(&self, batch: &[(String, u32)]) -> DeliveryOutcome {
        let mut out = DeliveryOutcome {
            sent: batch.len(),
            ..DeliveryOutcome::default()
        };
        for (peer, id) in batch {
            match self.status(*id) {
                DeliveryStatus::Acked => {
                    out.acked.insert(peer.clone());
                }
                DeliveryStatus::Naked => {
                    out.naked.insert(peer.clone());
                }
                DeliveryStatus::Pending
                | DeliveryStatus::ImplicitAcked
                | DeliveryStatus::Unknown => {
                    out.pending.insert(peer.clone());
                }
            }
        }
        out
    }

    /// Number of tracked entries (any state). Reporting only.
    pub fn tracked(&self) -> usize {
        let inner = self.inner.lock().expect("delivery table mutex poisoned");
        inner.pending.len()
    }
}
