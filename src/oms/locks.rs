use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::clock::Clock;
use crate::exchange::types::Order;

/// Logical submission channel: at most one in-flight order per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Entry,
    Stop,
}

#[derive(Debug, Clone)]
struct SlotLock {
    pending_order_id: Option<String>,
    expires_at: Instant,
}

/// Per-slot locks guarding order submission. A lock is taken before the
/// submit call, tagged with the venue order id once known, and released
/// by reconciliation against the open-order feed or by expiry so a
/// dropped response can never wedge a slot permanently.
pub struct SlotLocks {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    locks: HashMap<Slot, SlotLock>,
}

impl SlotLocks {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            locks: HashMap::new(),
        }
    }

    pub fn is_locked(&self, slot: Slot) -> bool {
        match self.locks.get(&slot) {
            Some(lock) => self.clock.now() < lock.expires_at,
            None => false,
        }
    }

    pub fn pending_order_id(&self, slot: Slot) -> Option<&str> {
        self.locks.get(&slot)?.pending_order_id.as_deref()
    }

    /// Take the slot. Returns false if it is already held.
    pub fn acquire(&mut self, slot: Slot) -> bool {
        if self.is_locked(slot) {
            return false;
        }
        self.locks.insert(
            slot,
            SlotLock {
                pending_order_id: None,
                expires_at: self.clock.now() + self.ttl,
            },
        );
        true
    }

    pub fn set_pending(&mut self, slot: Slot, order_id: &str) {
        if let Some(lock) = self.locks.get_mut(&slot) {
            lock.pending_order_id = Some(order_id.to_string());
        }
    }

    pub fn release(&mut self, slot: Slot) {
        self.locks.remove(&slot);
    }

    /// Release every slot whose recorded order is gone from the feed or
    /// no longer live.
    pub fn reconcile(&mut self, open_orders: &[Order]) {
        let now = self.clock.now();
        self.locks.retain(|slot, lock| {
            if now >= lock.expires_at {
                debug!("slot {slot:?}: lock expired");
                return false;
            }
            match &lock.pending_order_id {
                // submission still in flight, expiry will catch a loss
                None => true,
                Some(id) => {
                    let live = open_orders
                        .iter()
                        .any(|o| &o.order_id == id && o.status.is_live());
                    if !live {
                        debug!("slot {slot:?}: order {id} settled, releasing");
                    }
                    live
                }
            }
        });
    }
}
