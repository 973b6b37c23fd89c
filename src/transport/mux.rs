//! Request multiplexer.
//!
//! Correlates replies with the request that caused them through an 8-bit id.
//! Each live id owns either a one-shot slot (a single reply, then the id is
//! free again) or a persistent slot (every reply until released).
//!
//! Free ids are chosen at random so a late reply to a long-gone request is
//! unlikely to land on a fresh registration. When all 256 ids are taken the
//! oldest registration is evicted with a warning.

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::REQUEST_ID_SPACE;

enum Slot<T> {
    Once(oneshot::Sender<T>),
    Persistent(mpsc::UnboundedSender<T>),
}

struct Entry<T> {
    slot: Slot<T>,
    /// Registration order, used to find the oldest entry.
    registered_at: u64,
}

/// Per-connection table of in-flight requests.
pub struct RequestMultiplexer<T> {
    slots: Vec<Option<Entry<T>>>,
    next_registration: u64,
}

impl<T> Default for RequestMultiplexer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RequestMultiplexer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMultiplexer")
            .field("live", &self.len())
            .finish()
    }
}

impl<T> RequestMultiplexer<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: (0..REQUEST_ID_SPACE).map(|_| None).collect(),
            next_registration: 0,
        }
    }

    /// Register a request expecting exactly one reply.
    pub fn register_once(&mut self) -> (u8, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (self.insert(Slot::Once(tx)), rx)
    }

    /// Register a subscription receiving every reply until released.
    pub fn register_persistent(&mut self) -> (u8, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.insert(Slot::Persistent(tx)), rx)
    }

    fn insert(&mut self, slot: Slot<T>) -> u8 {
        let id = self.allocate();
        self.slots[usize::from(id)] = Some(Entry {
            slot,
            registered_at: self.next_registration,
        });
        self.next_registration += 1;
        id
    }

    /// Pick a free id, or evict the oldest registration if none is free.
    fn allocate(&mut self) -> u8 {
        let free: Vec<u8> = (0..=u8::MAX)
            .filter(|id| self.slots[usize::from(*id)].is_none())
            .collect();
        if let Some(id) = free.choose(&mut rand::thread_rng()) {
            return *id;
        }

        let oldest = (0..=u8::MAX)
            .min_by_key(|id| {
                self.slots[usize::from(*id)]
                    .as_ref()
                    .map_or(u64::MAX, |entry| entry.registered_at)
            })
            .unwrap_or(0);
        warn!(
            request_id = oldest,
            "request id space exhausted, recycling oldest pending request"
        );
        self.slots[usize::from(oldest)] = None;
        oldest
    }

    /// Route a reply to its registration.
    ///
    /// Returns `false` if the id is not registered or the receiver is gone.
    /// A one-shot slot is released by delivery.
    pub fn dispatch(&mut self, id: u8, data: T) -> bool {
        let index = usize::from(id);
        let Some(Entry {
            slot,
            registered_at,
        }) = self.slots[index].take()
        else {
            warn!(request_id = id, "dropping reply for unregistered request id");
            return false;
        };

        match slot {
            Slot::Once(tx) => {
                let delivered = tx.send(data).is_ok();
                if !delivered {
                    debug!(request_id = id, "requester gone before reply arrived");
                }
                delivered
            }
            Slot::Persistent(tx) => {
                if tx.send(data).is_err() {
                    debug!(request_id = id, "subscriber gone, releasing id");
                    return false;
                }
                self.slots[index] = Some(Entry {
                    slot: Slot::Persistent(tx),
                    registered_at,
                });
                true
            }
        }
    }

    /// Release an id. Its receiver observes the channel closing.
    pub fn release(&mut self, id: u8) -> bool {
        self.slots[usize::from(id)].take().is_some()
    }

    /// Release every id, returning how many were live.
    pub fn release_all(&mut self) -> usize {
        self.slots
            .iter_mut()
            .filter_map(Option::take)
            .count()
    }

    /// Whether `id` currently has a registration.
    pub fn is_registered(&self, id: u8) -> bool {
        self.slots[usize::from(id)].is_some()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether no registration is live.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
