// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Subscriber registry and non-blocking event fan-out.
//!
//! The hub owns the only shared mutable structure in the system: the set of
//! subscriber queues, guarded by a reader/writer lock. Reads
//! ([`Hub::has_subscribers`], [`Hub::broadcast`]) run concurrently; writes
//! (subscribe/unsubscribe) are exclusive. Each queue is bounded and delivery
//! is send-or-drop: a slow or dead subscriber never stalls the proxy.

use crate::event::IOEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Bounded per-subscriber queue depth. Beyond this, events are dropped for
/// that subscriber (freshness over completeness).
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 1000;

/// Registry of inspection clients and the broadcast path to them.
#[derive(Default)]
pub struct Hub {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Arc<IOEvent>>>>,
    next_subscriber: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber queue and hand back its receiving end.
    ///
    /// The returned [`Subscription`] unsubscribes itself on drop; that is the
    /// only release path, so a streaming connection ending for any reason
    /// (disconnect, write failure, normal exit) always frees the slot.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        match self.subscribers.write() {
            Ok(mut subs) => {
                subs.insert(id, tx);
            }
            Err(_) => {
                tracing::warn!("subscriber set lock poisoned during subscribe");
            }
        }
        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    /// Remove a subscriber queue. No-op if it was already removed.
    fn unsubscribe(&self, id: u64) {
        match self.subscribers.write() {
            Ok(mut subs) => {
                subs.remove(&id);
            }
            Err(_) => {
                tracing::warn!("subscriber set lock poisoned during unsubscribe");
            }
        }
    }

    /// Cheap gate for the proxy's capture bypass. Race-tolerant: a subscriber
    /// joining right after a false answer just misses that one event.
    pub fn has_subscribers(&self) -> bool {
        match self.subscribers.read() {
            Ok(subs) => !subs.is_empty(),
            Err(_) => {
                tracing::warn!("subscriber set lock poisoned during read");
                false
            }
        }
    }

    /// Hand a completed event to every registered subscriber queue.
    ///
    /// Never blocks: a full queue drops the event for that subscriber only,
    /// a closed queue is skipped (its `Subscription` drop will unregister it).
    pub fn broadcast(&self, event: Arc<IOEvent>) {
        let subs = match self.subscribers.read() {
            Ok(subs) => subs,
            Err(_) => {
                tracing::warn!("subscriber set lock poisoned during broadcast");
                return;
            }
        };
        for (id, tx) in subs.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(subscriber = *id, event = event.id, "queue full, dropping");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

/// One subscriber's end of the hub: the sole reader of its bounded queue.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<IOEvent>>,
    hub: Arc<Hub>,
}

impl Subscription {
    /// Wait for the next broadcast event. Resolves `None` only if the hub
    /// side of the queue is gone.
    pub async fn recv(&mut self) -> Option<Arc<IOEvent>> {
        self.rx.recv().await
    }

    /// Poll-form of [`recv`](Self::recv), for use inside a `Body` impl.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Arc<IOEvent>>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
