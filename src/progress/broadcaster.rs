use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

use super::event::ProgressEnvelope;

type Registry = Mutex<HashMap<String, Vec<(u64, UnboundedSender<ProgressEnvelope>)>>>;

/// A live connection's receiving end. Dropping it unsubscribes.
pub struct Subscription {
    pub id: u64,
    pub owner: String,
    rx: UnboundedReceiver<ProgressEnvelope>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressEnvelope> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEnvelope> + Send {
        let mut subscription = self;
        async_stream::stream! {
            while let Some(envelope) = subscription.recv().await {
                yield envelope;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            remove(&registry, &self.owner, self.id);
            debug!(owner = %self.owner, subscription = self.id, "progress subscriber disconnected");
        }
    }
}

fn remove(registry: &Registry, owner: &str, id: u64) {
    let mut channels = registry.lock();
    if let Some(list) = channels.get_mut(owner) {
        list.retain(|(sub_id, _)| *sub_id != id);
        if list.is_empty() {
            channels.remove(owner);
        }
    }
}

/// Fan-out of progress events to every live subscriber of an owner key.
///
/// Delivery is best-effort to currently connected subscribers only. There is
/// no backlog: a subscriber that connects late sees only later events.
#[derive(Default)]
pub struct ProgressBroadcaster {
    next_id: AtomicU64,
    channels: Arc<Registry>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, owner: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        self.channels
            .lock()
            .entry(owner.to_string())
            .or_default()
            .push((id, tx));
        debug!(owner, subscription = id, "progress subscriber connected");
        Subscription {
            id,
            owner: owner.to_string(),
            rx,
            registry: Arc::downgrade(&self.channels),
        }
    }

    pub fn unsubscribe(&self, owner: &str, id: u64) {
        remove(&self.channels, owner, id);
    }

    /// Send `envelope` to every subscriber of `owner`. Subscribers whose
    /// receiving end is gone are dropped; the rest still get the event.
    /// Returns the number of deliveries.
    pub fn publish(&self, owner: &str, envelope: &ProgressEnvelope) -> usize {
        let mut channels = self.channels.lock();
        let Some(list) = channels.get_mut(owner) else {
            return 0;
        };
        list.retain(|(id, tx)| {
            let alive = tx.send(envelope.clone()).is_ok();
            if !alive {
                debug!(owner, subscription = *id, "dropping disconnected progress subscriber");
            }
            alive
        });
        let delivered = list.len();
        if list.is_empty() {
            channels.remove(owner);
        }
        delivered
    }

    pub fn subscriber_count(&self, owner: &str) -> usize {
        self.channels.lock().get(owner).map_or(0, Vec::len)
    }

    pub fn owner_count(&self) -> usize {
        self.channels.lock().len()
    }
}
