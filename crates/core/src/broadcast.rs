//! In-process fan-out of "something changed" notifications to live listeners.
//!
//! Every listener owns a bounded queue. Publishing never waits: a full queue drops the
//! message for that listener only, a closed queue is pruned. Nothing is retained for
//! listeners that subscribe later. Dropping a [`Listener`] unsubscribes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

/// The only message sweeps publish. Listeners re-fetch the stream on receipt.
pub const UPDATE: &str = "update";

#[derive(Debug, Default)]
struct Registry {
    running: bool,
    next_id: u64,
    listeners: HashMap<u64, mpsc::Sender<String>>,
}

pub struct Broadcaster {
    buffer: usize,
    registry: Arc<Mutex<Registry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receiving side of one subscription.
#[derive(Debug)]
pub struct Listener {
    id: u64,
    rx: mpsc::Receiver<String>,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if lock(&registry).listeners.remove(&self.id).is_some() {
                tracing::debug!(listener = self.id, "listener disconnected");
            }
        }
    }
}

impl Listener {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `None` once the broadcaster stops or this listener is unsubscribed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Broadcaster {
    /// Created stopped; call [`Broadcaster::start`] before publishing.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    pub fn start(&self) {
        self.registry().running = true;
        tracing::debug!("broadcaster started");
    }

    /// Disconnects every listener. Later publishes are no-ops until restarted.
    pub fn stop(&self) {
        let mut registry = self.registry();
        registry.running = false;
        let dropped = registry.listeners.len();
        registry.listeners.clear();
        tracing::debug!(dropped, "broadcaster stopped");
    }

    pub fn subscribe(&self) -> Listener {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, tx);
        tracing::debug!(listener = id, total = registry.listeners.len(), "listener subscribed");
        Listener {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.registry().listeners.remove(&id).is_some() {
            tracing::debug!(listener = id, "listener unsubscribed");
        }
    }

    /// Returns how many listeners accepted the message.
    pub fn publish(&self, message: &str) -> usize {
        let mut registry = self.registry();
        if !registry.running {
            return 0;
        }

        let mut delivered = 0;
        registry.listeners.retain(|id, tx| match tx.try_send(message.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(listener = id, "listener queue full; message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_to_current_listeners_only() {
        let b = Broadcaster::new(4);
        b.start();
        let mut first = b.subscribe();
        let mut second = b.subscribe();

        assert_eq!(b.publish(UPDATE), 2);
        let mut late = b.subscribe();

        assert_eq!(first.try_recv().as_deref(), Some(UPDATE));
        assert_eq!(second.try_recv().as_deref(), Some(UPDATE));
        assert_eq!(first.try_recv(), None);
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn full_queue_does_not_block_others() {
        let b = Broadcaster::new(1);
        b.start();
        let mut slow = b.subscribe();
        let mut fast = b.subscribe();

        assert_eq!(b.publish("a"), 2);
        assert_eq!(fast.try_recv().as_deref(), Some("a"));
        assert_eq!(b.publish("b"), 1);
        assert_eq!(fast.try_recv().as_deref(), Some("b"));
        assert_eq!(slow.try_recv().as_deref(), Some("a"));
        assert_eq!(slow.try_recv(), None);
    }

    #[test]
    fn dropped_and_unsubscribed_listeners_are_removed() {
        let b = Broadcaster::new(2);
        b.start();
        let gone = b.subscribe();
        let kept = b.subscribe();
        drop(gone);
        assert_eq!(b.publish(UPDATE), 1);
        assert_eq!(b.subscriber_count(), 1);

        b.unsubscribe(kept.id());
        assert_eq!(b.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stop_disconnects_and_silences() {
        let b = Broadcaster::new(2);
        assert_eq!(b.publish(UPDATE), 0);

        b.start();
        let mut listener = b.subscribe();
        b.stop();
        assert_eq!(listener.recv().await, None);
        assert_eq!(b.publish(UPDATE), 0);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn dropping_listeners_unsubscribes_without_a_publish() {
        let b = Broadcaster::new(2);
        b.start();
        let listeners: Vec<Listener> = (0..1000).map(|_| b.subscribe()).collect();
        assert_eq!(b.subscriber_count(), 1000);
        drop(listeners);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn listener_outliving_broadcaster_drops_cleanly() {
        let b = Broadcaster::new(2);
        b.start();
        let mut listener = b.subscribe();
        drop(b);
        assert_eq!(listener.try_recv(), None);
        drop(listener);
    }

    #[tokio::test]
    async fn each_listener_sees_publish_order() {
        let b = Broadcaster::new(8);
        b.start();
        let mut listener = b.subscribe();
        for msg in ["one", "two", "three"] {
            b.publish(msg);
        }
        assert_eq!(listener.recv().await.as_deref(), Some("one"));
        assert_eq!(listener.recv().await.as_deref(), Some("two"));
        assert_eq!(listener.recv().await.as_deref(), Some("three"));
    }
}
