//! Fan-out of line batches to any number of connected subscribers.
//!
//! Every subscriber owns a bounded queue. Publishing never waits on a queue:
//! a subscriber whose queue is full is considered unresponsive and is
//! dropped from the registry on the spot, which closes its queue. Other
//! subscribers keep receiving lines undisturbed. Each subscriber sees lines
//! in file order; nothing is promised about ordering across subscribers.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::Stream as FuturesStream;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task;
use tracing::debug;

use crate::tail::LineBatch;

/// Default number of lines a subscriber may have pending before eviction.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Identity of a registered subscriber, unique for the lifetime of a [`Hub`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Registry {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
}

/// Registry of live subscribers.
///
/// Cloning a `Hub` is cheap and every clone shares the same registry. The
/// registry lock is only held for registration, removal and the
/// non-blocking delivery of a single line in [`publish`](Hub::publish).
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Registry>,
}

impl Debug for Hub {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Hub")
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Hub {
    /// Constructs a hub whose subscribers each buffer up to `capacity`
    /// lines. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Hub {
            inner: Arc::new(Registry {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the queue capacity every subscriber is created with.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Registers a new subscriber with an empty queue.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        self.inner.subscribers.lock().insert(id, tx);
        debug!(subscriber = %id, "subscriber registered");

        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    /// Removes a subscriber and closes its queue. Lines already queued can
    /// still be received.
    ///
    /// Returns `false` if the subscriber was already gone, whether it was
    /// unsubscribed before or evicted by [`publish`](Hub::publish).
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "subscriber unregistered");
        }
        removed
    }

    /// Delivers every line of `batch`, in order, to every registered
    /// subscriber.
    ///
    /// Lines go out one at a time. The registry lock is released and the
    /// task yields between two lines, so a subscriber that keeps reading is
    /// never evicted just because a batch is longer than its queue.
    ///
    /// Returns how many subscribers were evicted because their queue was
    /// full or their receiving side was gone.
    pub async fn publish(&self, batch: &LineBatch) -> usize {
        let mut evicted = 0;
        for (i, line) in batch.iter().enumerate() {
            if i > 0 {
                task::yield_now().await;
            }
            evicted += self.deliver(line);
        }
        evicted
    }

    fn deliver(&self, line: &str) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let before = subscribers.len();

        subscribers.retain(|id, sender| match sender.try_send(line.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(subscriber = %id, "queue full, evicting unresponsive subscriber");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %id, "receiver gone, evicting subscriber");
                false
            }
        });

        before - subscribers.len()
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Returns `true` while `id` is registered, i.e. neither unsubscribed
    /// nor evicted.
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.lock().contains_key(&id)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Receiving side of a subscriber.
///
/// Dropping a `Subscription` unregisters it from its hub, so a consumer that
/// goes away (such as a closed HTTP connection) never lingers in the
/// registry.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<String>,
    hub: Hub,
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Returns the identity this subscription is registered under.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next line.
    ///
    /// Returns `None` once the subscription was evicted or unsubscribed and
    /// every line queued before that has been received.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

impl FuturesStream for Subscription {
    type Item = String;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
