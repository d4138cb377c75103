//! Restartable lazy sequences delivered by chain subscriptions.

use tokio::sync::mpsc;

/// Items a subscriber may lag behind before its producer drops it
pub const DEFAULT_CAPACITY: usize = 1024;

/// Receiving half of a chain subscription.
///
/// `next()` yields `None` once the producer is gone, which consumers treat as a
/// disconnect and answer by resubscribing. Dropping the subscription or calling
/// [`Subscription::unsubscribe`] tears the listener down.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

/// Producing half of a chain subscription.
///
/// Sending never waits: a subscriber whose buffer is full is considered gone, and the
/// producer drops this sender so the subscriber sees a disconnect once it catches up.
#[derive(Debug)]
pub struct SubscriptionSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for SubscriptionSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Create a connected subscription pair buffering at most `capacity` items
pub fn channel<T>(capacity: usize) -> (SubscriptionSender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SubscriptionSender { tx }, Subscription { rx })
}

impl<T> Subscription<T> {
    /// Finite subscription that yields the given items and then disconnects
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        let (tx, rx) = channel(items.len());
        for item in items {
            tx.send(item);
        }
        rx
    }

    /// Wait for the next item, `None` means the subscription dropped
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Explicitly stop listening; the producer observes the closed channel
    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

impl<T> SubscriptionSender<T> {
    /// Deliver an item, returns `false` if the subscriber is gone or lagging
    pub fn send(&self, item: T) -> bool {
        self.tx.try_send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
