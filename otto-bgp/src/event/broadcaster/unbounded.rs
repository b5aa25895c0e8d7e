use crate::event::channel::{EventConsumer, EventPublisher, pub_sub};
use std::sync::{Arc, Mutex};

/// Fan-out broadcaster: every subscriber receives every broadcast message.
/// Disconnected subscribers are pruned lazily on the next broadcast.
///
/// Used to fan `NotificationEvent`s out to the SMTP sink, any CLI progress
/// renderer, and test harnesses at once without coupling them to each other.
///
/// ```
/// use otto_bgp::event::broadcaster::unbounded::UnboundedBroadcast;
///
/// let broadcaster = UnboundedBroadcast::new();
/// let subscriber = broadcaster.subscribe();
/// broadcaster.broadcast("hello");
/// assert_eq!(subscriber.recv().unwrap(), "hello");
/// ```
#[derive(Clone)]
pub struct UnboundedBroadcast<T> {
    subscribers: Arc<Mutex<Vec<EventPublisher<T>>>>,
}

impl<T: Clone> Default for UnboundedBroadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> UnboundedBroadcast<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> EventConsumer<T> {
        let (publisher, consumer) = pub_sub();
        self.subscribers
            .lock()
            .expect("broadcaster mutex poisoned")
            .push(publisher);
        consumer
    }

    pub fn broadcast(&self, message: T) {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("broadcaster mutex poisoned");
        subscribers.retain(|publisher| publisher.publish(message.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("broadcaster mutex poisoned")
            .len()
    }
}
