use crossbeam::channel::{Receiver, Sender, unbounded};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventPublisherError {
    #[error("failed to send event: {0}")]
    SendError(String),
}

/// Consuming end of an event channel. Deliberately not `Clone`: one
/// consumer owns the stream; fan-out goes through the broadcaster instead.
pub struct EventConsumer<E>(Receiver<E>);

impl<E> EventConsumer<E> {
    pub fn recv(&self) -> Result<E, crossbeam::channel::RecvError> {
        self.0.recv()
    }

    pub fn try_recv(&self) -> Result<E, crossbeam::channel::TryRecvError> {
        self.0.try_recv()
    }
}

impl<E> AsRef<Receiver<E>> for EventConsumer<E> {
    fn as_ref(&self) -> &Receiver<E> {
        &self.0
    }
}

/// Producing end of an event channel.
pub struct EventPublisher<E>(Sender<E>);

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E> EventPublisher<E> {
    pub fn publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }

    /// Non-blocking publish used on shutdown paths where we must not wait
    /// for a slow or absent consumer.
    pub fn try_publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .try_send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }
}

/// Build a fresh unbounded publisher/consumer pair.
pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (tx, rx) = unbounded();
    (EventPublisher(tx), EventConsumer(rx))
}
