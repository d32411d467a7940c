use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EisenbahnError;
use crate::message::Message;

/// Publishes messages to every current subscriber of a topic.
///
/// Delivery is fire-and-forget: a successful return means the message was
/// handed to the transport, not that anyone received it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError>;
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError> {
        (**self).publish(message).await
    }
}

/// Receives messages whose topics match subscribed prefixes.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to topics with the given prefix. An empty prefix matches all.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), EisenbahnError>;

    /// Receive the next message. Blocks until one is available.
    async fn recv(&self) -> Result<Message, EisenbahnError>;
}

/// Publisher that discards everything, used when broadcasting is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError> {
        tracing::trace!(topic = %message.topic, "broadcast disabled, dropping message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_publisher_accepts_through_arc() {
        let publisher: Arc<dyn EventPublisher> = Arc::new(NoopPublisher);
        publisher
            .publish(Message::raw("attributes", b"{}".to_vec()))
            .await
            .unwrap();
    }
}
