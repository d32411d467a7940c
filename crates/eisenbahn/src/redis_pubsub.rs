//! Redis `PUBLISH` broadcast.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::traits::EventPublisher;

/// Publishes each message on the Redis channel named by its topic.
///
/// The connection manager reconnects on its own after a dropped
/// connection; a publish that fails in the meantime returns the error.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(url: &str) -> Result<Self, EisenbahnError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("redis publisher connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&message.topic, &message.payload).await?;
        debug!(topic = %message.topic, receivers, "published message");
        Ok(())
    }
}
