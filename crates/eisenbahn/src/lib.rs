pub mod error;
pub mod message;
pub mod pubsub;
pub mod redis_pubsub;
pub mod traits;
pub mod transport;

pub use error::EisenbahnError;
pub use message::Message;
pub use pubsub::{ZmqPublisher, ZmqSubscriber};
pub use redis_pubsub::RedisPublisher;
pub use traits::{EventPublisher, EventSubscriber, NoopPublisher};
pub use transport::Transport;
