use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::traits::{EventPublisher, EventSubscriber};
use crate::transport::Transport;

/// ZeroMQ PUB socket publisher.
///
/// Messages are sent as two-frame ZMQ messages:
/// 1. Topic string (used by SUB sockets for prefix filtering)
/// 2. JSON payload
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqPublisher {
    /// Bind a PUB socket; subscribers connect to it.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, EisenbahnError> {
        transport.ensure_ipc_dir()?;
        transport.remove_stale_socket()?;

        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Connect a PUB socket to a forwarding device that binds the endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, EisenbahnError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting PUB socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    async fn publish(&self, message: Message) -> Result<(), EisenbahnError> {
        let Message { topic, payload } = message;

        let mut zmq_msg = ZmqMessage::from(topic.as_str());
        zmq_msg.push_back(payload.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(topic = %topic, "published message");
        Ok(())
    }
}

/// ZeroMQ SUB socket subscriber, the receiving side of [`ZmqPublisher`].
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
}

impl ZmqSubscriber {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, EisenbahnError> {
        let mut socket = SubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting SUB socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventSubscriber for ZmqSubscriber {
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), EisenbahnError> {
        let mut socket = self.socket.lock().await;
        socket.subscribe(topic_prefix).await?;
        info!(topic_prefix = %topic_prefix, "subscribed to topic prefix");
        Ok(())
    }

    /// Expects a two-frame ZMQ message: [topic, payload].
    async fn recv(&self) -> Result<Message, EisenbahnError> {
        let mut socket = self.socket.lock().await;
        let zmq_msg = socket.recv().await?;

        let frames: Vec<_> = zmq_msg.iter().collect();
        match frames.as_slice() {
            [topic, payload, ..] => {
                let topic = String::from_utf8_lossy(topic.as_ref()).into_owned();
                debug!(topic = %topic, "received message");
                Ok(Message::raw(topic, payload.to_vec()))
            }
            [_] => Err(EisenbahnError::Transport(
                "single-frame message without payload".into(),
            )),
            [] => Err(EisenbahnError::Transport("empty ZMQ message".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zmq_message_two_frame_construction() {
        let mut msg = ZmqMessage::from("attributes");
        msg.push_back(br#"{"attr_value":"a.com"}"#.to_vec().into());

        let frames: Vec<_> = msg.iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), b"attributes");
        assert_eq!(frames[1].as_ref(), br#"{"attr_value":"a.com"}"#);
    }

    #[tokio::test]
    async fn direct_pub_sub_roundtrip() {
        let transport = Transport::tcp("127.0.0.1", 15790);

        let publisher = ZmqPublisher::bind(&transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let subscriber = ZmqSubscriber::connect(&transport).await.unwrap();
        subscriber.subscribe("attributes").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let msg = Message::raw("attributes", br#"{"attr_value":"a.com"}"#.to_vec());
        publisher.publish(msg.clone()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), subscriber.recv())
            .await
            .expect("timed out waiting for message")
            .unwrap();

        assert_eq!(received, msg);
    }
}
