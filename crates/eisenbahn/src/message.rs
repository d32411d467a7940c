use serde::{Deserialize, Serialize};

/// A broadcast message: routing topic plus JSON payload bytes.
///
/// The payload travels unwrapped so consumers in any language can decode it
/// directly. On ZeroMQ the topic is the first frame and the payload the
/// second; on Redis the topic is the channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing topic (e.g. `attributes`).
    pub topic: String,

    /// JSON-encoded payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message, serializing the payload as JSON.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_vec(payload)?,
        })
    }

    /// Create a message from already-encoded payload bytes.
    pub fn raw(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Flag {
        value: String,
    }

    #[test]
    fn json_payload_is_plain_json() {
        let msg = Message::json("attributes", &Flag { value: "a.com".into() }).unwrap();
        assert_eq!(msg.topic, "attributes");
        assert_eq!(msg.payload_str(), Some(r#"{"value":"a.com"}"#));
        assert_eq!(msg.decode::<Flag>().unwrap(), Flag { value: "a.com".into() });
    }

    #[test]
    fn raw_keeps_bytes() {
        let msg = Message::raw("t", b"\xff\x00".to_vec());
        assert!(msg.payload_str().is_none());
        assert!(msg.decode::<Flag>().is_err());
    }
}
