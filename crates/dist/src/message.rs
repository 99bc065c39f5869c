use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hive_core::Location;

/// Wire-format message envelope exchanged between nodes.
///
/// Messages are serialized with MessagePack. The `topic` field names the
/// payload type, while `correlation_id` matches a reply to its request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Payload kind (e.g. "hive.take.request").
    pub topic: String,

    /// Node that produced this message.
    pub sender: Location,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// When this message was created.
    pub timestamp: DateTime<Utc>,

    /// Correlation ID for request-response matching.
    pub correlation_id: Uuid,

    /// Schema version for forward-compatible evolution.
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a new message, serializing the payload with MessagePack.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        sender: Location,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::with_correlation(topic, sender, payload, Uuid::new_v4())
    }

    /// Create a message with an explicit correlation ID.
    pub fn with_correlation<T: Serialize>(
        topic: impl Into<String>,
        sender: Location,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            sender,
            payload: rmp_serde::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id,
            version: 1,
        })
    }

    /// Build the reply to this message, keeping its correlation ID.
    pub fn reply<T: Serialize>(
        &self,
        topic: impl Into<String>,
        sender: Location,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::with_correlation(topic, sender, payload, self.correlation_id)
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    /// Serialize this entire message envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a message envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// `Vec<u8>` as raw MessagePack bytes rather than an array of integers.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_survives_the_wire() {
        let msg = Message::new("hive.test", Location(3), &vec![1u64, 2, 3]).unwrap();
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.topic, "hive.test");
        assert_eq!(decoded.sender, Location(3));
        assert_eq!(decoded.correlation_id, msg.correlation_id);
        assert_eq!(decoded.decode::<Vec<u64>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn reply_keeps_correlation() {
        let request = Message::new("ask", Location(0), &"ping").unwrap();
        let reply = request.reply("answer", Location(1), &true).unwrap();
        assert_eq!(reply.correlation_id, request.correlation_id);
        assert_eq!(reply.sender, Location(1));
        assert!(reply.decode::<bool>().unwrap());
    }

    #[test]
    fn payload_type_mismatch_is_an_error() {
        let msg = Message::new("hive.test", Location(0), &"text").unwrap();
        assert!(msg.decode::<u64>().is_err());
    }
}
