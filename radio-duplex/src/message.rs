//! Application messages and their wire form.
//!
//! On air a message is a JSON object `{"id": .., "timestamp": .., "payload": ..}`. Destination
//! and priority never travel in the frame: the destination is link-layer metadata and the
//! priority only matters to the local scheduler.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::LoRaAddress;

/// Opaque application value carried by a message.
pub type Payload = serde_json::Value;

/// Per-node message identifier, cycling over 0..=255.
pub type MessageId = u8;

/// Largest encoded message that still fits in one LoRa packet once the link header is added.
pub const MAX_MESSAGE_LENGTH: usize = 251;

/// Identity of a received message for duplicate detection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MessageKey {
    pub source: LoRaAddress,
    pub id: MessageId,
    pub timestamp: u64,
}

#[derive(Serialize)]
struct WireFrameRef<'a> {
    id: MessageId,
    timestamp: u64,
    payload: &'a Payload,
}

#[derive(Deserialize)]
struct WireFrame {
    id: MessageId,
    timestamp: u64,
    payload: Payload,
}

/// A message accepted from the air.
///
/// Two inbound messages are equal when they share source, id and timestamp, whatever their
/// payload.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub id: MessageId,
    pub timestamp: u64,
    pub payload: Payload,
    pub source: LoRaAddress,
    pub destination: LoRaAddress,
}

impl InboundMessage {
    /// Decodes a raw frame. `source` and `destination` come from the link metadata.
    ///
    /// Anything that is not a well-formed frame yields `None`.
    pub fn decode(raw: &[u8], source: LoRaAddress, destination: LoRaAddress) -> Option<Self> {
        let frame = serde_json::from_slice::<Payload>(raw).and_then(|value| {
            if value.is_object() {
                serde_json::from_value::<WireFrame>(value)
            } else {
                Err(serde::de::Error::custom("frame is not a JSON object"))
            }
        });
        match frame {
            Ok(frame) => Some(Self {
                id: frame.id,
                timestamp: frame.timestamp,
                payload: frame.payload,
                source,
                destination,
            }),
            Err(err) => {
                debug!(
                    "Unable to convert raw frame <{}> from {} into a message: {}",
                    String::from_utf8_lossy(raw),
                    source,
                    err
                );
                None
            }
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            source: self.source,
            id: self.id,
            timestamp: self.timestamp,
        }
    }
}

impl PartialEq for InboundMessage {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for InboundMessage {}

/// Pending transmission, as queued by the application. It gets an identity only once it is
/// dequeued for transmission.
#[derive(Clone, Debug, PartialEq)]
pub struct SendRequest {
    pub priority: i32,
    pub payload: Payload,
    pub destination: LoRaAddress,
}

/// A message about to be transmitted.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub destination: LoRaAddress,
    pub payload: Payload,
    pub id: MessageId,
    pub timestamp: u64,
    pub priority: i32,
}

impl OutboundMessage {
    pub fn new(request: SendRequest, id: MessageId) -> Self {
        Self {
            destination: request.destination,
            payload: request.payload,
            id,
            timestamp: unix_seconds(),
            priority: request.priority,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let bytes = serde_json::to_vec(&WireFrameRef {
            id: self.id,
            timestamp: self.timestamp,
            payload: &self.payload,
        })?;
        if bytes.len() > MAX_MESSAGE_LENGTH {
            return Err(MessageError::TooLarge { size: bytes.len() });
        }
        Ok(bytes)
    }
}

/// Cycling source of message identifiers, one per node.
#[derive(Debug, Default)]
pub struct MessageIdCycle(AtomicU8);

impl MessageIdCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> MessageId {
        // fetch_add wraps on overflow
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("Message is too big to be transmitted (is: {}B, max: {}B)!", .size, MAX_MESSAGE_LENGTH)]
    TooLarge { size: usize },

    #[error("Message serialization failed.")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outbound(payload: Payload, id: MessageId) -> OutboundMessage {
        OutboundMessage::new(
            SendRequest {
                priority: 0,
                payload,
                destination: 2,
            },
            id,
        )
    }

    #[test]
    fn decode_restores_what_encode_wrote() {
        let payloads = vec![
            json!(null),
            json!(true),
            json!(-42),
            json!(3.5),
            json!("report"),
            json!([1, "two", [3]]),
            json!({"chunk_number": 4, "text": "Le pélican de Jonathan", "nested": {"ok": false}}),
        ];
        for payload in payloads {
            let message = outbound(payload.clone(), 17);
            let raw = message.encode().unwrap();
            let decoded = InboundMessage::decode(&raw, 1, 2).expect("frame should decode");
            assert_eq!(decoded.id, 17);
            assert_eq!(decoded.timestamp, message.timestamp);
            assert_eq!(decoded.payload, payload);
            assert_eq!(decoded.source, 1);
            assert_eq!(decoded.destination, 2);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let message = outbound(json!({"b": 1, "a": [true, null]}), 3);
        assert_eq!(message.encode().unwrap(), message.encode().unwrap());
    }

    #[test]
    fn malformed_frames_decode_to_nothing() {
        assert!(InboundMessage::decode(b"", 1, 2).is_none());
        assert!(InboundMessage::decode(b"\xff\xfe\x00", 1, 2).is_none());
        assert!(InboundMessage::decode(b"[1, 2, 3]", 1, 2).is_none());
        assert!(InboundMessage::decode(br#"[7, 1700000000, "x"]"#, 1, 2).is_none());
        assert!(InboundMessage::decode(br#""report""#, 1, 2).is_none());
        assert!(InboundMessage::decode(br#"{"id": 1, "timestamp": 5}"#, 1, 2).is_none());
        assert!(InboundMessage::decode(br#"{"id": 1, "payload": "x"}"#, 1, 2).is_none());
        assert!(InboundMessage::decode(br#"{"timestamp": 5, "payload": "x"}"#, 1, 2).is_none());
        assert!(
            InboundMessage::decode(br#"{"id": 300, "timestamp": 5, "payload": "x"}"#, 1, 2)
                .is_none()
        );
    }

    #[test]
    fn explicit_null_payload_is_a_valid_frame() {
        let decoded =
            InboundMessage::decode(br#"{"id": 1, "timestamp": 5, "payload": null}"#, 1, 2);
        assert_eq!(decoded.map(|m| m.payload), Some(Payload::Null));
    }

    #[test]
    fn equality_ignores_payload() {
        let a = InboundMessage::decode(br#"{"id": 1, "timestamp": 5, "payload": "a"}"#, 1, 2);
        let b = InboundMessage::decode(br#"{"id": 1, "timestamp": 5, "payload": "b"}"#, 1, 255);
        let c = InboundMessage::decode(br#"{"id": 1, "timestamp": 5, "payload": "a"}"#, 3, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn oversized_messages_are_refused() {
        let message = outbound(json!("x".repeat(MAX_MESSAGE_LENGTH)), 0);
        assert!(matches!(
            message.encode(),
            Err(MessageError::TooLarge { .. })
        ));
    }

    #[test]
    fn ids_cycle_over_256_values() {
        let ids = MessageIdCycle::new();
        let first: Vec<MessageId> = (0..256).map(|_| ids.next()).collect();
        assert_eq!(first[0], 0);
        assert_eq!(first[255], 255);
        assert_eq!(ids.next(), 0);
    }
}
