//! Link frame: a 4-byte addressing header followed by the payload, one LoRa packet each.
//!
//! ```text
//! +----+------+----+-------+-----------------+
//! | to | from | id | flags | payload ...     |
//! +----+------+----+-------+-----------------+
//! ```
use bitflags::bitflags;

use crate::LoRaAddress;

/// Largest packet the modem can put on air.
pub const MAX_LORA_PAYLOAD: usize = 255;
pub const HEADER_LENGTH: usize = 4;
/// Body of an acknowledgment frame.
pub const ACK_PAYLOAD: &[u8] = b"!";

/// Trait to calculate size on frame for every component on frame.
pub trait FrameSize {
    /// Calculate component size on frame (meaning encoded) in bytes.
    fn size(&self) -> usize;
}

bitflags! {
    pub struct HeaderFlags: u8 {
        /// The frame acknowledges the frame with the same id.
        const ACK = 0b1000_0000;
        /// The frame is a retransmission.
        const RETRY = 0b0100_0000;
    }
}

/// Addressing header of a link frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkHeader {
    pub to: LoRaAddress,
    pub from: LoRaAddress,
    pub id: u8,
    pub flags: HeaderFlags,
}

impl LinkHeader {
    pub fn is_ack(&self) -> bool {
        self.flags.contains(HeaderFlags::ACK)
    }

    /// Header of the acknowledgment answering this frame, sent by `local`.
    pub fn ack_from(&self, local: LoRaAddress) -> Self {
        LinkHeader {
            to: self.from,
            from: local,
            id: self.id,
            flags: HeaderFlags::ACK,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LENGTH] {
        [self.to, self.from, self.id, self.flags.bits()]
    }

    pub fn try_from_bytes(bytes: &[u8]) -> Result<(Self, usize), FrameError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(FrameError::InvalidHeader {
                context: Some(format!(
                    "Link header is too small ({} bytes).",
                    bytes.len()
                )),
            });
        }
        Ok((
            LinkHeader {
                to: bytes[0],
                from: bytes[1],
                id: bytes[2],
                flags: HeaderFlags::from_bits_truncate(bytes[3]),
            },
            HEADER_LENGTH,
        ))
    }
}

/// Full representation of a link frame with header and payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkFrame {
    pub header: LinkHeader,
    pub payload: Vec<u8>,
}

impl LinkFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let size = self.size();
        if size > MAX_LORA_PAYLOAD {
            return Err(FrameError::TooBig { size });
        }
        let mut bytes = Vec::with_capacity(size);
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() > MAX_LORA_PAYLOAD {
            return Err(FrameError::TooBig { size: bytes.len() });
        }
        let (header, read) = LinkHeader::try_from_bytes(bytes)?;
        Ok(LinkFrame {
            header,
            payload: bytes[read..].to_vec(),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Invalid header. Context: {}", .context.as_deref().unwrap_or("<none>"))]
    InvalidHeader { context: Option<String> },

    #[error("Frame is too big to be transmitted (is: {}B, max: {}B)!", .size, MAX_LORA_PAYLOAD)]
    TooBig { size: usize },
}

impl FrameSize for LinkHeader {
    fn size(&self) -> usize {
        HEADER_LENGTH
    }
}

impl FrameSize for LinkFrame {
    fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_is_to_from_id_flags_payload() {
        let frame = LinkFrame {
            header: LinkHeader {
                to: 2,
                from: 1,
                id: 9,
                flags: HeaderFlags::RETRY,
            },
            payload: b"hi".to_vec(),
        };
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes, vec![2, 1, 9, 0b0100_0000, b'h', b'i']);
        assert_eq!(LinkFrame::try_from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            LinkFrame::try_from_bytes(&[1, 2, 3]),
            Err(FrameError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let frame = LinkFrame {
            header: LinkHeader {
                to: 2,
                from: 1,
                id: 0,
                flags: HeaderFlags::empty(),
            },
            payload: vec![0; MAX_LORA_PAYLOAD],
        };
        assert!(matches!(frame.to_bytes(), Err(FrameError::TooBig { size: 259 })));
    }

    #[test]
    fn ack_answers_the_sender_with_the_same_id() {
        let header = LinkHeader {
            to: 2,
            from: 1,
            id: 42,
            flags: HeaderFlags::empty(),
        };
        let ack = header.ack_from(2);
        assert_eq!((ack.to, ack.from, ack.id), (1, 2, 42));
        assert!(ack.is_ack());
        assert!(!header.is_ack());
    }
}
