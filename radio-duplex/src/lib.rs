//! Half-duplex messaging over a single LoRa transceiver.
//!
//! A [DuplexRadio] timeshares one radio between a listening window and a sending window
//! (the duty cycle), queues outbound requests by priority, retries unacknowledged unicast
//! sends with an exponential backoff, and filters and deduplicates what it hears before
//! handing it to the application.
//!
//! ## Usages
//! ```rust,ignore
//! let config = radio_duplex::config::RadioConfig::new(1);
//! let mut radio = radio_duplex::DuplexRadio::new(transceiver, config)?;
//! radio.turn_on()?;
//! radio.enqueue("hello", 2, radio_duplex::DEFAULT_PRIORITY, false)?;
//! if let Some(message) = radio.receive_one(std::time::Duration::from_secs(1))? {
//!     println!("{} says {}", message.source, message.payload);
//! }
//! ```
//! The hardware itself is reached through the [Transceiver](device::Transceiver) trait,
//! either implemented directly by a driver or through the [LoRaRadio](device::radio::LoRaRadio)
//! adapter for devices implementing the `radio` HAL traits.

pub mod config;
pub mod device;
pub mod discovery;
pub mod duplex;
pub mod error;
pub mod history;
pub mod message;
pub mod queue;
pub mod receiver;
pub mod scheduler;
pub mod state;
pub mod transmitter;

pub use duplex::DuplexRadio;
pub use error::RadioError;
pub use message::{InboundMessage, OutboundMessage, Payload};
pub use state::Phase;

/// Node address on the radio link.
pub type LoRaAddress = u8;

/// Reserved destination meaning "every node". Never acknowledged.
pub const BROADCAST_ADDRESS: LoRaAddress = 255;

/// Priority used when the caller has no preference. Lower values are sent first.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Destination of an outbound message, as seen by the link.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LoRaDestination {
    /// Every node in range, no acknowledgment expected.
    Global,
    /// A single node, acknowledged.
    Unique(LoRaAddress),
}

impl LoRaDestination {
    pub fn address(&self) -> LoRaAddress {
        match self {
            LoRaDestination::Global => BROADCAST_ADDRESS,
            LoRaDestination::Unique(addr) => *addr,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, LoRaDestination::Global)
    }
}

impl From<LoRaAddress> for LoRaDestination {
    fn from(addr: LoRaAddress) -> Self {
        if addr == BROADCAST_ADDRESS {
            LoRaDestination::Global
        } else {
            LoRaDestination::Unique(addr)
        }
    }
}
