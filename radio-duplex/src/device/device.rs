use std::fmt::Debug;

use crate::config::TransceiverConfig;
use crate::LoRaAddress;

/// Link-layer metadata attached to a received frame.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PacketInfo {
    /// Destination the frame was addressed to (possibly the broadcast address).
    pub destination: LoRaAddress,
    /// Link-level frame identifier. Unrelated to the message id carried in the payload.
    pub id: u8,
    pub rssi: i16,
}

/// Blocking interface to a half-duplex transceiver.
///
/// Implementations are not expected to be reentrant: the caller serializes every call.
pub trait Transceiver {
    type DeviceError: Debug;

    /// Initializes the hardware for the node `address` with the given radio parameters.
    fn configure(
        &mut self,
        address: LoRaAddress,
        config: &TransceiverConfig,
    ) -> Result<(), Self::DeviceError>;

    /// Non-blocking check for a pending inbound frame.
    fn is_available(&mut self) -> Result<bool, Self::DeviceError>;

    /// Takes the pending inbound frame. Fails when nothing is ready.
    fn receive(&mut self) -> Result<(Vec<u8>, LoRaAddress, PacketInfo), Self::DeviceError>;

    /// Sends `data` to `destination` and blocks until it is acknowledged or the link gives up.
    ///
    /// A broadcast is never acknowledged, whatever this returns for it.
    fn send_acked(
        &mut self,
        data: &[u8],
        destination: LoRaAddress,
    ) -> Result<bool, Self::DeviceError>;
}
