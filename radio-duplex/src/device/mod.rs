//! Everything needed to reach the physical radio module.
//!
//! The rest of the crate only talks to the [Transceiver] trait.
//! [LoRaRadio](self::radio::LoRaRadio) implements it for any driver exposing the `radio` HAL
//! traits.

pub mod device;
pub mod frame;
pub mod radio;

pub use device::*;
