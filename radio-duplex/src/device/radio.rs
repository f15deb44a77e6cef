use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use ::radio::{Power, Receive, ReceiveInfo, Transmit};
use embedded_hal::blocking::delay::DelayMs;
use log::{debug, trace, warn};

use super::device::{PacketInfo, Transceiver};
use super::frame::{self, FrameSize, HeaderFlags, LinkFrame, LinkHeader, ACK_PAYLOAD};
use crate::config::{ConfigError, TransceiverConfig};
use crate::{LoRaAddress, LoRaDestination, BROADCAST_ADDRESS};

/// Timing of the link-level acknowledgment exchange.
///
/// These are the retransmissions performed by the link itself for a single `send_acked`
/// call, below the message-level retry policy of the transmitter.
#[derive(Debug, Copy, Clone)]
pub struct LinkParams {
    /// Retransmissions after the first transmission when no ack comes back.
    pub retries: u8,
    /// How long to wait for an ack after each transmission.
    pub ack_timeout: Duration,
    /// Longest time a single transmission may take before the radio is considered stuck.
    pub tx_timeout: Duration,
    /// Pause between two polls of the radio, in ms.
    pub poll_delay: u32,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            retries: 3,
            ack_timeout: Duration::from_millis(200),
            tx_timeout: Duration::from_secs(2),
            poll_delay: 5,
        }
    }
}

/// Radio physical device representation.
pub trait Radio<C, E>:
    Transmit<Error = E>
    + Receive<Error = E>
    + Power<Error = E>
    + ::radio::Channel<Channel = C, Error = E>
    + DelayMs<u32>
{
}

impl<
        C: Debug,
        E: Debug,
        T: Transmit<Error = E>
            + Receive<Error = E>
            + Power<Error = E>
            + ::radio::Channel<Channel = C, Error = E>
            + DelayMs<u32>,
    > Radio<C, E> for T
{
}

/// [Transceiver] implementation for a LoRa radio module.
///
/// Adds addressing and acknowledgments on top of the raw packet radio: every packet carries a
/// [LinkHeader], unicast frames addressed to this node are acknowledged on reception, and
/// [send_acked](Transceiver::send_acked) retransmits until the matching ack comes back.
///
/// `channel_for` turns the radio parameters into the driver specific channel description.
pub struct LoRaRadio<T, C, E, F>
where
    T: Radio<C, E>,
    C: Debug,
    E: Debug,
    F: Fn(&TransceiverConfig) -> C,
{
    radio: T,
    channel_for: F,
    params: LinkParams,
    address: LoRaAddress,
    next_id: u8,
    rx_buffer: Option<(LinkFrame, i16)>,
    phantom: PhantomData<fn() -> (C, E)>,
}

impl<T, C, E, F> LoRaRadio<T, C, E, F>
where
    T: Radio<C, E>,
    C: Debug,
    E: Debug,
    F: Fn(&TransceiverConfig) -> C,
{
    /// Initialize a new LoRa radio as transceiver. It gets its address on [configure](Transceiver::configure).
    pub fn new(radio: T, channel_for: F, params: LinkParams) -> Self {
        Self {
            radio,
            channel_for,
            params,
            address: BROADCAST_ADDRESS,
            next_id: 0,
            rx_buffer: None,
            phantom: PhantomData,
        }
    }

    pub fn address(&self) -> LoRaAddress {
        self.address
    }

    /// The underlying driver.
    pub fn radio(&self) -> &T {
        &self.radio
    }

    /// Puts one frame on air and goes back to reception.
    fn transmit_frame(&mut self, frame: &LinkFrame) -> Result<(), LinkError<E>> {
        let bytes = frame.to_bytes()?;
        trace!("Transmitting {} bytes to {}", frame.size(), frame.header.to);
        self.radio
            .start_transmit(&bytes)
            .map_err(LinkError::InternalRadioError)?;
        let start = Instant::now();
        while !self
            .radio
            .check_transmit()
            .map_err(LinkError::InternalRadioError)?
        {
            if start.elapsed() > self.params.tx_timeout {
                return Err(LinkError::TransmitTimeout);
            }
            self.radio.delay_ms(self.params.poll_delay);
        }
        self.radio
            .start_receive()
            .map_err(LinkError::InternalRadioError)?;
        Ok(())
    }

    /// Reads one packet from the radio if there is one. Garbage is dropped here.
    fn poll_frame(&mut self) -> Result<Option<(LinkFrame, i16)>, LinkError<E>> {
        if !self
            .radio
            .check_receive(true)
            .map_err(LinkError::InternalRadioError)?
        {
            return Ok(None);
        }
        let mut buf = [0u8; frame::MAX_LORA_PAYLOAD];
        let (size, info) = self
            .radio
            .get_received(&mut buf)
            .map_err(LinkError::InternalRadioError)?;
        match LinkFrame::try_from_bytes(&buf[..size.min(buf.len())]) {
            Ok(frame) => Ok(Some((frame, info.rssi()))),
            Err(err) => {
                debug!("Packet ignored: {}", err);
                Ok(None)
            }
        }
    }

    fn buffer_data_frame(&mut self, frame: LinkFrame, rssi: i16) {
        if self.rx_buffer.is_none() {
            self.rx_buffer = Some((frame, rssi));
        } else {
            debug!(
                "Packet from {} dropped: reception buffer is full.",
                frame.header.from
            );
        }
    }

    fn wait_ack(&mut self, from: LoRaAddress, id: u8) -> Result<bool, LinkError<E>> {
        let start = Instant::now();
        while start.elapsed() < self.params.ack_timeout {
            match self.poll_frame()? {
                Some((frame, _)) if frame.header.is_ack() => {
                    let h = frame.header;
                    if h.from == from && h.id == id && h.to == self.address {
                        return Ok(true);
                    }
                    trace!("Ignoring unrelated ack {} from {}", h.id, h.from);
                }
                Some((frame, rssi)) => self.buffer_data_frame(frame, rssi),
                None => self.radio.delay_ms(self.params.poll_delay),
            }
        }
        Ok(false)
    }
}

impl<T, C, E, F> Transceiver for LoRaRadio<T, C, E, F>
where
    T: Radio<C, E>,
    C: Debug,
    E: Debug,
    F: Fn(&TransceiverConfig) -> C,
{
    type DeviceError = LinkError<E>;

    fn configure(
        &mut self,
        address: LoRaAddress,
        config: &TransceiverConfig,
    ) -> Result<(), Self::DeviceError> {
        config.validate()?;
        if address == BROADCAST_ADDRESS {
            return Err(ConfigError::ReservedAddress { address }.into());
        }
        let channel = (self.channel_for)(config);
        debug!("Configuring radio {} on {:?}", address, channel);
        self.radio
            .set_channel(&channel)
            .map_err(LinkError::InternalRadioError)?;
        self.radio
            .set_power(config.tx_power)
            .map_err(LinkError::InternalRadioError)?;
        self.radio
            .start_receive()
            .map_err(LinkError::InternalRadioError)?;
        self.address = address;
        self.rx_buffer = None;
        Ok(())
    }

    fn is_available(&mut self) -> Result<bool, Self::DeviceError> {
        if self.rx_buffer.is_some() {
            return Ok(true);
        }
        match self.poll_frame()? {
            Some((frame, _)) if frame.header.is_ack() => {
                trace!("Late ack {} from {} ignored.", frame.header.id, frame.header.from);
                Ok(false)
            }
            Some((frame, rssi)) => {
                self.rx_buffer = Some((frame, rssi));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn receive(&mut self) -> Result<(Vec<u8>, LoRaAddress, PacketInfo), Self::DeviceError> {
        let (frame, rssi) = self.rx_buffer.take().ok_or(LinkError::NothingAvailable)?;
        let header = frame.header;
        if header.to == self.address {
            let ack = LinkFrame {
                header: header.ack_from(self.address),
                payload: ACK_PAYLOAD.to_vec(),
            };
            if let Err(err) = self.transmit_frame(&ack) {
                warn!("Failed to acknowledge frame {} from {}: {}", header.id, header.from, err);
            }
        }
        let info = PacketInfo {
            destination: header.to,
            id: header.id,
            rssi,
        };
        Ok((frame.payload, header.from, info))
    }

    fn send_acked(
        &mut self,
        data: &[u8],
        destination: LoRaAddress,
    ) -> Result<bool, Self::DeviceError> {
        self.next_id = self.next_id.wrapping_add(1);
        let mut frame = LinkFrame {
            header: LinkHeader {
                to: destination,
                from: self.address,
                id: self.next_id,
                flags: HeaderFlags::empty(),
            },
            payload: data.to_vec(),
        };
        for attempt in 0..=self.params.retries {
            if attempt > 0 {
                frame.header.flags.insert(HeaderFlags::RETRY);
            }
            self.transmit_frame(&frame)?;
            if LoRaDestination::from(destination).is_global() {
                return Ok(true);
            }
            if self.wait_ack(destination, frame.header.id)? {
                return Ok(true);
            }
            debug!(
                "No ack from {} for frame {} (transmission {}).",
                destination,
                frame.header.id,
                attempt + 1
            );
        }
        Ok(false)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LinkError<R>
where
    R: Debug,
{
    #[error("Bad frame error.")]
    FrameError(#[from] frame::FrameError),

    #[error("Invalid radio configuration.")]
    Config(#[from] ConfigError),

    #[error("No frame available.")]
    NothingAvailable,

    #[error("Transmission did not complete in time.")]
    TransmitTimeout,

    #[error("Internal radio error.")]
    InternalRadioError(/*#[source]*/ R),
}
