//! Node and transceiver parameters.
//!
//! Every value is checked once, at the boundary, by [RadioConfig::validate]. The radio
//! parameters only accept what the RF95 family of modules supports; anything else is
//! rejected before it can reach the hardware.

use std::convert::TryFrom;
use std::time::Duration;

use crate::scheduler::DutyCycle;
use crate::transmitter::RetryPolicy;
use crate::{LoRaAddress, BROADCAST_ADDRESS};

/// Default size of the duplicate detection window.
pub const DEFAULT_HISTORY_CAPACITY: usize = 255;

const MIN_FREQUENCY_MHZ: f32 = 137.0;
const MAX_FREQUENCY_MHZ: f32 = 1020.0;
const MIN_TX_POWER: i8 = 5;
const MAX_TX_POWER: i8 = 23;

/// Signal bandwidth supported by the modem.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Bandwidth {
    Bw7_8kHz,
    Bw10_4kHz,
    Bw15_6kHz,
    Bw20_8kHz,
    Bw31_25kHz,
    Bw41_7kHz,
    Bw62_5kHz,
    Bw125kHz,
    Bw250kHz,
    Bw500kHz,
}

impl Bandwidth {
    pub fn hz(&self) -> u32 {
        match self {
            Bandwidth::Bw7_8kHz => 7_800,
            Bandwidth::Bw10_4kHz => 10_400,
            Bandwidth::Bw15_6kHz => 15_600,
            Bandwidth::Bw20_8kHz => 20_800,
            Bandwidth::Bw31_25kHz => 31_250,
            Bandwidth::Bw41_7kHz => 41_700,
            Bandwidth::Bw62_5kHz => 62_500,
            Bandwidth::Bw125kHz => 125_000,
            Bandwidth::Bw250kHz => 250_000,
            Bandwidth::Bw500kHz => 500_000,
        }
    }
}

impl TryFrom<u32> for Bandwidth {
    type Error = ConfigError;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        match hz {
            7_800 => Ok(Bandwidth::Bw7_8kHz),
            10_400 => Ok(Bandwidth::Bw10_4kHz),
            15_600 => Ok(Bandwidth::Bw15_6kHz),
            20_800 => Ok(Bandwidth::Bw20_8kHz),
            31_250 => Ok(Bandwidth::Bw31_25kHz),
            41_700 => Ok(Bandwidth::Bw41_7kHz),
            62_500 => Ok(Bandwidth::Bw62_5kHz),
            125_000 => Ok(Bandwidth::Bw125kHz),
            250_000 => Ok(Bandwidth::Bw250kHz),
            500_000 => Ok(Bandwidth::Bw500kHz),
            other => Err(ConfigError::UnsupportedBandwidth { hz: other }),
        }
    }
}

/// LoRa spreading factor, SF6 to SF12.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct SpreadingFactor(u8);

impl SpreadingFactor {
    pub const SF7: SpreadingFactor = SpreadingFactor(7);

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SpreadingFactor {
    type Error = ConfigError;

    fn try_from(sf: u8) -> Result<Self, Self::Error> {
        if (6..=12).contains(&sf) {
            Ok(SpreadingFactor(sf))
        } else {
            Err(ConfigError::UnsupportedSpreadingFactor { sf })
        }
    }
}

/// Coding rate, stored as the denominator of 4/x (5 to 8).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct CodingRate(u8);

impl CodingRate {
    pub const CR4_5: CodingRate = CodingRate(5);

    pub fn denominator(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CodingRate {
    type Error = ConfigError;

    fn try_from(denominator: u8) -> Result<Self, Self::Error> {
        if (5..=8).contains(&denominator) {
            Ok(CodingRate(denominator))
        } else {
            Err(ConfigError::UnsupportedCodingRate { denominator })
        }
    }
}

/// Parameters handed to the [Transceiver](crate::device::Transceiver) when the radio is turned on.
#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverConfig {
    pub frequency_mhz: f32,
    /// dBm
    pub tx_power: i8,
    pub bandwidth: Bandwidth,
    pub spreading_factor: SpreadingFactor,
    pub coding_rate: CodingRate,
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 434.0,
            tx_power: 14,
            bandwidth: Bandwidth::Bw125kHz,
            spreading_factor: SpreadingFactor::SF7,
            coding_rate: CodingRate::CR4_5,
        }
    }
}

impl TransceiverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_FREQUENCY_MHZ..=MAX_FREQUENCY_MHZ).contains(&self.frequency_mhz) {
            return Err(ConfigError::FrequencyOutOfRange {
                mhz: self.frequency_mhz,
            });
        }
        if !(MIN_TX_POWER..=MAX_TX_POWER).contains(&self.tx_power) {
            return Err(ConfigError::TxPowerOutOfRange {
                dbm: self.tx_power,
            });
        }
        Ok(())
    }
}

/// Full configuration of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    /// Address of this node, fixed for as long as the radio is on.
    pub address: LoRaAddress,
    pub transceiver: TransceiverConfig,
    pub duty_cycle: DutyCycle,
    pub retry: RetryPolicy,
    /// Number of `(source, id, timestamp)` identities remembered for duplicate detection.
    pub history_capacity: usize,
    /// Idle time between two empty polls of the transceiver or of the pending queue.
    pub poll_interval: Duration,
    /// Whether the node answers discovery requests from other nodes.
    pub answer_discovery: bool,
}

impl RadioConfig {
    pub fn new(address: LoRaAddress) -> Self {
        Self {
            address,
            transceiver: TransceiverConfig::default(),
            duty_cycle: DutyCycle::default(),
            retry: RetryPolicy::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            poll_interval: Duration::from_millis(10),
            answer_discovery: true,
        }
    }

    pub fn with_transceiver(mut self, transceiver: TransceiverConfig) -> Self {
        self.transceiver = transceiver;
        self
    }

    pub fn with_duty_cycle(mut self, period: Duration, listening_ratio: f64) -> Self {
        self.duty_cycle = DutyCycle {
            period,
            listening_ratio,
        };
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_discovery_answers(mut self, answer_discovery: bool) -> Self {
        self.answer_discovery = answer_discovery;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address == BROADCAST_ADDRESS {
            return Err(ConfigError::ReservedAddress {
                address: self.address,
            });
        }
        self.transceiver.validate()?;
        let ratio = self.duty_cycle.listening_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::ListeningRatioOutOfRange { ratio });
        }
        if self.duty_cycle.period.is_zero() {
            return Err(ConfigError::ZeroDutyPeriod);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::ZeroHistoryCapacity);
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Address {} is reserved for broadcast and cannot be used by a node.", .address)]
    ReservedAddress { address: LoRaAddress },

    #[error("Frequency {}MHz is out of range ({}-{}MHz).", .mhz, MIN_FREQUENCY_MHZ, MAX_FREQUENCY_MHZ)]
    FrequencyOutOfRange { mhz: f32 },

    #[error("TX power {}dBm is out of range ({}-{}dBm).", .dbm, MIN_TX_POWER, MAX_TX_POWER)]
    TxPowerOutOfRange { dbm: i8 },

    #[error("Unsupported bandwidth: {}Hz.", .hz)]
    UnsupportedBandwidth { hz: u32 },

    #[error("Unsupported spreading factor: SF{}.", .sf)]
    UnsupportedSpreadingFactor { sf: u8 },

    #[error("Unsupported coding rate: 4/{}.", .denominator)]
    UnsupportedCodingRate { denominator: u8 },

    #[error("Listening ratio must be strictly between 0 and 1 (is: {}).", .ratio)]
    ListeningRatioOutOfRange { ratio: f64 },

    #[error("Duty cycle period must not be zero.")]
    ZeroDutyPeriod,

    #[error("Retry policy needs at least one attempt.")]
    ZeroAttempts,

    #[error("Message history capacity must not be zero.")]
    ZeroHistoryCapacity,
}
