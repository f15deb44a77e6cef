#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use radio_duplex::config::TransceiverConfig;
use radio_duplex::device::{PacketInfo, Transceiver};
use radio_duplex::{LoRaAddress, BROADCAST_ADDRESS};

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .is_test(true)
            .try_init();
    });
}

struct Packet {
    data: Vec<u8>,
    source: LoRaAddress,
    info: PacketInfo,
}

/// Shared medium: one mailbox per configured node. Unicast is acknowledged whenever the
/// destination has a mailbox, broadcast reaches every other node and is never acknowledged.
#[derive(Default)]
pub struct Air {
    mailboxes: Mutex<HashMap<LoRaAddress, VecDeque<Packet>>>,
}

/// One send attempt seen by a simulated transceiver.
#[derive(Clone, Debug)]
pub struct Attempt {
    pub at: Instant,
    pub destination: LoRaAddress,
    pub data: Vec<u8>,
}

impl Air {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transceiver(self: &Arc<Self>) -> SimTransceiver {
        SimTransceiver {
            air: self.clone(),
            address: None,
            next_id: 0,
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Puts a raw frame in `to`'s mailbox as if it had been overheard.
    pub fn inject(
        &self,
        to: LoRaAddress,
        source: LoRaAddress,
        destination: LoRaAddress,
        data: Vec<u8>,
    ) {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        mailboxes.entry(to).or_default().push_back(Packet {
            data,
            source,
            info: PacketInfo {
                destination,
                id: 0,
                rssi: -40,
            },
        });
    }

    fn deliver(&self, from: LoRaAddress, destination: LoRaAddress, id: u8, data: &[u8]) -> bool {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        let packet = |data: &[u8]| Packet {
            data: data.to_vec(),
            source: from,
            info: PacketInfo {
                destination,
                id,
                rssi: -40,
            },
        };
        if destination == BROADCAST_ADDRESS {
            for (address, mailbox) in mailboxes.iter_mut() {
                if *address != from {
                    mailbox.push_back(packet(data));
                }
            }
            return false;
        }
        match mailboxes.get_mut(&destination) {
            Some(mailbox) => {
                mailbox.push_back(packet(data));
                true
            }
            None => false,
        }
    }
}

pub struct SimTransceiver {
    air: Arc<Air>,
    address: Option<LoRaAddress>,
    next_id: u8,
    pub attempts: Arc<Mutex<Vec<Attempt>>>,
}

#[derive(Debug)]
pub enum SimError {
    NotConfigured,
    Empty,
}

impl Transceiver for SimTransceiver {
    type DeviceError = SimError;

    fn configure(
        &mut self,
        address: LoRaAddress,
        _config: &TransceiverConfig,
    ) -> Result<(), SimError> {
        self.address = Some(address);
        self.air
            .mailboxes
            .lock()
            .unwrap()
            .entry(address)
            .or_default();
        Ok(())
    }

    fn is_available(&mut self) -> Result<bool, SimError> {
        let address = self.address.ok_or(SimError::NotConfigured)?;
        let mailboxes = self.air.mailboxes.lock().unwrap();
        Ok(mailboxes.get(&address).map_or(false, |m| !m.is_empty()))
    }

    fn receive(&mut self) -> Result<(Vec<u8>, LoRaAddress, PacketInfo), SimError> {
        let address = self.address.ok_or(SimError::NotConfigured)?;
        let mut mailboxes = self.air.mailboxes.lock().unwrap();
        let packet = mailboxes
            .get_mut(&address)
            .and_then(|m| m.pop_front())
            .ok_or(SimError::Empty)?;
        Ok((packet.data, packet.source, packet.info))
    }

    fn send_acked(&mut self, data: &[u8], destination: LoRaAddress) -> Result<bool, SimError> {
        let address = self.address.ok_or(SimError::NotConfigured)?;
        self.attempts.lock().unwrap().push(Attempt {
            at: Instant::now(),
            destination,
            data: data.to_vec(),
        });
        self.next_id = self.next_id.wrapping_add(1);
        Ok(self.air.deliver(address, destination, self.next_id, data))
    }
}

/// Raw application frame as another node would have sent it.
pub fn frame(id: u8, timestamp: u64, payload: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": id,
        "timestamp": timestamp,
        "payload": payload,
    }))
    .unwrap()
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
