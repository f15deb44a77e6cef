//! Receive pipeline: polls the transceiver while listening, filters what it hears and fills
//! the inbox.

use std::io;
use std::iter;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace};

use crate::device::Transceiver;
use crate::history::MessageHistory;
use crate::message::InboundMessage;
use crate::queue::PriorityQueue;
use crate::state::{Phase, SharedState};
use crate::transmitter::Outbox;
use crate::{LoRaAddress, BROADCAST_ADDRESS};

/// Inbox tier of freshly accepted messages.
pub const INBOX_PRIORITY_ACCEPTED: i32 = 0;
/// Inbox tier of messages put back after being set aside, behind fresh ones.
pub const INBOX_PRIORITY_REQUEUED: i32 = 1;

const STREAM_WAIT: Duration = Duration::from_secs(1);

/// Hook run on every decoded message before it is filtered.
///
/// Returns the (possibly transformed) message to keep processing it, or `None` to drop it.
/// The [Outbox] lets a hook answer right away.
pub type Callback = Arc<dyn Fn(InboundMessage, &Outbox) -> Option<InboundMessage> + Send + Sync>;

/// Ordered set of named callbacks, shared by the node and its receive worker.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Arc<RwLock<Vec<(String, Callback)>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, callback: Callback) {
        let name = name.into();
        debug!("Registering receive callback {}", name);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, callback));
    }

    pub fn names(&self) -> Vec<String> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Runs every callback in registration order, stopping at the first veto.
    pub fn apply(&self, mut message: InboundMessage, outbox: &Outbox) -> Option<InboundMessage> {
        // callbacks may register other callbacks: never run them under the lock
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (name, callback) in callbacks.iter() {
            match callback(message, outbox) {
                Some(next) => message = next,
                None => {
                    debug!("Message dropped by callback {}", name);
                    return None;
                }
            }
        }
        Some(message)
    }
}

/// Messages accepted by the receive pipeline, waiting for the application.
#[derive(Clone, Default)]
pub struct Inbox {
    queue: Arc<PriorityQueue<InboundMessage>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, priority: i32, message: InboundMessage) {
        self.queue.push(priority, message);
    }

    /// Waits up to `timeout` for a message.
    pub fn get_one(&self, timeout: Duration) -> Option<InboundMessage> {
        self.queue.pop_timeout(timeout)
    }

    /// Drains what is already there, without waiting.
    pub fn get_all(&self) -> impl Iterator<Item = InboundMessage> + '_ {
        iter::from_fn(move || self.queue.try_pop())
    }

    /// Endless sequence of messages, blocking between arrivals.
    pub fn stream(&self) -> impl Iterator<Item = InboundMessage> {
        let queue = self.queue.clone();
        iter::from_fn(move || loop {
            if let Some(message) = queue.pop_timeout(STREAM_WAIT) {
                return Some(message);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Worker taking frames from the transceiver while the radio is listening.
pub struct Receiver<T: Transceiver> {
    device: Arc<Mutex<T>>,
    state: Arc<SharedState>,
    inbox: Inbox,
    callbacks: CallbackRegistry,
    outbox: Outbox,
    history: MessageHistory,
    poll_interval: Duration,
}

impl<T> Receiver<T>
where
    T: Transceiver + Send + 'static,
{
    pub fn new(
        device: Arc<Mutex<T>>,
        state: Arc<SharedState>,
        inbox: Inbox,
        callbacks: CallbackRegistry,
        outbox: Outbox,
        history: MessageHistory,
        poll_interval: Duration,
    ) -> Self {
        Self {
            device,
            state,
            inbox,
            callbacks,
            outbox,
            history,
            poll_interval,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("radio-rx".into())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        info!("Receiver started.");
        while self.state.wait_for_phase(Phase::Listening) {
            self.receive_next();
        }
        info!("Receiver stopped.");
    }

    /// One receive cycle: takes a frame if the transceiver has one, idles otherwise.
    pub fn receive_next(&mut self) {
        match self.poll_device() {
            Some((raw, source, destination)) => {
                self.accept(&raw, source, destination);
            }
            None => {
                self.state.sleep_while_on(self.poll_interval);
            }
        }
    }

    fn poll_device(&self) -> Option<(Vec<u8>, LoRaAddress, LoRaAddress)> {
        let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        match device.is_available() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                debug!("Transceiver availability check failed: {:?}", err);
                return None;
            }
        }
        match device.receive() {
            Ok((raw, source, info)) => {
                trace!(
                    "Frame of {} bytes from {} (rssi {})",
                    raw.len(),
                    source,
                    info.rssi
                );
                Some((raw, source, info.destination))
            }
            Err(err) => {
                debug!("Transceiver failed to hand over a frame: {:?}", err);
                None
            }
        }
    }

    /// Decodes and filters a raw frame. Returns whether it reached the inbox.
    pub fn accept(&mut self, raw: &[u8], source: LoRaAddress, destination: LoRaAddress) -> bool {
        let message = match InboundMessage::decode(raw, source, destination) {
            Some(message) => message,
            None => return false,
        };
        let message = match self.callbacks.apply(message, &self.outbox) {
            Some(message) => message,
            None => return false,
        };
        if message.destination != self.state.address() && message.destination != BROADCAST_ADDRESS
        {
            debug!(
                "Message {} from {} is for {}, ignored.",
                message.id, message.source, message.destination
            );
            return false;
        }
        let key = message.key();
        if self.history.contains(&key) {
            debug!("Duplicate message {} from {} ignored.", key.id, key.source);
            return false;
        }
        self.history.record(key);
        debug!(
            "Message {} from {} accepted: {}",
            message.id, message.source, message.payload
        );
        self.inbox.push(INBOX_PRIORITY_ACCEPTED, message);
        true
    }
}
