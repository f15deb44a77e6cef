//! Transmit pipeline: pending queue, retry policy and the worker draining them.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::device::Transceiver;
use crate::error::RadioError;
use crate::message::{MessageIdCycle, OutboundMessage, Payload, SendRequest};
use crate::queue::PriorityQueue;
use crate::state::{Phase, SharedState};
use crate::{LoRaAddress, LoRaDestination, BROADCAST_ADDRESS};

/// How often a flush waiting on the pending queue checks that the radio is still on.
const FLUSH_RECHECK: Duration = Duration::from_millis(50);

/// Acknowledged send attempts and the exponential backoff between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    /// Pause following the failed `attempt` (counted from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Handle to the pending queue of a node.
///
/// Cheap to clone. Given to receive callbacks so they can answer what they hear.
#[derive(Clone)]
pub struct Outbox {
    pending: Arc<PriorityQueue<SendRequest>>,
    state: Arc<SharedState>,
}

impl Outbox {
    pub(crate) fn new(pending: Arc<PriorityQueue<SendRequest>>, state: Arc<SharedState>) -> Self {
        Self { pending, state }
    }

    /// Queues `payload` for `destination`.
    ///
    /// With `wait`, returns only once the pending queue has been drained by the transmitter.
    pub fn enqueue(
        &self,
        payload: impl Into<Payload>,
        destination: LoRaAddress,
        priority: i32,
        wait: bool,
    ) -> Result<(), RadioError> {
        if !self.state.is_on() {
            return Err(RadioError::off_for_sending());
        }
        let payload = payload.into();
        debug!(
            "Queuing {} for {} with priority {}",
            payload, destination, priority
        );
        self.pending.push(
            priority,
            SendRequest {
                priority,
                payload,
                destination,
            },
        );
        if wait {
            self.flush()?;
        }
        Ok(())
    }

    pub fn broadcast(&self, payload: impl Into<Payload>, priority: i32) -> Result<(), RadioError> {
        self.enqueue(payload, BROADCAST_ADDRESS, priority, false)
    }

    /// Blocks until the pending queue is empty. Fails if the radio is turned off first.
    pub fn flush(&self) -> Result<(), RadioError> {
        loop {
            if self.pending.wait_empty(FLUSH_RECHECK) {
                return Ok(());
            }
            if !self.state.is_on() {
                return Err(RadioError::NotReady {
                    context: "radio was turned off before pending messages were sent".to_owned(),
                });
            }
        }
    }

    /// Like [flush](Self::flush) but gives up at `deadline`. Returns whether the queue drained.
    pub fn flush_until(&self, deadline: Instant) -> bool {
        loop {
            let now = Instant::now();
            if now >= deadline || !self.state.is_on() {
                return self.pending.is_empty();
            }
            if self.pending.wait_empty(FLUSH_RECHECK.min(deadline - now)) {
                return true;
            }
        }
    }

    /// Number of requests not yet picked by the transmitter.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Worker sending pending requests while the radio is in its sending phase.
pub struct Transmitter<T: Transceiver> {
    device: Arc<Mutex<T>>,
    state: Arc<SharedState>,
    pending: Arc<PriorityQueue<SendRequest>>,
    ids: Arc<MessageIdCycle>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl<T> Transmitter<T>
where
    T: Transceiver + Send + 'static,
{
    pub fn new(
        device: Arc<Mutex<T>>,
        state: Arc<SharedState>,
        pending: Arc<PriorityQueue<SendRequest>>,
        ids: Arc<MessageIdCycle>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            device,
            state,
            pending,
            ids,
            retry,
            poll_interval,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("radio-tx".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        info!("Transmitter started.");
        while self.state.wait_for_phase(Phase::Sending) {
            self.transmit_next();
        }
        info!("Transmitter stopped.");
    }

    /// Sends the most urgent pending request, or idles if there is none.
    pub fn transmit_next(&self) {
        let request = match self.pending.try_pop() {
            Some(request) => request,
            None => {
                self.state.sleep_while_on(self.poll_interval);
                return;
            }
        };
        let message = OutboundMessage::new(request, self.ids.next());
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    "Message {} to {} dropped: {}",
                    message.id, message.destination, err
                );
                return;
            }
        };

        if LoRaDestination::from(message.destination).is_global() {
            self.attempt(&bytes, message.destination);
            debug!("Message {} broadcast.", message.id);
            return;
        }

        for attempt in 1..=self.retry.max_attempts {
            if self.attempt(&bytes, message.destination) {
                debug!(
                    "Message {} acknowledged by {} (attempt {}).",
                    message.id, message.destination, attempt
                );
                return;
            }
            if attempt == self.retry.max_attempts {
                break;
            }
            let backoff = self.retry.backoff(attempt);
            trace!(
                "Message {} not acknowledged, retrying in {:?}.",
                message.id,
                backoff
            );
            if !self.state.sleep_while_on(backoff) {
                debug!("Message {} abandoned: radio turned off.", message.id);
                return;
            }
        }
        warn!(
            "Message {} to {} dropped after {} attempts.",
            message.id, message.destination, self.retry.max_attempts
        );
    }

    /// One acknowledged send under the radio lock.
    fn attempt(&self, bytes: &[u8], destination: LoRaAddress) -> bool {
        let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        match device.send_acked(bytes, destination) {
            Ok(acked) => acked,
            Err(err) => {
                debug!("Transceiver failed to send to {}: {:?}", destination, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransceiverConfig;
    use crate::device::PacketInfo;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(Vec<u8>, LoRaAddress)>,
        acks: bool,
    }

    impl Transceiver for Recorder {
        type DeviceError = ();

        fn configure(&mut self, _: LoRaAddress, _: &TransceiverConfig) -> Result<(), ()> {
            Ok(())
        }

        fn is_available(&mut self) -> Result<bool, ()> {
            Ok(false)
        }

        fn receive(&mut self) -> Result<(Vec<u8>, LoRaAddress, PacketInfo), ()> {
            Err(())
        }

        fn send_acked(&mut self, data: &[u8], destination: LoRaAddress) -> Result<bool, ()> {
            self.sent.push((data.to_vec(), destination));
            Ok(self.acks)
        }
    }

    fn setup(acks: bool) -> (Transmitter<Recorder>, Outbox, Arc<Mutex<Recorder>>) {
        let state = Arc::new(SharedState::new(1));
        state.set_on(true);
        let pending = Arc::new(PriorityQueue::new());
        let device = Arc::new(Mutex::new(Recorder {
            acks,
            ..Default::default()
        }));
        let retry = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let transmitter = Transmitter::new(
            device.clone(),
            state.clone(),
            pending.clone(),
            Arc::new(MessageIdCycle::new()),
            retry,
            Duration::from_millis(1),
        );
        (transmitter, Outbox::new(pending, state), device)
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..policy.max_attempts)
            .map(|n| policy.backoff(n).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
        assert_eq!(policy.backoff(6), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn enqueue_refuses_when_off() {
        let state = Arc::new(SharedState::new(1));
        let outbox = Outbox::new(Arc::new(PriorityQueue::new()), state);
        let err = outbox.enqueue("hello", 2, 0, false).unwrap_err();
        assert!(err.is_not_ready());
        assert_eq!(outbox.pending(), 0);
    }

    #[test]
    fn unacknowledged_unicast_uses_every_attempt() {
        let (transmitter, outbox, device) = setup(false);
        outbox.enqueue("hello", 2, 0, false).unwrap();
        transmitter.transmit_next();
        let device = device.lock().unwrap();
        assert_eq!(device.sent.len(), 5);
        assert!(device.sent.iter().all(|(data, _)| data == &device.sent[0].0));
    }

    #[test]
    fn broadcast_is_attempted_once() {
        let (transmitter, outbox, device) = setup(false);
        outbox.broadcast("report", -1).unwrap();
        transmitter.transmit_next();
        assert_eq!(device.lock().unwrap().sent.len(), 1);
        assert_eq!(device.lock().unwrap().sent[0].1, BROADCAST_ADDRESS);
    }

    #[test]
    fn most_urgent_request_goes_first_with_fresh_ids() {
        let (transmitter, outbox, device) = setup(true);
        outbox.enqueue(2, 2, 2, false).unwrap();
        outbox.enqueue(0, 2, 0, false).unwrap();
        outbox.enqueue(1, 2, 1, false).unwrap();
        for _ in 0..3 {
            transmitter.transmit_next();
        }
        let device = device.lock().unwrap();
        let sent: Vec<serde_json::Value> = device
            .sent
            .iter()
            .map(|(data, _)| serde_json::from_slice(data).unwrap())
            .collect();
        let payloads: Vec<_> = sent.iter().map(|m| m["payload"].clone()).collect();
        assert_eq!(payloads, vec![0, 1, 2]);
        let ids: Vec<_> = sent.iter().map(|m| m["id"].clone()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn oversized_payload_is_dropped() {
        let (transmitter, outbox, device) = setup(true);
        outbox.enqueue("x".repeat(300), 2, 0, false).unwrap();
        transmitter.transmit_next();
        assert!(device.lock().unwrap().sent.is_empty());
        assert_eq!(outbox.pending(), 0);
    }

    #[test]
    fn flush_fails_once_turned_off() {
        let (_transmitter, outbox, _device) = setup(true);
        outbox.enqueue("stuck", 2, 0, false).unwrap();
        let state = outbox.state.clone();
        let waiter = thread::spawn(move || outbox.enqueue("also stuck", 2, 0, true));
        thread::sleep(Duration::from_millis(30));
        state.set_on(false);
        assert!(waiter.join().unwrap().unwrap_err().is_not_ready());
    }

    #[test]
    fn flush_until_gives_up_at_the_deadline() {
        let (_transmitter, outbox, _device) = setup(true);
        outbox.enqueue("stuck", 2, 0, false).unwrap();
        let start = Instant::now();
        assert!(!outbox.flush_until(start + Duration::from_millis(80)));
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
