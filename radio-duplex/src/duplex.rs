use std::collections::BTreeSet;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::RadioConfig;
use crate::device::Transceiver;
use crate::discovery::{self, DISCOVERY_PRIORITY, REPORT, RESPONDER_NAME};
use crate::error::RadioError;
use crate::history::MessageHistory;
use crate::message::{InboundMessage, MessageIdCycle, Payload, SendRequest};
use crate::queue::PriorityQueue;
use crate::receiver::{CallbackRegistry, Inbox, Receiver};
use crate::scheduler::Scheduler;
use crate::state::{Phase, SharedState};
use crate::transmitter::{Outbox, Transmitter};
use crate::LoRaAddress;

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A node sharing one half-duplex transceiver between a receive and a transmit pipeline.
///
/// The inbox, the pending queue, the callbacks and the message id counter belong to the node
/// and survive [turn_off](Self::turn_off). Workers, duplicate history and duty cycle are
/// created anew by every [turn_on](Self::turn_on).
pub struct DuplexRadio<T>
where
    T: Transceiver + Send + 'static,
{
    device: Arc<Mutex<T>>,
    config: RadioConfig,
    state: Arc<SharedState>,
    pending: Arc<PriorityQueue<SendRequest>>,
    inbox: Inbox,
    callbacks: CallbackRegistry,
    ids: Arc<MessageIdCycle>,
    workers: Vec<JoinHandle<()>>,
    scheduler: Option<Scheduler>,
}

impl<T> DuplexRadio<T>
where
    T: Transceiver + Send + 'static,
{
    /// Builds an idle node around `device`. Nothing touches the hardware before [turn_on](Self::turn_on).
    pub fn new(device: T, config: RadioConfig) -> Result<Self, RadioError> {
        config.validate()?;
        let callbacks = CallbackRegistry::new();
        if config.answer_discovery {
            callbacks.register(RESPONDER_NAME, discovery::responder());
        }
        Ok(Self {
            device: Arc::new(Mutex::new(device)),
            state: Arc::new(SharedState::new(config.address)),
            config,
            pending: Arc::new(PriorityQueue::new()),
            inbox: Inbox::new(),
            callbacks,
            ids: Arc::new(MessageIdCycle::new()),
            workers: Vec::with_capacity(2),
            scheduler: None,
        })
    }

    pub fn address(&self) -> LoRaAddress {
        self.state.address()
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn is_on(&self) -> bool {
        self.state.is_on()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Messages waiting to be received.
    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    /// Sending handle usable from other threads.
    pub fn outbox(&self) -> Outbox {
        Outbox::new(self.pending.clone(), self.state.clone())
    }

    /// Configures the transceiver, starts both pipelines and the duty cycle. Idempotent.
    pub fn turn_on(&mut self) -> Result<(), RadioError> {
        if self.state.is_on() {
            return Ok(());
        }
        {
            let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
            device
                .configure(self.config.address, &self.config.transceiver)
                .map_err(|err| RadioError::Transceiver {
                    context: format!("{:?}", err),
                })?;
        }
        self.state.set_on(true);
        if let Err(err) = self.start_workers() {
            error!("Radio {} failed to start: {}", self.address(), err);
            self.turn_off();
            return Err(err);
        }
        info!("Radio {} is on.", self.address());
        Ok(())
    }

    fn start_workers(&mut self) -> Result<(), RadioError> {
        let receiver = Receiver::new(
            self.device.clone(),
            self.state.clone(),
            self.inbox.clone(),
            self.callbacks.clone(),
            self.outbox(),
            MessageHistory::new(self.config.history_capacity),
            self.config.poll_interval,
        );
        let transmitter = Transmitter::new(
            self.device.clone(),
            self.state.clone(),
            self.pending.clone(),
            self.ids.clone(),
            self.config.retry.clone(),
            self.config.poll_interval,
        );
        self.workers.push(receiver.spawn()?);
        self.workers.push(transmitter.spawn()?);
        self.scheduler = Some(Scheduler::start(
            self.state.clone(),
            self.config.duty_cycle.clone(),
        )?);
        Ok(())
    }

    /// Stops both pipelines and the duty cycle. Queued messages stay where they are. Idempotent.
    pub fn turn_off(&mut self) {
        if !self.state.is_on() && self.workers.is_empty() && self.scheduler.is_none() {
            return;
        }
        self.state.set_on(false);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("A radio worker of {} panicked.", self.state.address());
            }
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        self.state.set_phase(Phase::Idle);
        info!("Radio {} is off.", self.address());
    }

    /// Queues `payload` for `destination`. Lower `priority` values are sent first.
    ///
    /// With `wait`, blocks until every pending message has been handed to the transceiver.
    pub fn enqueue(
        &self,
        payload: impl Into<Payload>,
        destination: LoRaAddress,
        priority: i32,
        wait: bool,
    ) -> Result<(), RadioError> {
        self.outbox().enqueue(payload, destination, priority, wait)
    }

    pub fn broadcast(&self, payload: impl Into<Payload>, priority: i32) -> Result<(), RadioError> {
        self.outbox().broadcast(payload, priority)
    }

    fn ensure_receivable(&self) -> Result<(), RadioError> {
        if !self.state.is_on() && self.inbox.is_empty() {
            return Err(RadioError::off_for_receiving());
        }
        Ok(())
    }

    /// Next message of the inbox, waiting up to `timeout`.
    pub fn receive_one(&self, timeout: Duration) -> Result<Option<InboundMessage>, RadioError> {
        self.ensure_receivable()?;
        Ok(self.inbox.get_one(timeout))
    }

    /// Next message of the inbox, waiting up to [DEFAULT_RECEIVE_TIMEOUT].
    pub fn receive(&self) -> Result<Option<InboundMessage>, RadioError> {
        self.receive_one(DEFAULT_RECEIVE_TIMEOUT)
    }

    /// Every message currently in the inbox.
    pub fn receive_all(&self) -> Result<impl Iterator<Item = InboundMessage> + '_, RadioError> {
        self.ensure_receivable()?;
        Ok(self.inbox.get_all())
    }

    /// Never-ending sequence of inbox messages.
    pub fn receive_stream(&self) -> Result<impl Iterator<Item = InboundMessage>, RadioError> {
        self.ensure_receivable()?;
        Ok(self.inbox.stream())
    }

    /// Adds a hook run on every decoded message, after those already registered.
    pub fn register_callback<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(InboundMessage, &Outbox) -> Option<InboundMessage> + Send + Sync + 'static,
    {
        self.callbacks.register(name, Arc::new(callback));
    }

    /// Finds the nodes in range answering discovery within `timeout`.
    ///
    /// The duty cycle is suspended while replies are collected: the node only listens.
    /// Messages received meanwhile are kept, behind the ones that arrive afterwards.
    pub fn discover(&mut self, timeout: Duration) -> Result<BTreeSet<LoRaAddress>, RadioError> {
        if !self.state.is_on() {
            return Err(RadioError::NotReady {
                context: "radio is off, turn it on before discovering nodes".to_owned(),
            });
        }
        let deadline = Instant::now() + timeout;
        let outbox = self.outbox();
        outbox.broadcast(REPORT, DISCOVERY_PRIORITY)?;
        if !outbox.flush_until(deadline) {
            warn!("Discovery request still pending when discovery ended.");
        }

        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        self.state.set_phase(Phase::Listening);
        debug!("Radio {} collecting discovery replies.", self.address());
        let nodes = discovery::collect_replies(&self.inbox, deadline);

        info!("Radio {} discovered {:?}", self.address(), nodes);
        self.resume_duty_cycle()?;
        Ok(nodes)
    }

    /// Discovery with [DEFAULT_DISCOVERY_TIMEOUT].
    pub fn discover_default(&mut self) -> Result<BTreeSet<LoRaAddress>, RadioError> {
        self.discover(DEFAULT_DISCOVERY_TIMEOUT)
    }

    /// Restarts the duty cycle after discovery. A node that cannot cycle is turned off.
    fn resume_duty_cycle(&mut self) -> Result<(), RadioError> {
        if !self.state.is_on() {
            return Ok(());
        }
        match Scheduler::start(self.state.clone(), self.config.duty_cycle.clone()) {
            Ok(scheduler) => {
                self.scheduler = Some(scheduler);
                Ok(())
            }
            Err(err) => {
                error!("Radio {} failed to resume its duty cycle: {}", self.address(), err);
                self.turn_off();
                Err(err.into())
            }
        }
    }

    /// Holds the radio lock for `duration` from a helper thread, suspending all hardware access.
    ///
    /// Returns once the lock is held.
    pub fn lock_for(&self, duration: Duration) -> Result<JoinHandle<()>, RadioError> {
        let device = self.device.clone();
        let (locked, is_locked) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name("radio-lock".into())
            .spawn(move || {
                let _guard = device.lock().unwrap_or_else(PoisonError::into_inner);
                let _ = locked.send(());
                thread::sleep(duration);
            })?;
        let _ = is_locked.recv();
        Ok(handle)
    }
}

impl<T> Drop for DuplexRadio<T>
where
    T: Transceiver + Send + 'static,
{
    fn drop(&mut self) {
        self.turn_off();
    }
}
