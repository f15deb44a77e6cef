//! Duty-cycle scheduler: alternates the shared phase between listening and sending.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, trace};
use smol::channel::{Receiver, Sender};
use smol::Timer;

use crate::state::{Phase, SharedState};

/// Split of one duty-cycle period between listening and sending.
#[derive(Debug, Clone, PartialEq)]
pub struct DutyCycle {
    pub period: Duration,
    /// Share of the period spent listening, strictly between 0 and 1.
    pub listening_ratio: f64,
}

impl Default for DutyCycle {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            listening_ratio: 0.5,
        }
    }
}

impl DutyCycle {
    pub fn listening(&self) -> Duration {
        self.period.mul_f64(self.listening_ratio)
    }

    pub fn sending(&self) -> Duration {
        self.period.mul_f64(1.0 - self.listening_ratio)
    }

    /// How long the radio stays in `phase`.
    pub fn duration_of(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Sending => self.sending(),
            Phase::Listening | Phase::Idle => self.listening(),
        }
    }
}

/// A running duty cycle. Only one should be alive per node.
///
/// The timer runs on its own thread, racing each phase timeout against a cancellation
/// channel. Dropping the scheduler cancels it.
pub struct Scheduler {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Switches `state` to [Phase::Listening] right away and starts alternating.
    pub fn start(state: Arc<SharedState>, cycle: DutyCycle) -> io::Result<Self> {
        let (cancel, cancelled) = smol::channel::bounded::<()>(1);
        state.set_phase(Phase::Listening);
        let thread_state = state.clone();
        let handle = thread::Builder::new()
            .name("radio-duty-cycle".into())
            .spawn(move || smol::block_on(run(thread_state, cycle, cancelled)));
        match handle {
            Ok(handle) => Ok(Self {
                cancel: Some(cancel),
                handle: Some(handle),
            }),
            Err(err) => {
                state.set_phase(Phase::Idle);
                Err(err)
            }
        }
    }

    /// Stops the cycle. No phase change happens once this returns. Idempotent.
    pub fn cancel(&mut self) {
        // closing the channel wakes the pending race
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Duty-cycle scheduler panicked.");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(state: Arc<SharedState>, cycle: DutyCycle, cancelled: Receiver<()>) {
    let mut phase = Phase::Listening;
    loop {
        let timeout = cycle.duration_of(phase);
        let elapsed = smol::future::or(
            async {
                Timer::after(timeout).await;
                true
            },
            async {
                let _ = cancelled.recv().await;
                false
            },
        )
        .await;
        if !elapsed {
            break;
        }
        phase = phase.next();
        trace!("Duty cycle: now {}", phase);
        state.set_phase(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn cycle(period_ms: u64, ratio: f64) -> DutyCycle {
        DutyCycle {
            period: Duration::from_millis(period_ms),
            listening_ratio: ratio,
        }
    }

    #[test]
    fn splits_the_period() {
        let c = cycle(1000, 0.9);
        assert_eq!(c.listening(), Duration::from_millis(900));
        assert_eq!(c.sending(), Duration::from_millis(100));
        assert_eq!(c.duration_of(Phase::Sending), c.sending());
    }

    #[test]
    fn starts_listening_synchronously() {
        let state = Arc::new(SharedState::new(1));
        let scheduler = Scheduler::start(state.clone(), cycle(10_000, 0.5)).unwrap();
        assert_eq!(state.phase(), Phase::Listening);
        assert!(scheduler.is_running());
    }

    #[test]
    fn time_per_phase_follows_the_ratio() {
        let state = Arc::new(SharedState::new(1));
        let mut scheduler = Scheduler::start(state.clone(), cycle(100, 0.7)).unwrap();
        let (mut listening, mut sending) = (0u32, 0u32);
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(1500) {
            match state.phase() {
                Phase::Listening => listening += 1,
                Phase::Sending => sending += 1,
                Phase::Idle => panic!("scheduler went idle"),
            }
            thread::sleep(Duration::from_millis(1));
        }
        scheduler.cancel();
        let share = listening as f64 / (listening + sending) as f64;
        assert!((share - 0.7).abs() < 0.15, "listening share was {}", share);
    }

    #[test]
    fn cancel_freezes_the_phase() {
        let state = Arc::new(SharedState::new(1));
        let mut scheduler = Scheduler::start(state.clone(), cycle(20, 0.5)).unwrap();
        thread::sleep(Duration::from_millis(35));
        scheduler.cancel();
        scheduler.cancel();
        assert!(!scheduler.is_running());
        let frozen = state.phase();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(state.phase(), frozen);
    }
}
