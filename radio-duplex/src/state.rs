//! State shared between the application, the pipelines and the duty-cycle scheduler.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::LoRaAddress;

/// Duty-cycle phase of the radio.
///
/// Holding a single phase value (rather than two flags) makes "listening and sending at the
/// same time" unrepresentable.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// The radio is off, or on but not yet scheduled.
    Idle,
    Listening,
    Sending,
}

impl Phase {
    /// The phase that follows this one in the duty cycle.
    pub fn next(&self) -> Phase {
        match self {
            Phase::Listening => Phase::Sending,
            Phase::Sending | Phase::Idle => Phase::Listening,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Listening => write!(f, "listening"),
            Phase::Sending => write!(f, "sending"),
        }
    }
}

#[derive(Debug)]
struct Flags {
    is_on: bool,
    phase: Phase,
}

/// Lifecycle flag and duty-cycle phase, observed concurrently by every worker.
///
/// Any change wakes every waiter, so clearing `is_on` is enough to release a pipeline parked
/// on its phase.
#[derive(Debug)]
pub struct SharedState {
    address: LoRaAddress,
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl SharedState {
    pub fn new(address: LoRaAddress) -> Self {
        Self {
            address,
            flags: Mutex::new(Flags {
                is_on: false,
                phase: Phase::Idle,
            }),
            changed: Condvar::new(),
        }
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> LoRaAddress {
        self.address
    }

    pub fn is_on(&self) -> bool {
        self.flags().is_on
    }

    pub fn set_on(&self, is_on: bool) {
        self.flags().is_on = is_on;
        self.changed.notify_all();
    }

    pub fn phase(&self) -> Phase {
        self.flags().phase
    }

    pub fn set_phase(&self, phase: Phase) {
        self.flags().phase = phase;
        self.changed.notify_all();
    }

    pub fn listening(&self) -> bool {
        self.phase() == Phase::Listening
    }

    pub fn sending(&self) -> bool {
        self.phase() == Phase::Sending
    }

    /// Blocks until the radio is in `phase` or turned off.
    ///
    /// Returns `true` when the caller may proceed, `false` once the radio is off.
    pub fn wait_for_phase(&self, phase: Phase) -> bool {
        let guard = self
            .changed
            .wait_while(self.flags(), |f| f.is_on && f.phase != phase)
            .unwrap_or_else(PoisonError::into_inner);
        guard.is_on
    }

    /// Sleeps for `duration` unless the radio is turned off first.
    ///
    /// Returns whether the radio is still on.
    pub fn sleep_while_on(&self, duration: Duration) -> bool {
        let (guard, _) = self
            .changed
            .wait_timeout_while(self.flags(), duration, |f| f.is_on)
            .unwrap_or_else(PoisonError::into_inner);
        guard.is_on
    }
}
