use std::time::Duration;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};

/// The part of the watchdog that the transit engine drives when acknowledgements arrive. This
///  is a separate abstraction to allow testing the engine without a running timer.
#[cfg_attr(test, automock)]
pub trait TimeoutControl {
    fn is_armed(&self) -> bool;

    /// (re-)arm for a given window base, superseding any previously armed instance
    fn arm(&mut self, base: usize);

    fn disarm(&mut self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchdogState {
    Disarmed,
    Armed { bound_sequence: usize },
    Expired { bound_sequence: usize },
}

/// Sent by a timer task when its deadline passes. The generation identifies the watchdog
///  instance that was armed, so an expiry that was superseded or cancelled in the meantime can
///  be recognized as stale.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WatchdogExpiry {
    pub generation: u64,
    pub bound_sequence: usize,
}

/// A single-shot, restartable timer for the oldest unacknowledged frame.
///
/// Every arming spawns a task that sleeps for the timeout and then reports a [WatchdogExpiry]
///  to the coordinator. Arming again or disarming aborts that task and bumps the generation;
///  aborting is best effort (the expiry may already be queued), the generation check in
///  [Watchdog::on_expiry] is what guarantees that a replaced timer has no effect.
pub struct Watchdog {
    time_out: Duration,
    generation: u64,
    state: WatchdogState,
    expiry_sender: mpsc::Sender<WatchdogExpiry>,
    pending: Option<JoinHandle<()>>,
}
impl Watchdog {
    pub fn new(time_out: Duration, expiry_sender: mpsc::Sender<WatchdogExpiry>) -> Watchdog {
        Watchdog {
            time_out,
            generation: 0,
            state: WatchdogState::Disarmed,
            expiry_sender,
            pending: None,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn bound_sequence(&self) -> Option<usize> {
        match self.state {
            WatchdogState::Armed { bound_sequence } => Some(bound_sequence),
            _ => None,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Returns true if the expiry belongs to the currently armed instance, moving the watchdog to
    ///  `Expired`. A stale expiry is discarded and leaves the state untouched.
    pub fn on_expiry(&mut self, expiry: WatchdogExpiry) -> bool {
        match self.state {
            WatchdogState::Armed { bound_sequence } if expiry.generation == self.generation && expiry.bound_sequence == bound_sequence => {
                debug!("watchdog for frame #{} expired", bound_sequence);
                self.pending = None;
                self.state = WatchdogState::Expired { bound_sequence };
                true
            }
            _ => {
                trace!("discarding stale watchdog expiry {:?}, current generation is {}", expiry, self.generation);
                false
            }
        }
    }
}

impl TimeoutControl for Watchdog {
    fn is_armed(&self) -> bool {
        matches!(self.state, WatchdogState::Armed { .. })
    }

    fn arm(&mut self, base: usize) {
        self.cancel_pending();
        self.generation += 1;
        self.state = WatchdogState::Armed { bound_sequence: base };

        let expiry = WatchdogExpiry {
            generation: self.generation,
            bound_sequence: base,
        };
        debug!("arming watchdog for frame #{} (generation {})", base, self.generation);

        let time_out = self.time_out;
        let expiry_sender = self.expiry_sender.clone();
        self.pending = Some(tokio::spawn(async move {
            time::sleep(time_out).await;
            // the coordinator is gone if this fails, and then there is nobody left to notify
            let _ = expiry_sender.send(expiry).await;
        }));
    }

    fn disarm(&mut self) {
        if self.is_armed() {
            debug!("disarming watchdog (generation {})", self.generation);
        }
        self.cancel_pending();
        self.generation += 1;
        self.state = WatchdogState::Disarmed;
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
