use crate::error::{Fault, PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Signal {
    outcome: Mutex<Option<std::result::Result<(), Fault>>>,
    settled: Condvar,
}

/// One-shot, multi-waiter completion signal.
///
/// Clones share the same signal. It settles exactly once, either
/// successfully or with a [`Fault`]; later settlement attempts lose and
/// report `false`.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    signal: Arc<Signal>,
}

impl Completion {
    /// Unsettled signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle successfully. Returns true if this call settled the signal.
    pub fn try_complete(&self) -> bool {
        self.settle(Ok(()))
    }

    /// Settle with a fault. Returns true if this call settled the signal.
    pub fn try_fault(&self, fault: Fault) -> bool {
        self.settle(Err(fault))
    }

    fn settle(&self, outcome: std::result::Result<(), Fault>) -> bool {
        let mut slot = self.signal.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        drop(slot);
        self.signal.settled.notify_all();
        true
    }

    /// Whether the signal has settled either way
    pub fn is_completed(&self) -> bool {
        self.signal.outcome.lock().is_some()
    }

    /// The settled outcome, if any
    pub fn result(&self) -> Option<Result<()>> {
        self.signal
            .outcome
            .lock()
            .clone()
            .map(|outcome| outcome.map_err(PipelineError::Faulted))
    }

    /// Block until the signal settles
    pub fn wait(&self) -> Result<()> {
        let mut slot = self.signal.outcome.lock();
        while slot.is_none() {
            self.signal.settled.wait(&mut slot);
        }
        Self::outcome(&slot)
    }

    /// Block until the signal settles or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.signal.outcome.lock();
        while slot.is_none() {
            if self.signal.settled.wait_until(&mut slot, deadline).timed_out() && slot.is_none() {
                return Err(PipelineError::Timeout);
            }
        }
        Self::outcome(&slot)
    }

    fn outcome(slot: &Option<std::result::Result<(), Fault>>) -> Result<()> {
        match slot {
            Some(Ok(())) => Ok(()),
            Some(Err(fault)) => Err(PipelineError::Faulted(fault.clone())),
            None => Err(PipelineError::Timeout),
        }
    }
}
