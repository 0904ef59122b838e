use crate::completion::Completion;
use crate::error::{Fault, PipelineError, Result};
use crate::handle::MessageHandle;
use crate::protocol::{Block, OfferStatus, Source, Target};
use parking_lot::Mutex;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

type Action<T> = Box<dyn Fn(T) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> + Send + Sync>;

#[derive(Debug, Default)]
struct ActionState {
    closed: bool,
    in_flight: usize,
}

/// Sink stage that runs a closure on every accepted value.
///
/// The closure runs inline on the offering thread. If it fails the stage
/// faults and declines everything afterwards. After [`Block::complete`] the
/// stage finishes the actions already running, then settles its completion.
pub struct ActionStage<T> {
    name: String,
    action: Action<T>,
    state: Mutex<ActionState>,
    completion: Completion,
    processed: AtomicU64,
}

impl<T> ActionStage<T> {
    /// Stage that runs `action` for every accepted value
    pub fn new<F, E>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(T) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            name: name.into(),
            action: Box::new(move |value| action(value).map_err(Into::into)),
            state: Mutex::new(ActionState::default()),
            completion: Completion::new(),
            processed: AtomicU64::new(0),
        }
    }

    /// Name used in log events
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values the closure has handled successfully
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn finish_one(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        let idle = state.closed && state.in_flight == 0;
        drop(state);

        if idle && self.completion.try_complete() {
            debug!(stage = %self.name, "action stage completed");
        }
    }
}

impl<T> Block for ActionStage<T>
where
    T: Send + 'static,
{
    fn complete(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let idle = state.in_flight == 0;
        drop(state);

        if idle && self.completion.try_complete() {
            debug!(stage = %self.name, "action stage completed");
        }
    }

    fn fault(&self, fault: Fault) {
        self.state.lock().closed = true;
        if self.completion.try_fault(fault.clone()) {
            warn!(stage = %self.name, error = %fault, "action stage faulted");
        }
    }

    fn completion(&self) -> Completion {
        self.completion.clone()
    }
}

impl<T> Target<T> for ActionStage<T>
where
    T: Send + 'static,
{
    fn offer(
        &self,
        handle: MessageHandle,
        value: T,
        source: Option<&dyn Source<T>>,
        consume_to_accept: bool,
    ) -> Result<OfferStatus> {
        if !handle.is_valid() {
            return Err(PipelineError::InvalidHandle(handle.id()));
        }

        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(OfferStatus::DecliningPermanently);
            }
            state.in_flight += 1;
        }

        let value = if consume_to_accept {
            let consumed = match source {
                Some(source) => source.consume(handle, self),
                None => Err(PipelineError::MissingSource),
            };
            match consumed {
                Ok(Some(value)) => value,
                Ok(None) => {
                    self.finish_one();
                    return Ok(OfferStatus::NotAvailable);
                }
                Err(err) => {
                    self.finish_one();
                    return Err(err);
                }
            }
        } else {
            value
        };

        match (self.action)(value) {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.fault(Fault::from_error(&*err));
            }
        }
        self.finish_one();
        Ok(OfferStatus::Accepted)
    }
}
