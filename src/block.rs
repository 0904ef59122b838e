//! Priority-ordered propagator block.
//!
//! Accepts `(priority, value)` pairs from any number of producers and
//! delivers values to linked targets highest priority first, FIFO within a
//! priority. The block is reactive: it owns no thread, and every pass of
//! the propagation engine runs on whichever caller triggered it.
//!
//! By default records accumulate while the block is open and are delivered
//! once [`Block::complete`] is called (or on [`PriorityBlock::flush`]), so
//! everything posted before completion is ranked together. With
//! [`PriorityBlockBuilder::propagate_on_accept`] every accepted offer runs a
//! pass immediately instead.
//!
//! All mutable state sits behind one lock. The lock is never held while
//! calling into a target, so targets may call back into the block.

use crate::completion::Completion;
use crate::error::{Fault, PipelineError, Result};
use crate::handle::{HandleAllocator, MessageHandle};
use crate::link::{Link, LinkId, LinkOptions, LinkRegistry};
use crate::metrics::BlockMetrics;
use crate::protocol::{Block, OfferStatus, Source, Target};
use crate::record::{PendingRecord, RecordKey, SequenceCounter};
use crate::store::OrderingStore;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Where a block is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Accepting input
    Open,
    /// No more input; delivering what is buffered
    Draining,
    /// Buffer drained and completion signaled
    Completed,
    /// Aborted by a fault
    Faulted,
}

impl CompletionState {
    /// Whether new offers are refused permanently
    pub fn is_declining(&self) -> bool {
        !matches!(self, CompletionState::Open)
    }

    /// Whether the block has settled its completion signal
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompletionState::Completed | CompletionState::Faulted)
    }
}

struct State<T> {
    store: OrderingStore<T>,
    links: LinkRegistry<T>,
    status: CompletionState,
    /// Set together with `Faulted`
    fault: Option<Fault>,
    /// A propagation pass is running on some caller
    propagating: bool,
    /// Something changed while a pass was running; run another
    rerun: bool,
    /// Confirmed offers that passed the gate and are still consuming
    consuming: usize,
}

struct Shared<T> {
    name: String,
    propagate_on_accept: bool,
    state: Mutex<State<T>>,
    sequence: SequenceCounter,
    handles: HandleAllocator,
    completion: Completion,
    metrics: BlockMetrics,
}

/// Builder for [`PriorityBlock`]
#[derive(Debug, Clone)]
pub struct PriorityBlockBuilder {
    name: String,
    propagate_on_accept: bool,
}

impl PriorityBlockBuilder {
    /// Builder with the default name and deferred delivery
    pub fn new() -> Self {
        Self {
            name: "priority".to_string(),
            propagate_on_accept: false,
        }
    }

    /// Name used in log events
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Deliver to linked targets as soon as an offer is accepted instead of
    /// waiting for completion or an explicit flush
    pub fn propagate_on_accept(mut self, enable: bool) -> Self {
        self.propagate_on_accept = enable;
        self
    }

    /// Validate the options and create the block
    pub fn build<T>(self) -> Result<PriorityBlock<T>>
    where
        T: Clone + Send + 'static,
    {
        if self.name.trim().is_empty() {
            return Err(PipelineError::ConfigError(
                "block name must not be empty".into(),
            ));
        }
        Ok(PriorityBlock::with_options(self))
    }
}

impl Default for PriorityBlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Unbounded priority buffer that is both a [`Target`] of
/// `(priority, value)` pairs and a [`Source`] of values.
///
/// Cloning yields another handle to the same block.
pub struct PriorityBlock<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PriorityBlock<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> PriorityBlock<T>
where
    T: Clone + Send + 'static,
{
    /// Create a block with default options
    pub fn new() -> Self {
        Self::with_options(PriorityBlockBuilder::new())
    }

    fn with_options(options: PriorityBlockBuilder) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: options.name,
                propagate_on_accept: options.propagate_on_accept,
                state: Mutex::new(State {
                    store: OrderingStore::new(),
                    links: LinkRegistry::new(),
                    status: CompletionState::Open,
                    fault: None,
                    propagating: false,
                    rerun: false,
                    consuming: 0,
                }),
                sequence: SequenceCounter::new(),
                handles: HandleAllocator::new(),
                completion: Completion::new(),
                metrics: BlockMetrics::new(),
            }),
        }
    }

    /// Name used in log events
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Counters for this block
    pub fn metrics(&self) -> &BlockMetrics {
        &self.shared.metrics
    }

    /// Current lifecycle state
    pub fn state(&self) -> CompletionState {
        self.shared.state.lock().status
    }

    /// Records accepted but not yet delivered
    pub fn len(&self) -> usize {
        self.shared.state.lock().store.len()
    }

    /// Whether nothing is waiting for delivery
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().store.is_empty()
    }

    /// Number of currently linked targets
    pub fn target_count(&self) -> usize {
        self.shared.state.lock().links.len()
    }

    /// Run a propagation pass now, e.g. after a linked target that declined
    /// earlier has regained capacity.
    pub fn flush(&self) {
        self.propagate();
    }

    /// Store an accepted record. Returns false if the block stopped taking
    /// input before the record could be stored.
    fn admit(&self, priority: i32, payload: T) -> bool {
        let mut state = self.shared.state.lock();
        if state.status != CompletionState::Open {
            return false;
        }
        self.store_record(&mut state, priority, payload);
        true
    }

    /// Store a value taken from a source by a confirmed offer. Only a fault
    /// can keep it out: completion waits for in-flight consumes.
    fn admit_consumed(&self, priority: i32, payload: T) -> bool {
        let mut state = self.shared.state.lock();
        state.consuming -= 1;
        if state.status == CompletionState::Faulted {
            return false;
        }
        self.store_record(&mut state, priority, payload);
        true
    }

    /// Release a consume slot that produced no value.
    fn abandon_consume(&self) {
        self.shared.state.lock().consuming -= 1;
        self.check_completion();
    }

    fn store_record(&self, state: &mut State<T>, priority: i32, payload: T) {
        // Assigned under the lock so sequence order matches acceptance order.
        let sequence = self.shared.sequence.next();
        let inserted = state
            .store
            .insert(PendingRecord::new(priority, sequence, payload));
        debug_assert!(inserted, "sequence {} reused", sequence);
        trace!(block = %self.shared.name, priority, sequence, "record accepted");
    }

    /// Propagate if this block delivers eagerly or has stopped taking input.
    fn propagate_if_due(&self) {
        if self.shared.propagate_on_accept || self.state().is_declining() {
            self.propagate();
        }
    }

    /// Drive the propagation engine. At most one caller runs passes at a
    /// time; others flag a rerun and return without blocking.
    fn propagate(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.propagating {
                state.rerun = true;
                return;
            }
            state.propagating = true;
            state.rerun = false;
        }

        loop {
            self.drain_pass();

            let mut state = self.shared.state.lock();
            if state.rerun && state.status != CompletionState::Faulted {
                state.rerun = false;
                continue;
            }
            state.propagating = false;
            state.rerun = false;
            break;
        }

        self.check_completion();
    }

    /// Deliver records highest rank first until the store is empty or no
    /// target accepts the head record.
    fn drain_pass(&self) {
        loop {
            let (key, payload, accepted_at, targets) = {
                let state = self.shared.state.lock();
                if state.status == CompletionState::Faulted {
                    return;
                }
                let Some(head) = state.store.peek() else {
                    return;
                };
                (
                    head.key,
                    head.payload.clone(),
                    head.accepted_at,
                    state.links.snapshot(),
                )
            };

            match self.deliver(key, payload, &targets) {
                Some(link) => self.confirm_delivery(key, link, accepted_at),
                None => {
                    self.shared.metrics.record_stall();
                    debug!(
                        block = %self.shared.name,
                        priority = key.priority,
                        sequence = key.sequence,
                        targets = targets.len(),
                        "no target accepted head record, pass stalled"
                    );
                    return;
                }
            }
        }
    }

    /// Offer one record to each target in turn. Runs without the lock.
    fn deliver(
        &self,
        key: RecordKey,
        payload: T,
        targets: &[(LinkId, Arc<dyn Target<T>>)],
    ) -> Option<LinkId> {
        for (link, target) in targets {
            let handle = self.shared.handles.allocate();
            match target.offer(handle, payload.clone(), Some(self as &dyn Source<T>), false) {
                Ok(OfferStatus::Accepted) => return Some(*link),
                Ok(status) => {
                    trace!(
                        block = %self.shared.name,
                        sequence = key.sequence,
                        %handle,
                        ?status,
                        "target did not accept record"
                    );
                }
                Err(err) => {
                    debug!(
                        block = %self.shared.name,
                        sequence = key.sequence,
                        %handle,
                        error = %err,
                        "target rejected offer"
                    );
                }
            }
        }
        None
    }

    fn confirm_delivery(&self, key: RecordKey, link: LinkId, accepted_at: Instant) {
        let mut state = self.shared.state.lock();
        if state.store.remove(&key).is_none() {
            // Cleared by a fault while the offer was in flight.
            return;
        }
        if state.links.record_delivery(link) {
            debug!(block = %self.shared.name, "link reached its message limit, detached");
        }
        drop(state);

        self.shared.metrics.record_delivered(accepted_at.elapsed());
        trace!(
            block = %self.shared.name,
            priority = key.priority,
            sequence = key.sequence,
            "record delivered"
        );
    }

    /// Settle completion once draining has emptied the store, then forward
    /// completion to linked targets.
    fn check_completion(&self) {
        let targets = {
            let mut state = self.shared.state.lock();
            if state.status != CompletionState::Draining
                || !state.store.is_empty()
                || state.consuming > 0
            {
                return;
            }
            state.status = CompletionState::Completed;
            state.links.completion_targets()
        };

        if !self.shared.completion.try_complete() {
            return;
        }
        debug!(
            block = %self.shared.name,
            targets = targets.len(),
            "buffer drained, block completed"
        );
        for target in targets {
            target.complete();
        }
    }

    fn unlink(shared: &Weak<Shared<T>>, id: LinkId) {
        if let Some(shared) = shared.upgrade() {
            if shared.state.lock().links.detach(id) {
                debug!(block = %shared.name, "target unlinked");
            }
        }
    }
}

impl<T> Default for PriorityBlock<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PriorityBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PriorityBlock")
            .field("name", &self.shared.name)
            .field("status", &state.status)
            .field("pending", &state.store.len())
            .field("targets", &state.links.len())
            .finish()
    }
}

impl<T> Block for PriorityBlock<T>
where
    T: Clone + Send + 'static,
{
    /// Stop accepting input. Buffered records are still delivered; the
    /// block completes once they are gone.
    fn complete(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.status == CompletionState::Open {
                state.status = CompletionState::Draining;
                debug!(
                    block = %self.shared.name,
                    pending = state.store.len(),
                    "no more input, draining"
                );
            }
        }
        self.propagate();
    }

    /// Abort: discard buffered records, settle the completion signal with
    /// `fault` and forward it to linked targets. Links made with
    /// `propagate_completion(false)` are skipped. Only the first call of
    /// either terminal transition has any effect.
    fn fault(&self, fault: Fault) {
        let (discarded, targets) = {
            let mut state = self.shared.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = CompletionState::Faulted;
            state.fault = Some(fault.clone());
            (state.store.clear(), state.links.completion_targets())
        };

        self.shared.completion.try_fault(fault.clone());
        self.shared.metrics.record_discarded(discarded);
        warn!(
            block = %self.shared.name,
            error = %fault,
            discarded,
            targets = targets.len(),
            "block faulted"
        );
        for target in targets {
            target.fault(fault.clone());
        }
    }

    fn completion(&self) -> Completion {
        self.shared.completion.clone()
    }
}

impl<T> Target<(i32, T)> for PriorityBlock<T>
where
    T: Clone + Send + 'static,
{
    fn offer(
        &self,
        handle: MessageHandle,
        value: (i32, T),
        source: Option<&dyn Source<(i32, T)>>,
        consume_to_accept: bool,
    ) -> Result<OfferStatus> {
        if !handle.is_valid() {
            return Err(PipelineError::InvalidHandle(handle.id()));
        }

        let admitted = if consume_to_accept {
            let source = source.ok_or(PipelineError::MissingSource)?;
            {
                let mut state = self.shared.state.lock();
                if state.status.is_declining() {
                    drop(state);
                    self.shared.metrics.record_declined();
                    return Ok(OfferStatus::DecliningPermanently);
                }
                state.consuming += 1;
            }
            let (priority, payload) = match source.consume(handle, self) {
                Ok(Some(value)) => value,
                Ok(None) => {
                    self.abandon_consume();
                    self.shared.metrics.record_unavailable();
                    return Ok(OfferStatus::NotAvailable);
                }
                Err(err) => {
                    self.abandon_consume();
                    return Err(err);
                }
            };
            let admitted = self.admit_consumed(priority, payload);
            if !admitted {
                self.shared.metrics.record_discarded(1);
                warn!(
                    block = %self.shared.name,
                    %handle,
                    "block faulted while consuming, value discarded"
                );
            }
            admitted
        } else {
            let (priority, payload) = value;
            self.admit(priority, payload)
        };

        if !admitted {
            self.shared.metrics.record_declined();
            return Ok(OfferStatus::DecliningPermanently);
        }

        self.shared.metrics.record_accepted();
        self.propagate_if_due();
        Ok(OfferStatus::Accepted)
    }
}

impl<T> Source<T> for PriorityBlock<T>
where
    T: Clone + Send + 'static,
{
    /// Attach a target. A target linked after termination is told at once.
    fn link_with(&self, target: Arc<dyn Target<T>>, options: LinkOptions) -> Link {
        let (id, status, fault) = {
            let mut state = self.shared.state.lock();
            let id = state.links.attach(Arc::clone(&target), options);
            (id, state.status, state.fault.clone())
        };
        debug!(
            block = %self.shared.name,
            propagate_completion = options.propagate_completion,
            max_messages = options.max_messages.map(|n| n.get()),
            "target linked"
        );

        if options.propagate_completion {
            match (status, fault) {
                (CompletionState::Completed, _) => target.complete(),
                (CompletionState::Faulted, Some(fault)) => target.fault(fault),
                _ => {}
            }
        }

        let shared = Arc::downgrade(&self.shared);
        let link = Link::new(move || Self::unlink(&shared, id));
        self.propagate_if_due();
        link
    }

    /// This block never reserves per target, so there is never anything to
    /// consume.
    fn consume(&self, handle: MessageHandle, _target: &dyn Target<T>) -> Result<Option<T>> {
        if !handle.is_valid() {
            return Err(PipelineError::InvalidHandle(handle.id()));
        }
        Ok(None)
    }

    fn reserve(&self, handle: MessageHandle, _target: &dyn Target<T>) -> Result<bool> {
        if !handle.is_valid() {
            return Err(PipelineError::InvalidHandle(handle.id()));
        }
        Ok(false)
    }

    fn release(&self, handle: MessageHandle, _target: &dyn Target<T>) -> Result<()> {
        if !handle.is_valid() {
            return Err(PipelineError::InvalidHandle(handle.id()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ActionStage;
    use std::time::Duration;

    fn collector<T: Clone + Send + 'static>() -> (Arc<ActionStage<T>>, Arc<Mutex<Vec<T>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let stage = ActionStage::new("collect", move |value: T| {
            sink.lock().push(value);
            Ok::<(), String>(())
        });
        (Arc::new(stage), received)
    }

    #[test]
    fn test_priority_order() {
        let block: PriorityBlock<&str> = PriorityBlock::new();
        for (priority, value) in [(1, "Low"), (5, "High"), (3, "Medium")] {
            assert!(block.post((priority, value)));
        }
        let (action, received) = collector();
        block.link(action.clone()).forget();
        block.complete();

        block.completion().wait_timeout(Duration::from_secs(5)).unwrap();
        action.completion().wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*received.lock(), vec!["High", "Medium", "Low"]);
    }

    #[test]
    fn test_invalid_handle() {
        let block: PriorityBlock<u8> = PriorityBlock::new();
        let result = block.offer(MessageHandle::default(), (1, 7), None, false);
        assert_eq!(result, Err(PipelineError::InvalidHandle(0)));
        assert!(block.is_empty());
    }

    #[test]
    fn test_consume_requires_source() {
        let block: PriorityBlock<u8> = PriorityBlock::new();
        let result = block.offer(MessageHandle::SINGLE, (1, 7), None, true);
        assert_eq!(result, Err(PipelineError::MissingSource));
    }

    #[test]
    fn test_buffers_until_complete() {
        let block: PriorityBlock<char> = PriorityBlock::new();
        let (action, received) = collector();
        block.link(action).forget();
        assert!(block.post((1, 'a')));
        assert!(block.post((2, 'b')));
        assert_eq!(block.len(), 2);
        assert!(received.lock().is_empty());
        assert_eq!(block.state(), CompletionState::Open);

        block.complete();
        assert_eq!(*received.lock(), vec!['b', 'a']);
    }

    #[test]
    fn test_eager_propagation() {
        let block: PriorityBlock<char> = PriorityBlockBuilder::new()
            .propagate_on_accept(true)
            .build()
            .unwrap();
        assert!(block.post((1, 'a')));
        assert_eq!(block.metrics().total_stalls(), 1);

        let (action, received) = collector();
        block.link(action).forget();
        assert!(block.post((2, 'b')));
        assert!(block.is_empty());
        assert_eq!(*received.lock(), vec!['a', 'b']);
    }

    #[test]
    fn test_complete_without_records() {
        let block: PriorityBlock<u8> = PriorityBlock::new();
        block.complete();
        assert_eq!(block.state(), CompletionState::Completed);
        assert_eq!(block.completion().result(), Some(Ok(())));
    }

    #[test]
    fn test_draining_waits_for_target() {
        let block: PriorityBlock<u32> = PriorityBlock::new();
        assert!(block.post((1, 10)));
        block.complete();
        assert_eq!(block.state(), CompletionState::Draining);
        assert!(!block.completion().is_completed());
        assert!(!block.post((1, 11)));

        let (action, received) = collector();
        block.link(action).forget();
        assert_eq!(block.state(), CompletionState::Completed);
        assert_eq!(*received.lock(), vec![10]);
    }

    #[test]
    fn test_fault_clears_buffer() {
        let block: PriorityBlock<i32> = PriorityBlock::new();
        for i in 0..5 {
            block.post((i, i));
        }
        block.fault(Fault::cancelled("owner shutdown"));

        assert!(block.is_empty());
        assert_eq!(block.state(), CompletionState::Faulted);
        assert_eq!(block.metrics().total_discarded(), 5);
        assert_eq!(
            block.completion().wait(),
            Err(PipelineError::Faulted(Fault::cancelled("owner shutdown")))
        );
    }

    #[test]
    fn test_fault_after_completion_ignored() {
        let block: PriorityBlock<u8> = PriorityBlock::new();
        block.complete();
        block.fault(Fault::stage("too late"));
        assert_eq!(block.state(), CompletionState::Completed);
        assert_eq!(block.completion().result(), Some(Ok(())));
    }

    #[test]
    fn test_source_side_stubs() {
        let block: PriorityBlock<u8> = PriorityBlock::new();
        let (action, _) = collector::<u8>();
        let handle = MessageHandle::new(42);
        assert_eq!(block.consume(handle, action.as_ref()), Ok(None));
        assert_eq!(block.reserve(handle, action.as_ref()), Ok(false));
        assert_eq!(block.release(handle, action.as_ref()), Ok(()));
        assert_eq!(
            block.reserve(MessageHandle::default(), action.as_ref()),
            Err(PipelineError::InvalidHandle(0))
        );
    }

    #[test]
    fn test_unlink_on_drop() {
        let block: PriorityBlock<&str> = PriorityBlock::new();
        let (action, received) = collector();
        let link = block.link(action);
        assert_eq!(block.target_count(), 1);
        drop(link);
        assert_eq!(block.target_count(), 0);

        assert!(block.post((1, "kept")));
        assert!(received.lock().is_empty());
        assert_eq!(block.len(), 1);
    }

    #[test]
    fn test_builder_rejects_empty_name() {
        let result = PriorityBlockBuilder::new().name("  ").build::<u8>();
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));

        let block: PriorityBlock<u8> = PriorityBlockBuilder::new().name("jobs").build().unwrap();
        assert_eq!(block.name(), "jobs");
    }
}
