use crate::completion::Completion;
use crate::error::{Fault, PipelineError, Result};
use crate::handle::MessageHandle;
use crate::protocol::{Block, OfferStatus, Source, Target};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Determines how the buffer handles an offer when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the offer with [`OfferStatus::Declined`]
    Decline,
    /// Drop the oldest buffered value to make space
    DropOldest,
}

/// Bounded FIFO stage backed by a lock-free `ArrayQueue`.
///
/// Consumers pull with [`BufferStage::receive`]. Once completion has been
/// requested, the stage completes as soon as its queue is empty.
#[derive(Debug)]
pub struct BufferStage<T> {
    queue: ArrayQueue<T>,
    policy: OverflowPolicy,
    closed: Mutex<bool>,
    completion: Completion,
    dropped_count: AtomicU64,
    declined_count: AtomicU64,
}

impl<T: Send> BufferStage<T> {
    /// Create a buffer with the given capacity and overflow policy
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            policy,
            closed: Mutex::new(false),
            completion: Completion::new(),
            dropped_count: AtomicU64::new(0),
            declined_count: AtomicU64::new(0),
        }
    }

    /// Pop the oldest buffered value
    pub fn receive(&self) -> Option<T> {
        let item = self.queue.pop();
        if item.is_some() {
            self.settle_if_drained();
        }
        item
    }

    /// Pop everything currently buffered
    pub fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.receive()).collect()
    }

    fn settle_if_drained(&self) {
        let closed = *self.closed.lock();
        if closed && self.queue.is_empty() && self.completion.try_complete() {
            debug!("buffer stage drained and completed");
        }
    }

    fn store(&self, item: T) -> OfferStatus {
        match self.queue.push(item) {
            Ok(()) => OfferStatus::Accepted,
            Err(item) => match self.policy {
                OverflowPolicy::Decline => {
                    self.declined_count.fetch_add(1, Ordering::Relaxed);
                    OfferStatus::Declined
                }
                OverflowPolicy::DropOldest => {
                    self.dropped_count.fetch_add(1, Ordering::Relaxed);
                    let _evicted = self.queue.force_push(item);
                    OfferStatus::Accepted
                }
            },
        }
    }

    /// Values currently buffered
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of buffered values
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Fill level as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity()).min(100) as u32
    }

    /// Values evicted by [`OverflowPolicy::DropOldest`]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Offers refused because the buffer was full
    pub fn declined_count(&self) -> u64 {
        self.declined_count.load(Ordering::Relaxed)
    }
}

impl<T: Send> Block for BufferStage<T> {
    fn complete(&self) {
        *self.closed.lock() = true;
        self.settle_if_drained();
    }

    fn fault(&self, fault: Fault) {
        *self.closed.lock() = true;
        self.completion.try_fault(fault);
    }

    fn completion(&self) -> Completion {
        self.completion.clone()
    }
}

impl<T: Send> Target<T> for BufferStage<T> {
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
        if *self.closed.lock() {
            return Ok(OfferStatus::DecliningPermanently);
        }
        // Checked before consuming so a full buffer never takes a value it
        // would have to throw away.
        if self.policy == OverflowPolicy::Decline && self.queue.is_full() {
            self.declined_count.fetch_add(1, Ordering::Relaxed);
            return Ok(OfferStatus::Declined);
        }

        let value = if consume_to_accept {
            let source = source.ok_or(PipelineError::MissingSource)?;
            match source.consume(handle, self)? {
                Some(value) => value,
                None => return Ok(OfferStatus::NotAvailable),
            }
        } else {
            value
        };

        // Held across the push so completion cannot slip in between the
        // check and the store.
        let closed = self.closed.lock();
        if *closed {
            return Ok(OfferStatus::DecliningPermanently);
        }
        let status = self.store(value);
        drop(closed);
        Ok(status)
    }
}
