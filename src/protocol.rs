//! The push/pull negotiation contract shared by every pipeline stage.
//!
//! A stage is a [`Target`] if it accepts input, a [`Source`] if it produces
//! output, and both if it propagates. Stages are peers implementing these
//! capabilities; none is a subtype of another.

use crate::completion::Completion;
use crate::error::{Fault, Result};
use crate::handle::MessageHandle;
use crate::link::{Link, LinkOptions};
use std::sync::Arc;

/// Outcome of offering a value to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStatus {
    /// The target took ownership of the value
    Accepted,
    /// The target cannot take the value right now; it may later
    Declined,
    /// Confirmed consumption failed: the source had nothing to hand over
    NotAvailable,
    /// The target will never accept anything again; stop offering
    DecliningPermanently,
}

impl OfferStatus {
    /// Whether the target took the value
    pub fn is_accepted(&self) -> bool {
        matches!(self, OfferStatus::Accepted)
    }
}

/// Lifecycle surface common to every stage
pub trait Block: Send + Sync {
    /// No more input will arrive; finish buffered work, then complete
    fn complete(&self);

    /// Abort immediately with `fault`
    fn fault(&self, fault: Fault);

    /// Signal settled once the stage has completed or faulted
    fn completion(&self) -> Completion;
}

/// A stage that accepts input
pub trait Target<T>: Block {
    /// Offer `value` under `handle`.
    ///
    /// With `consume_to_accept`, the target must call back into `source`
    /// via [`Source::consume`] and use the value it returns instead of
    /// `value`.
    fn offer(
        &self,
        handle: MessageHandle,
        value: T,
        source: Option<&dyn Source<T>>,
        consume_to_accept: bool,
    ) -> Result<OfferStatus>;

    /// Offer `value` directly with the single-message handle. Returns
    /// whether it was accepted.
    fn post(&self, value: T) -> bool {
        matches!(
            self.offer(MessageHandle::SINGLE, value, None, false),
            Ok(OfferStatus::Accepted)
        )
    }
}

/// A stage that produces output
pub trait Source<T>: Block {
    /// Subscribe `target` with explicit options. Dropping the returned
    /// [`Link`] unsubscribes it.
    fn link_with(&self, target: Arc<dyn Target<T>>, options: LinkOptions) -> Link;

    /// Subscribe `target` with default options
    fn link(&self, target: Arc<dyn Target<T>>) -> Link {
        self.link_with(target, LinkOptions::default())
    }

    /// Hand over the value offered under `handle` to a target that asked
    /// for confirmed consumption. `None` means nothing was consumed.
    fn consume(&self, handle: MessageHandle, target: &dyn Target<T>) -> Result<Option<T>>;

    /// Provisionally claim the value offered under `handle` for `target`
    fn reserve(&self, handle: MessageHandle, target: &dyn Target<T>) -> Result<bool>;

    /// Give back a reservation taken with [`Source::reserve`]
    fn release(&self, handle: MessageHandle, target: &dyn Target<T>) -> Result<()>;
}
