use crate::protocol::Target;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Per-link behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Forward completion and faults to the target
    pub propagate_completion: bool,
    /// Detach after the target has accepted this many records
    pub max_messages: Option<NonZeroUsize>,
}

impl LinkOptions {
    /// Options with completion propagation and no message limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward completion and faults to the target
    pub fn propagate_completion(mut self, enable: bool) -> Self {
        self.propagate_completion = enable;
        self
    }

    /// Detach after the target accepts `limit` records
    pub fn max_messages(mut self, limit: NonZeroUsize) -> Self {
        self.max_messages = Some(limit);
        self
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            propagate_completion: true,
            max_messages: None,
        }
    }
}

/// Registry-local identifier of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

struct LinkEntry<T> {
    id: LinkId,
    target: Arc<dyn Target<T>>,
    options: LinkOptions,
    remaining: Option<usize>,
}

/// Downstream targets currently subscribed to a source, in attach order
pub struct LinkRegistry<T> {
    entries: Vec<LinkEntry<T>>,
    next_id: u64,
}

impl<T> LinkRegistry<T> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Add a target after the existing ones
    pub fn attach(&mut self, target: Arc<dyn Target<T>>, options: LinkOptions) -> LinkId {
        let id = LinkId(self.next_id);
        self.next_id += 1;
        self.entries.push(LinkEntry {
            id,
            target,
            remaining: options.max_messages.map(NonZeroUsize::get),
            options,
        });
        id
    }

    /// Remove a link. Returns false if it was already gone.
    pub fn detach(&mut self, id: LinkId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Targets to offer records to, in attach order
    pub fn snapshot(&self) -> Vec<(LinkId, Arc<dyn Target<T>>)> {
        self.entries
            .iter()
            .map(|entry| (entry.id, Arc::clone(&entry.target)))
            .collect()
    }

    /// Targets that want completion and faults forwarded
    pub fn completion_targets(&self) -> Vec<Arc<dyn Target<T>>> {
        self.entries
            .iter()
            .filter(|entry| entry.options.propagate_completion)
            .map(|entry| Arc::clone(&entry.target))
            .collect()
    }

    /// Count one accepted record against the link's budget. Returns true if
    /// the link was exhausted and detached.
    pub fn record_delivery(&mut self, id: LinkId) -> bool {
        let exhausted = match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(LinkEntry {
                remaining: Some(remaining),
                ..
            }) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            _ => false,
        };
        if exhausted {
            self.detach(id);
        }
        exhausted
    }

    /// Number of live links
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no targets are linked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for LinkRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription returned by [`Source::link`](crate::Source::link).
///
/// Dropping it detaches the target. Call [`Link::forget`] to keep the
/// target linked for the lifetime of the source.
#[must_use = "dropping a Link unlinks its target"]
pub struct Link {
    unlink: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Link {
    /// Wrap the action that detaches the target
    pub fn new(unlink: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unlink: Some(Box::new(unlink)),
        }
    }

    /// Detach now
    pub fn unlink(mut self) {
        if let Some(unlink) = self.unlink.take() {
            unlink();
        }
    }

    /// Keep the target linked permanently
    pub fn forget(mut self) {
        self.unlink = None;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(unlink) = self.unlink.take() {
            unlink();
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("active", &self.unlink.is_some())
            .finish()
    }
}
