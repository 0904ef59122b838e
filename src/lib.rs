//! A priority-ordered propagator block for push/pull negotiated pipelines.
//!
//! Stages in a pipeline talk through one small contract: a source offers a
//! value to a target, the target accepts, declines, or declines for good,
//! and completion or faults flow downstream along links. [`PriorityBlock`]
//! implements both sides of that contract, buffering `(priority, value)`
//! pairs and handing values on highest priority first.
//!
//! # Features
//!
//! - Priority ordering with FIFO tie-breaking within a priority
//! - Non-blocking offers: backpressure is expressed purely by refusal
//! - Reactive propagation with no dedicated worker thread
//! - Drain-then-complete shutdown and immediate fault propagation
//! - One-shot, multi-waiter completion signal
//! - Per-block metrics: accepted, delivered, stalls, queueing latency
//!
//! # Example
//!
//! ```ignore
//! use priority_pipeline::{ActionStage, Block, PriorityBlock, Source, Target};
//! use std::sync::Arc;
//!
//! let block = PriorityBlock::new();
//! let printer = Arc::new(ActionStage::new("print", |job: &str| {
//!     println!("{}", job);
//!     Ok::<(), String>(())
//! }));
//! block.link(printer.clone()).forget();
//!
//! block.post((1, "Low"));
//! block.post((5, "High"));
//! block.complete();
//! block.completion().wait()?;
//! ```

pub mod block;
pub mod buffer;
pub mod completion;
pub mod error;
pub mod handle;
pub mod link;
pub mod metrics;
pub mod protocol;
pub mod record;
pub mod stage;
pub mod store;

// Re-exports for convenience
pub use block::{CompletionState, PriorityBlock, PriorityBlockBuilder};
pub use buffer::{BufferStage, OverflowPolicy};
pub use completion::Completion;
pub use error::{Fault, PipelineError, Result};
pub use handle::{HandleAllocator, MessageHandle};
pub use link::{Link, LinkOptions};
pub use metrics::{BlockMetrics, MetricsSnapshot};
pub use protocol::{Block, OfferStatus, Source, Target};
pub use record::{PendingRecord, RecordKey};
pub use stage::ActionStage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
