//! Measurement sequences: the event model, shape inference and execution.
//!
//! A sequence is an [`EventNode`] whose event is a `Sequence`. Before a run,
//! [`engine::prepare`] refreshes and annotates the tree and allocates the
//! [`Measurement`](crate::data_container::Measurement); [`engine::run`] then
//! walks it on the calling thread. [`crate::worker`] wraps both in threads.

pub mod engine;
pub mod event;
pub mod shapes;
pub mod tree;

pub use event::{Event, EventCategory, EventId, EventKind, ScanMode};
pub use tree::{EventNode, EventTree};
