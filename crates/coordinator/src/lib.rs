#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Conflux Coordinator
//!
//! [`ExecutionCoordinator`] wraps the shared KV handle with typed
//! operations for one execution: the inflight counter, fan-in arming,
//! the completed-node set, loop iteration context, the state and
//! topology blobs, and event publishing. All coordination keys share
//! one prefix and die together in [`ExecutionCoordinator::cleanup`].
//!
//! The engine never touches raw KV keys; everything routes through
//! this facade, which also makes the in-memory fake the only test
//! double the engine suite needs.

pub mod coordinator;
pub mod event;
pub mod loop_ctx;

pub use coordinator::ExecutionCoordinator;
pub use event::ExecutionEvent;
pub use loop_ctx::LoopContext;
