#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Conflux State
//!
//! The mutable per-execution state blob and the contract for applying
//! component results to it.
//!
//! - [`WorkflowState`] — typed state shared by all nodes of one execution.
//!   Keys that the reference data model marks transient (`_`-prefixed)
//!   are dedicated optional fields here, so protected keys cannot be
//!   clobbered by construction.
//! - [`Message`] — conversation messages with append-only semantics
//! - [`TokenUsage`] — numeric-sum cost accounting
//! - [`NodeResult`] — what a component function returns, including the
//!   legacy raw-map format and the typed `_`-key extraction

pub mod error;
pub mod message;
pub mod result;
pub mod state;
pub mod usage;

pub use error::StateError;
pub use message::{Message, MessageKind};
pub use result::{InterruptSignal, LoopSeed, NodeResult, SubworkflowWait};
pub use state::{LoopScope, WorkflowState};
pub use usage::TokenUsage;
