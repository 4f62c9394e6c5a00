//! Built-in control-flow components.
//!
//! These are the node behaviors the orchestrator itself depends on for
//! routing and human-in-the-loop flow. Domain components (agents,
//! tools, HTTP calls, …) live outside the core and register their own
//! factories.

pub mod confirm;
pub mod merge;
pub mod switch;
pub mod wait;
