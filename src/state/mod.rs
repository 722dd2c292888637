//! State module for tracking frontier progress
//!
//! # Components
//!
//! - `FrontierState`: the state machine of a frontier entry (discovered, probing, target, ...)
//! - `DomainState`: per-domain politeness state (single-flight token, minimum delay, cool-down)

mod domain_state;
mod frontier_state;

// Re-export main types
pub use domain_state::DomainState;
pub use frontier_state::FrontierState;
