//! Question cycle pipeline.
//!
//! A [`Session`] owns the store connection; an [`Orchestrator`] drives each
//! question through the [`CycleState`] machine on top of it.

pub mod orchestrator;
pub mod session;
pub mod state;

pub use orchestrator::{Answer, Orchestrator, Reply, Route, Warning};
pub use session::Session;
pub use state::CycleState;
