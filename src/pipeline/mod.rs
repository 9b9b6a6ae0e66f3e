//! Pipeline stage chain
//!
//! A run flows through seven fixed-order pipes, each writing a typed
//! result onto the shared passable. The orchestrator composes them,
//! supports partial execution and up-front configuration validation.

pub mod orchestrator;
pub mod passable;
pub mod pipes;

pub use orchestrator::{Orchestrator, PipelineReport, StageTiming, ValidationIssue};
pub use passable::Passable;
pub use pipes::StagePipe;
