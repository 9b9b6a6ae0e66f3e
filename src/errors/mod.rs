pub mod types;

pub use types::*;

/// Convenience result alias used throughout the engine
pub type EngineResult<T> = Result<T, EngineError>;
