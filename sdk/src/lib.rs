//! Appforge SDK
//!
//! Shared types and the error taxonomy used by the engine and the HTTP
//! front end.

/// Error types and handling
pub mod errors;

/// Domain identifiers and enumerations
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, EngineErrorExt};
pub use types::{AppId, Strategy, TurnRole, UserId};
