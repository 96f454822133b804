//! Error types for engine construction, reconfiguration, and backend I/O.

use thiserror::Error;

/// Errors produced by engine lifecycle and backend operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Allocation or setup failure during [`crate::core::engine::Engine::create`].
    #[error("engine setup failed: {0}")]
    Setup(String),

    /// A `change()` call left the engine without a usable backend; the
    /// caller must drop the engine.
    #[error("backend swap failed: {0}")]
    BackendSwap(String),

    /// The signal table could not be built (e.g. duplicate signal numbers).
    #[error("signal table invalid: {0}")]
    InvalidSignals(String),
}

/// Application-facing result using `anyhow` for higher-level call sites
/// that do not need to match on a specific [`EngineError`] variant.
pub type AppResult<T> = Result<T, anyhow::Error>;
