//! Configuration models for the engine and its backend.

pub mod engine;

pub use engine::{EngineConfig, SignalConfig};
