//! Declarative configuration for constructing an [`crate::core::Engine`]:
//! batch size, fiber flag, connection cap, and the signal table. Mirrors
//! the teacher's `PoolConfig`/`SchedulerConfig` shape — a plain,
//! serde-(de)serializable struct with a `validate` pass and a
//! `from_json_str` convenience constructor.

use serde::{Deserialize, Serialize};

use crate::core::engine::DEFAULT_BATCH;
use crate::core::error::EngineError;

/// One OS signal this engine should be prepared to dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// The OS signal number (e.g. `1` for `SIGHUP`).
    pub signo: i32,
    /// Stable name used only for diagnostics/tracing.
    pub name: String,
}

/// Top-level engine configuration, independent of which concrete
/// [`crate::core::Backend`] implementation is wired in at construction
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Advisory readiness batch size. `0` means "use the engine default".
    #[serde(default)]
    pub batch: usize,
    /// Create the engine with the opaque fiber-resumption seam enabled.
    #[serde(default)]
    pub fibers: bool,
    /// Connection admission cap. `None` means unbounded (`u32::MAX`).
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// Signals the engine should be prepared to dispatch. Empty means the
    /// engine runs with no signal table configured at all.
    #[serde(default)]
    pub signals: Vec<SignalConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch: DEFAULT_BATCH,
            fibers: false,
            max_connections: None,
            signals: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| EngineError::Setup(format!("invalid engine config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot be built from: duplicate
    /// signal numbers, or a reserved signal number of `0` (which the
    /// wake-up transport's byte stream reserves for "drain the mailbox").
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = std::collections::HashSet::new();
        for signal in &self.signals {
            if signal.signo == 0 {
                return Err(EngineError::InvalidSignals(
                    "signal 0 is reserved for mailbox wake-ups".to_string(),
                ));
            }
            if !seen.insert(signal.signo) {
                return Err(EngineError::InvalidSignals(format!(
                    "signal {} configured more than once",
                    signal.signo
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch, DEFAULT_BATCH);
    }

    #[test]
    fn duplicate_signals_are_rejected() {
        let config = EngineConfig {
            signals: vec![
                SignalConfig { signo: 1, name: "SIGHUP".to_string() },
                SignalConfig { signo: 1, name: "SIGHUP".to_string() },
            ],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn signal_zero_is_rejected() {
        let config = EngineConfig {
            signals: vec![SignalConfig { signo: 0, name: "reserved".to_string() }],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = EngineConfig {
            batch: 64,
            fibers: true,
            max_connections: Some(1024),
            signals: vec![SignalConfig { signo: 15, name: "SIGTERM".to_string() }],
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed = EngineConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.batch, 64);
        assert_eq!(parsed.max_connections, Some(1024));
        assert_eq!(parsed.signals.len(), 1);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
