//! Fluent construction of an [`Engine`] from an [`EngineConfig`], a
//! concrete [`Backend`], and the signal handlers the caller wants wired
//! to the signals named in that config. Mirrors the teacher's builder
//! pattern: collect fields, validate once, fail closed on `build()`.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::backend::Backend;
use crate::core::engine::{Engine, EngineFlags};
use crate::core::error::{AppResult, EngineError};
use crate::core::signal::SignalSet;
use crate::core::task::Task;

/// Builds an [`Engine<R>`] from configuration plus runtime collaborators
/// that cannot themselves be expressed as data: the backend and any
/// signal handlers.
pub struct EngineBuilder<R> {
    task: Task,
    backend: Option<Box<dyn Backend>>,
    config: EngineConfig,
    handlers: Vec<(i32, Arc<dyn Fn(i32) + Send + Sync>)>,
    _payload: PhantomData<fn() -> R>,
}

impl<R> EngineBuilder<R> {
    /// Start a builder for the engine running under `task`.
    #[must_use]
    pub fn new(task: Task) -> Self {
        Self {
            task,
            backend: None,
            config: EngineConfig::default(),
            handlers: Vec::new(),
            _payload: PhantomData,
        }
    }

    /// Apply a parsed or hand-built [`EngineConfig`].
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply the readiness backend to construct the engine around.
    /// Required; [`EngineBuilder::build`] fails if this is never called.
    #[must_use]
    pub fn with_backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Register the handler to run when `signo` is dispatched. Must be
    /// called once for every signal named in the config's `signals` list;
    /// `build()` fails otherwise.
    #[must_use]
    pub fn with_signal_handler(
        mut self,
        signo: i32,
        handler: Arc<dyn Fn(i32) + Send + Sync>,
    ) -> Self {
        self.handlers.push((signo, handler));
        self
    }

    /// Validate the config, assemble the signal table, and construct the
    /// engine. Consumes the builder either way. Returns [`AppResult`]
    /// rather than a bare `Result<_, EngineError>` since this is the
    /// crate's outermost, application-facing entry point — callers here
    /// are expected to propagate failures with `?` and a context message,
    /// not match on a specific `EngineError` variant.
    pub fn build(self) -> AppResult<Engine<R>> {
        self.config.validate()?;

        let backend = self
            .backend
            .ok_or_else(|| EngineError::Setup("no backend supplied to EngineBuilder".to_string()))?;

        let signals = if self.config.signals.is_empty() {
            None
        } else {
            let mut set = SignalSet::new();
            for entry in &self.config.signals {
                let handler = self
                    .handlers
                    .iter()
                    .find(|(signo, _)| *signo == entry.signo)
                    .map(|(_, handler)| handler.clone())
                    .ok_or_else(|| {
                        EngineError::InvalidSignals(format!(
                            "no handler registered for signal {}",
                            entry.signo
                        ))
                    })?;
                // Signal names are configured once at process start, not
                // per-request, so leaking them to get `&'static str` is a
                // bounded, one-time cost rather than a growing leak.
                let name: &'static str = Box::leak(entry.name.clone().into_boxed_str());
                set.register(entry.signo, name, handler);
            }
            Some(set)
        };

        let flags = EngineFlags { fibers: self.config.fibers };

        let mut engine = Engine::create(self.task, backend, signals, flags, self.config.batch)?;
        if let Some(max_connections) = self.config.max_connections {
            engine.set_max_connections(max_connections);
        }
        Ok(engine)
    }
}
