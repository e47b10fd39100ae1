//! Engine lifecycle: lazy single-flight loading and readiness reporting.
//!
//! ```text
//! Uninitialized --load ok--> Ready
//! Uninitialized --load err-> Failed(reason) --retry ok--> Ready
//!                                           --retry err-> Failed(reason)
//! ```
//!
//! `Ready` is terminal: the engine is never swapped while the manager lives.

use crate::config::EngineConfig;
use crate::engine::waste_engine::{Prediction, WasteEngine};
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Produces an engine on demand.
pub trait EngineLoader: Send + Sync {
    /// Build a fully validated engine.
    fn load_engine(&self) -> Result<WasteEngine>;
}

impl EngineLoader for EngineConfig {
    fn load_engine(&self) -> Result<WasteEngine> {
        WasteEngine::load(self)
    }
}

impl<F> EngineLoader for F
where
    F: Fn() -> Result<WasteEngine> + Send + Sync,
{
    fn load_engine(&self) -> Result<WasteEngine> {
        self()
    }
}

/// Externally visible state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EngineStatus {
    /// No load attempted yet
    Uninitialized,
    /// Engine loaded and serving
    Ready,
    /// Last load failed
    Failed(String),
}

enum State {
    Uninitialized,
    Ready(Arc<WasteEngine>),
    Failed(String),
}

/// Owns the engine and its load state.
///
/// # Example
///
/// ```ignore
/// use mediwaste::{EngineConfig, ModelManager};
///
/// let manager = ModelManager::new(EngineConfig::new().with_model_dir("models"));
/// if let Err(e) = manager.load() {
///     log::warn!("Starting without a model: {}", e);
/// }
/// let prediction = manager.predict(&bytes)?;
/// ```
pub struct ModelManager {
    loader: Box<dyn EngineLoader>,
    state: RwLock<State>,
    load_gate: Mutex<()>,
}

impl ModelManager {
    /// Manager that loads the artifacts named by `config`.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_loader(config)
    }

    /// Manager over a custom loader.
    pub fn with_loader(loader: impl EngineLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            state: RwLock::new(State::Uninitialized),
            load_gate: Mutex::new(()),
        }
    }

    /// Load the engine unless it is already ready.
    ///
    /// Concurrent callers wait on one load; only one engine is ever built.
    pub fn load(&self) -> Result<Arc<WasteEngine>> {
        if let State::Ready(engine) = &*self.read_state() {
            return Ok(Arc::clone(engine));
        }

        let _gate = self.load_gate.lock().unwrap_or_else(|e| e.into_inner());
        // Another caller may have finished while we waited.
        if let State::Ready(engine) = &*self.read_state() {
            return Ok(Arc::clone(engine));
        }

        match self.loader.load_engine() {
            Ok(engine) => {
                let engine = Arc::new(engine);
                *self.write_state() = State::Ready(Arc::clone(&engine));
                log::info!("Model manager ready");
                Ok(engine)
            },
            Err(e) => {
                log::error!("Engine load failed: {}", e);
                *self.write_state() = State::Failed(e.to_string());
                Err(e)
            },
        }
    }

    /// The ready engine, attempting one load if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] carrying the load failure when the engine
    /// cannot be made ready.
    pub fn engine(&self) -> Result<Arc<WasteEngine>> {
        if let State::Ready(engine) = &*self.read_state() {
            return Ok(Arc::clone(engine));
        }
        self.load().map_err(|e| Error::NotReady(e.to_string()))
    }

    /// Classify encoded image bytes.
    pub fn predict(&self, bytes: &[u8]) -> Result<Prediction> {
        self.engine()?.predict(bytes)
    }

    /// Current state.
    pub fn status(&self) -> EngineStatus {
        match &*self.read_state() {
            State::Uninitialized => EngineStatus::Uninitialized,
            State::Ready(_) => EngineStatus::Ready,
            State::Failed(reason) => EngineStatus::Failed(reason.clone()),
        }
    }

    /// True once an engine is loaded.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.read_state(), State::Ready(_))
    }

    // State transitions are single assignments, so a poisoned lock still
    // holds a consistent value.
    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_failed_load_reports_reason_and_not_ready() {
        let manager = ModelManager::with_loader(|| -> Result<WasteEngine> {
            Err(Error::MissingArtifacts(vec!["decision_classifier.json".to_string()]))
        });
        assert_eq!(manager.status(), EngineStatus::Uninitialized);

        assert!(manager.load().is_err());
        match manager.status() {
            EngineStatus::Failed(reason) => assert!(reason.contains("decision_classifier.json")),
            other => panic!("Expected Failed, got {:?}", other),
        }

        let err = manager.predict(b"irrelevant").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotReady);
        assert!(err.to_string().contains("decision_classifier.json"));
    }

    #[test]
    fn test_each_engine_call_attempts_exactly_one_reload() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let manager = ModelManager::with_loader(move || -> Result<WasteEngine> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotReady("no artifacts".to_string()))
        });

        assert!(manager.engine().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(manager.engine().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!manager.is_ready());
    }

    #[test]
    fn test_status_serializes_with_reason() {
        let json = serde_json::to_string(&EngineStatus::Failed("gone".to_string())).unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"gone"}"#);
        let json = serde_json::to_string(&EngineStatus::Ready).unwrap();
        assert_eq!(json, r#"{"state":"ready"}"#);
    }
}
