//! Inference engine, artifact handling and lifecycle management.

pub mod artifacts;
pub mod lifecycle;
pub mod waste_engine;

pub use artifacts::{promote_candidate, ArtifactHeader, ArtifactSet};
pub use lifecycle::{EngineLoader, EngineStatus, ModelManager};
pub use waste_engine::{Prediction, WasteEngine};
