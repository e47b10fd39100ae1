//! Error types for the classification engine.
//!
//! This module defines all error types that can occur while decoding images,
//! extracting fused features, loading artifacts and training.

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable failure category, surfaced next to the descriptive message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The engine has not reached the ready state
    NotReady,
    /// An artifact is missing, corrupt or inconsistent with the others
    ArtifactLoad,
    /// Image bytes could not be decoded
    Decode,
    /// Fused vector length differs from the fitted dimensionality
    DimensionMismatch,
    /// Dataset directory problems (training only)
    Dataset,
    /// Numeric runtime or fitting failure
    Training,
    /// Filesystem error
    Io,
    /// Artifact (de)serialization failure
    Serialization,
}

/// Error types that can occur during classification and training.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Prediction requested while the engine is not ready
    #[error("Engine not ready: {0}")]
    NotReady(String),

    /// One or more artifact files are absent
    #[error("Missing artifact files: {}", .0.join(", "))]
    MissingArtifacts(Vec<String>),

    /// Artifact exists but could not be loaded or validated
    #[error("Failed to load artifact {path}: {reason}")]
    ArtifactLoad {
        /// Artifact path
        path: String,
        /// Reason for the failure
        reason: String,
    },

    /// Artifact was produced under a different feature contract
    #[error("Feature contract mismatch in {artifact}: {reason}")]
    ContractMismatch {
        /// Artifact name
        artifact: String,
        /// What differs
        reason: String,
    },

    /// Undecodable image bytes
    #[error("Image decode error: {0}")]
    Decode(String),

    /// Vector length does not match the fitted dimensionality
    #[error("Feature dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Fitted dimensionality
        expected: usize,
        /// Length of the offending vector
        found: usize,
    },

    /// Fatal dataset problem
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Training-stage failure
    #[error("Training error: {0}")]
    Training(String),

    /// ML runtime error (candle / tract)
    #[error("ML error: {0}")]
    Ml(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failure category for callers that need to branch on the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotReady(_) => ErrorKind::NotReady,
            Error::MissingArtifacts(_) | Error::ArtifactLoad { .. } | Error::ContractMismatch { .. } => {
                ErrorKind::ArtifactLoad
            },
            Error::Decode(_) => ErrorKind::Decode,
            Error::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Error::Dataset(_) => ErrorKind::Dataset,
            Error::Training(_) | Error::Ml(_) => ErrorKind::Training,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Serialization,
        }
    }

    pub(crate) fn artifact(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Error::ArtifactLoad {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Error::Ml(e.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifacts_names_every_file() {
        let err = Error::MissingArtifacts(vec![
            "feature_scaler.json".to_string(),
            "decision_classifier.json".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("feature_scaler.json"));
        assert!(msg.contains("decision_classifier.json"));
        assert_eq!(err.kind(), ErrorKind::ArtifactLoad);
    }

    #[test]
    fn test_dimension_mismatch_error() {
        let err = Error::DimensionMismatch {
            expected: 7364,
            found: 7365,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("7364"));
        assert!(msg.contains("7365"));
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }

    #[test]
    fn test_not_ready_is_distinct_from_load_failures() {
        let not_ready = Error::NotReady("decision_classifier.json missing".to_string());
        let load = Error::artifact(std::path::Path::new("x.json"), "corrupt");
        assert_eq!(not_ready.kind(), ErrorKind::NotReady);
        assert_eq!(load.kind(), ErrorKind::ArtifactLoad);
        assert!(load.to_string().contains("x.json"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DimensionMismatch).unwrap();
        assert_eq!(json, "\"dimension_mismatch\"");
    }
}
