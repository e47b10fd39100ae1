//! Candidate artifact export.

use crate::engine::artifacts::{write_json, ArtifactSet, ClassifierArtifact, ScalerArtifact};
use crate::error::{Error, Result};
use std::path::Path;

/// Writes a training run's outputs to candidate paths that never coincide
/// with production artifacts.
#[derive(Debug, Clone)]
pub struct CandidateExporter {
    candidate: ArtifactSet,
    production: ArtifactSet,
}

impl CandidateExporter {
    /// Create an exporter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] if a candidate path is a production path
    /// or reuses a production file name.
    pub fn new(candidate: ArtifactSet, production: ArtifactSet) -> Result<Self> {
        let exporter = Self { candidate, production };
        exporter.check()?;
        Ok(exporter)
    }

    /// Where the fine-tuned network goes.
    pub fn network_path(&self) -> &Path {
        self.candidate.network()
    }

    /// Candidate paths.
    pub fn candidate(&self) -> &ArtifactSet {
        &self.candidate
    }

    /// Write the scaler and classifier artifacts.
    pub fn write(&self, scaler: &ScalerArtifact, classifier: &ClassifierArtifact) -> Result<()> {
        self.check()?;
        write_json(self.candidate.scaler(), scaler)?;
        write_json(self.candidate.classifier(), classifier)?;
        for path in self.candidate.paths() {
            log::info!("Candidate artifact: {}", path.display());
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.candidate.overlaps(&self.production) {
            return Err(Error::Training(
                "refusing to write candidate artifacts onto production paths".to_string(),
            ));
        }
        let production_names: Vec<_> = self.production.paths().iter().filter_map(|p| p.file_name()).collect();
        if let Some(path) = self
            .candidate
            .paths()
            .into_iter()
            .find(|p| p.file_name().map_or(false, |n| production_names.contains(&n)))
        {
            return Err(Error::Training(format!(
                "candidate {} uses a production file name",
                path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed_candidates_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CandidateExporter::new(
            ArtifactSet::candidate(dir.path(), "_v2"),
            ArtifactSet::production(dir.path()),
        )
        .unwrap();
        assert!(exporter
            .network_path()
            .ends_with("embedding_network_v2.safetensors"));
    }

    #[test]
    fn test_production_paths_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = CandidateExporter::new(ArtifactSet::production(dir.path()), ArtifactSet::production(dir.path()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Training);
    }

    #[test]
    fn test_production_names_elsewhere_are_refused() {
        let prod = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        assert!(
            CandidateExporter::new(ArtifactSet::production(other.path()), ArtifactSet::production(prod.path()))
                .is_err()
        );
    }
}
