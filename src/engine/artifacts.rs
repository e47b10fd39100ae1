//! Artifact files: names, headers, JSON persistence and promotion.
//!
//! A trained model is three files: the embedding network, the fitted scaler
//! and the fitted classifier. The two JSON artifacts carry an
//! [`ArtifactHeader`] recording the feature contract they were fitted under
//! and the digest of the network that produced their training features, so
//! a partially replaced set is detected at load time.

use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use crate::ml::classifier::TrainedClassifier;
use crate::ml::scaler::StandardScaler;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Version of the JSON artifact layout.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Production embedding network file name.
pub const NETWORK_FILE: &str = "embedding_network.safetensors";
/// Production scaler file name.
pub const SCALER_FILE: &str = "feature_scaler.json";
/// Production classifier file name.
pub const CLASSIFIER_FILE: &str = "decision_classifier.json";
/// Suffix for candidate artifacts written by retraining.
pub const DEFAULT_CANDIDATE_SUFFIX: &str = "_v2";

/// Provenance shared by the scaler and classifier artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Layout version of this file
    pub format_version: u32,
    /// Contract the features were extracted under
    pub contract: FeatureContract,
    /// Fitted input dimensionality
    pub feature_dim: usize,
    /// SHA-256 of the network file used for feature extraction
    pub network_sha256: String,
    /// When the artifact was written
    pub created_at: DateTime<Utc>,
    /// Training run that produced the artifact
    pub training_run: Uuid,
}

impl ArtifactHeader {
    /// Header for a fresh training run output.
    pub fn new(contract: FeatureContract, feature_dim: usize, network_sha256: String, training_run: Uuid) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            contract,
            feature_dim,
            network_sha256,
            created_at: Utc::now(),
            training_run,
        }
    }
}

/// Persisted scaler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    /// Provenance
    pub header: ArtifactHeader,
    /// Fitted scaler
    pub scaler: StandardScaler,
}

/// Persisted classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    /// Provenance
    pub header: ArtifactHeader,
    /// Class labels in output order
    pub classes: Vec<String>,
    /// Fitted classifier
    pub classifier: TrainedClassifier,
}

/// Paths of one complete artifact set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    network: PathBuf,
    scaler: PathBuf,
    classifier: PathBuf,
}

impl ArtifactSet {
    /// Explicit paths.
    pub fn new(network: impl Into<PathBuf>, scaler: impl Into<PathBuf>, classifier: impl Into<PathBuf>) -> Self {
        Self {
            network: network.into(),
            scaler: scaler.into(),
            classifier: classifier.into(),
        }
    }

    /// Production names under `dir`.
    pub fn production(dir: &Path) -> Self {
        Self::new(dir.join(NETWORK_FILE), dir.join(SCALER_FILE), dir.join(CLASSIFIER_FILE))
    }

    /// Candidate names under `dir`: production stems plus `suffix`.
    pub fn candidate(dir: &Path, suffix: &str) -> Self {
        let production = Self::production(dir);
        Self::new(
            with_suffix(&production.network, suffix),
            with_suffix(&production.scaler, suffix),
            with_suffix(&production.classifier, suffix),
        )
    }

    /// Network path.
    pub fn network(&self) -> &Path {
        &self.network
    }

    /// Scaler path.
    pub fn scaler(&self) -> &Path {
        &self.scaler
    }

    /// Classifier path.
    pub fn classifier(&self) -> &Path {
        &self.classifier
    }

    /// All three paths, network first.
    pub fn paths(&self) -> [&Path; 3] {
        [&self.network, &self.scaler, &self.classifier]
    }

    /// File names of absent artifacts.
    pub fn missing(&self) -> Vec<String> {
        self.paths()
            .iter()
            .filter(|p| !p.is_file())
            .map(|p| display_name(p))
            .collect()
    }

    /// True if any path of `self` coincides with a path of `other`.
    pub fn overlaps(&self, other: &ArtifactSet) -> bool {
        self.paths().iter().any(|a| other.paths().iter().any(|b| same_path(a, b)))
    }
}

/// `dir/stem{suffix}.ext`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Hex SHA-256 of a file.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::artifact(path, e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Serialize `value` as JSON, replacing `path` atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON artifact; failures name the file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| Error::artifact(path, e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| Error::artifact(path, format!("invalid artifact JSON: {}", e)))
}

/// Move a candidate set onto the production names.
///
/// Existing production files are kept next to the new ones with a `.bak`
/// extension. Nothing is moved unless every candidate file exists, and if a
/// move fails the files already moved are put back.
pub fn promote_candidate(candidate: &ArtifactSet, production: &ArtifactSet) -> Result<()> {
    let missing = candidate.missing();
    if !missing.is_empty() {
        return Err(Error::MissingArtifacts(missing));
    }
    if candidate.overlaps(production) {
        return Err(Error::Training("candidate and production artifact paths coincide".to_string()));
    }

    let mut done: Vec<Promotion> = Vec::with_capacity(3);
    for (from, to) in candidate.paths().iter().zip(production.paths()) {
        match Promotion::apply(from, to) {
            Ok(step) => done.push(step),
            Err(e) => {
                log::error!("Promotion of {} failed: {}; restoring previous files", from.display(), e);
                for step in done.iter().rev() {
                    step.undo();
                }
                return Err(e);
            },
        }
    }
    Ok(())
}

/// One candidate file moved onto its production name.
struct Promotion {
    from: PathBuf,
    to: PathBuf,
    backup: Option<PathBuf>,
}

impl Promotion {
    fn apply(from: &Path, to: &Path) -> Result<Self> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        let backup = if to.exists() {
            let backup = to.with_extension(match to.extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{}.bak", ext),
                None => "bak".to_string(),
            });
            fs::rename(to, &backup)?;
            log::info!("Backed up {} to {}", to.display(), backup.display());
            Some(backup)
        } else {
            None
        };

        let step = Self {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            backup,
        };
        if let Err(e) = fs::rename(from, to) {
            step.restore_backup();
            return Err(e.into());
        }
        log::info!("Promoted {} -> {}", from.display(), to.display());
        Ok(step)
    }

    fn undo(&self) {
        if let Err(e) = fs::rename(&self.to, &self.from) {
            log::error!("Could not move {} back to {}: {}", self.to.display(), self.from.display(), e);
            return;
        }
        self.restore_backup();
    }

    fn restore_backup(&self) {
        if let Some(backup) = &self.backup {
            if let Err(e) = fs::rename(backup, &self.to) {
                log::error!("Could not restore {} from {}: {}", self.to.display(), backup.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_names_carry_suffix() {
        let set = ArtifactSet::candidate(Path::new("models"), "_v2");
        assert_eq!(set.network(), Path::new("models/embedding_network_v2.safetensors"));
        assert_eq!(set.scaler(), Path::new("models/feature_scaler_v2.json"));
        assert_eq!(set.classifier(), Path::new("models/decision_classifier_v2.json"));
        assert!(!set.overlaps(&ArtifactSet::production(Path::new("models"))));
    }

    #[test]
    fn test_missing_lists_each_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let set = ArtifactSet::production(dir.path());
        fs::write(set.scaler(), b"{}").unwrap();
        assert_eq!(set.missing(), vec![NETWORK_FILE.to_string(), CLASSIFIER_FILE.to_string()]);
    }

    #[test]
    fn test_file_digest_is_sha256_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_read_json_names_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCALER_FILE);
        fs::write(&path, b"{ not json").unwrap();
        let err = read_json::<ScalerArtifact>(&path).unwrap_err();
        assert!(err.to_string().contains(SCALER_FILE));
    }

    #[test]
    fn test_promote_moves_files_and_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let production = ArtifactSet::production(dir.path());
        let candidate = ArtifactSet::candidate(dir.path(), "_v2");
        for p in candidate.paths() {
            fs::write(p, b"new").unwrap();
        }
        fs::write(production.scaler(), b"old").unwrap();

        promote_candidate(&candidate, &production).unwrap();

        for p in production.paths() {
            assert_eq!(fs::read(p).unwrap(), b"new");
        }
        assert!(candidate.missing().len() == 3);
        assert_eq!(fs::read(dir.path().join("feature_scaler.json.bak")).unwrap(), b"old");
    }

    #[test]
    fn test_failed_promotion_restores_both_sets() {
        let dir = tempfile::tempdir().unwrap();
        let production = ArtifactSet::production(dir.path());
        let candidate = ArtifactSet::candidate(dir.path(), "_v2");
        for p in candidate.paths() {
            fs::write(p, b"new").unwrap();
        }
        for p in production.paths() {
            fs::write(p, b"old").unwrap();
        }
        // The classifier backup name is taken by a non-empty directory, so the
        // third move fails after the network and scaler were promoted.
        let blocker = dir.path().join("decision_classifier.json.bak");
        fs::create_dir_all(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        assert!(promote_candidate(&candidate, &production).is_err());

        for p in production.paths() {
            assert_eq!(fs::read(p).unwrap(), b"old", "{}", p.display());
        }
        for p in candidate.paths() {
            assert_eq!(fs::read(p).unwrap(), b"new", "{}", p.display());
        }
        assert!(!dir.path().join("embedding_network.safetensors.bak").exists());
        assert!(!dir.path().join("feature_scaler.json.bak").exists());
    }

    #[test]
    fn test_promote_refuses_incomplete_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let production = ArtifactSet::production(dir.path());
        let candidate = ArtifactSet::candidate(dir.path(), "_v2");
        fs::write(candidate.network(), b"net").unwrap();

        match promote_candidate(&candidate, &production) {
            Err(Error::MissingArtifacts(names)) => {
                assert_eq!(names, vec!["feature_scaler_v2.json", "decision_classifier_v2.json"]);
            },
            other => panic!("Expected MissingArtifacts, got {:?}", other),
        }
        assert!(candidate.network().exists());
    }
}
