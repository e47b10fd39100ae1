//! Integration tests for artifact loading and the model lifecycle
//!
//! Builds a real artifact set on disk: a randomly initialized backbone saved
//! as safetensors plus scaler and forest artifacts whose headers carry the
//! network digest.

mod common;

use candle_core::Device;
use candle_nn::VarMap;
use common::{fixture_engine, png_bytes};
use mediwaste::engine::artifacts::{
    file_digest, write_json, ArtifactHeader, ArtifactSet, ClassifierArtifact, ScalerArtifact,
};
use mediwaste::engine::promote_candidate;
use mediwaste::ml::classifier::{ClassifierStrategy, RandomForestParams};
use mediwaste::ml::{ConvBackbone, StandardScaler};
use mediwaste::{Category, EngineConfig, EngineStatus, ErrorKind, FeatureContract, ModelManager, WasteEngine};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

struct Fixture {
    scaler: ScalerArtifact,
    classifier: ClassifierArtifact,
}

/// Write a complete, consistent artifact set into `set`.
fn write_artifacts(set: &ArtifactSet) -> Fixture {
    let contract = FeatureContract::current();
    let varmap = VarMap::new();
    ConvBackbone::init(&varmap, &contract, &Device::Cpu).unwrap();
    fs::create_dir_all(set.network().parent().unwrap()).unwrap();
    varmap.save(set.network()).unwrap();
    let digest = file_digest(set.network()).unwrap();

    let dim = contract.fused_dim();
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let rows = 24;
    let features = Array2::from_shape_fn((rows, dim), |_| rng.gen_range(-1.0f32..1.0));
    let labels: Vec<usize> = (0..rows).map(|i| i % 12).collect();
    let (scaler, scaled) = StandardScaler::fit_transform(features.view()).unwrap();
    let strategy = ClassifierStrategy::RandomForest(RandomForestParams {
        n_estimators: 3,
        max_bins: 16,
        ..RandomForestParams::default()
    });
    let classifier = strategy.fit(scaled.view(), &labels, &vec![1.0; rows], 12).unwrap();

    let header = ArtifactHeader::new(contract, dim, digest, Uuid::new_v4());
    let fixture = Fixture {
        scaler: ScalerArtifact {
            header: header.clone(),
            scaler,
        },
        classifier: ClassifierArtifact {
            header,
            classes: Category::ALL.iter().map(|c| c.label().to_string()).collect(),
            classifier,
        },
    };
    write_json(set.scaler(), &fixture.scaler).unwrap();
    write_json(set.classifier(), &fixture.classifier).unwrap();
    fixture
}

fn engine_config(dir: &Path) -> EngineConfig {
    EngineConfig::new().with_model_dir(dir)
}

#[test]
fn test_consistent_artifacts_load_and_predict() {
    let dir = tempfile::tempdir().unwrap();
    let set = ArtifactSet::production(dir.path());
    write_artifacts(&set);

    let engine = WasteEngine::load(&engine_config(dir.path())).unwrap();
    assert_eq!(engine.fused_dim(), 7364);
    assert_eq!(engine.network_sha256(), Some(file_digest(set.network()).unwrap().as_str()));

    let prediction = engine.predict(&png_bytes([128, 128, 128], 224, 224)).unwrap();
    assert!(Category::from_label(&prediction.label).is_some());
    assert!((0.0..=100.0).contains(&prediction.confidence));
}

#[test]
fn test_missing_artifact_fails_then_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let set = ArtifactSet::production(dir.path());
    let fixture = write_artifacts(&set);
    fs::remove_file(set.scaler()).unwrap();

    let manager = ModelManager::new(engine_config(dir.path()));
    assert_eq!(manager.status(), EngineStatus::Uninitialized);

    let err = manager.load().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArtifactLoad);
    match manager.status() {
        EngineStatus::Failed(reason) => assert!(reason.contains("feature_scaler.json"), "{}", reason),
        other => panic!("expected Failed, got {:?}", other),
    }

    let bytes = png_bytes([60, 140, 40], 224, 224);
    assert_eq!(manager.predict(&bytes).unwrap_err().kind(), ErrorKind::NotReady);

    write_json(set.scaler(), &fixture.scaler).unwrap();
    let prediction = manager.predict(&bytes).unwrap();
    assert!(manager.is_ready());
    assert_eq!(prediction.fused_vector_dimension, 7364);
}

#[test]
fn test_every_missing_file_is_named() {
    let dir = tempfile::tempdir().unwrap();
    let set = ArtifactSet::production(dir.path());
    write_artifacts(&set);
    fs::remove_file(set.network()).unwrap();
    fs::remove_file(set.classifier()).unwrap();

    let message = WasteEngine::load(&engine_config(dir.path())).unwrap_err().to_string();
    assert!(message.contains("embedding_network.safetensors"));
    assert!(message.contains("decision_classifier.json"));
    assert!(!message.contains("feature_scaler.json"));
}

#[test]
fn test_contract_mismatch_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let set = ArtifactSet::production(dir.path());
    let mut fixture = write_artifacts(&set);
    fixture.classifier.header.contract.hog.orientations = 12;
    write_json(set.classifier(), &fixture.classifier).unwrap();

    let err = WasteEngine::load(&engine_config(dir.path())).unwrap_err();
    assert!(matches!(err, mediwaste::Error::ContractMismatch { .. }), "{}", err);
    assert!(err.to_string().contains("decision_classifier.json"));
}

#[test]
fn test_network_digest_mismatch_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let set = ArtifactSet::production(dir.path());
    write_artifacts(&set);

    // A different network with the same layout.
    let varmap = VarMap::new();
    ConvBackbone::init(&varmap, &FeatureContract::current(), &Device::Cpu).unwrap();
    varmap.save(set.network()).unwrap();

    let err = WasteEngine::load(&engine_config(dir.path())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArtifactLoad);
    assert!(err.to_string().contains("digest"), "{}", err);
}

#[test]
fn test_promoted_candidates_become_loadable() {
    let dir = tempfile::tempdir().unwrap();
    let candidate = ArtifactSet::candidate(dir.path(), "_v2");
    let production = ArtifactSet::production(dir.path());
    write_artifacts(&candidate);

    assert!(WasteEngine::load(&engine_config(dir.path())).is_err());
    promote_candidate(&candidate, &production).unwrap();
    assert!(candidate.missing().len() == 3);
    WasteEngine::load(&engine_config(dir.path())).unwrap();
}

#[test]
fn test_corrupt_tree_fails_load_and_stays_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let set = ArtifactSet::production(dir.path());
    let fixture = write_artifacts(&set);

    // Still valid JSON with the right header, but the first tree points past its nodes.
    let mut json = serde_json::to_value(&fixture.classifier).unwrap();
    json["classifier"]["trees"][0]["nodes"] = serde_json::json!([
        {"split": {"feature": 0, "threshold": 0.0, "bin": 0, "left": 7, "right": 8}}
    ]);
    fs::write(set.classifier(), serde_json::to_vec(&json).unwrap()).unwrap();

    let manager = ModelManager::new(engine_config(dir.path()));
    let err = manager.load().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArtifactLoad);
    match manager.status() {
        EngineStatus::Failed(reason) => {
            assert!(reason.contains("decision_classifier.json"), "{}", reason);
            assert!(reason.contains("child 7"), "{}", reason);
        },
        other => panic!("expected Failed, got {:?}", other),
    }
    let bytes = png_bytes([128, 128, 128], 224, 224);
    assert_eq!(manager.predict(&bytes).unwrap_err().kind(), ErrorKind::NotReady);
    assert!(!manager.is_ready());
}

#[test]
fn test_concurrent_first_requests_share_one_load() {
    const THREADS: usize = 8;
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let prepared = Mutex::new(Some(fixture_engine()));
    let manager = ModelManager::with_loader(move || -> mediwaste::Result<WasteEngine> {
        counter.fetch_add(1, Ordering::SeqCst);
        // Hold the load open so the other threads arrive while it runs.
        thread::sleep(Duration::from_millis(50));
        prepared
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| mediwaste::Error::NotReady("engine built twice".to_string()))
    });

    let barrier = Barrier::new(THREADS);
    let engines: Vec<Arc<WasteEngine>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    manager.engine().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
    assert_eq!(manager.status(), EngineStatus::Ready);
}
