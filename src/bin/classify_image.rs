//! Classify waste images with the production artifacts
//!
//! Prints one JSON object per image with the predicted category, confidence
//! and disposal routing.
//!
//! Usage:
//!   cargo run --release --bin classify_image -- photo.jpg
//!   cargo run --release --bin classify_image -- --model-dir models a.jpg b.png

use mediwaste::{DisposalInfo, EngineConfig, ModelManager, Prediction};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Serialize)]
struct ClassifiedImage<'a> {
    file: String,
    #[serde(flatten)]
    prediction: &'a Prediction,
    disposal: DisposalInfo,
    elapsed_ms: u128,
}

struct ClassifyArgs {
    model_dir: PathBuf,
    images: Vec<PathBuf>,
}

impl ClassifyArgs {
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut model_dir = PathBuf::from("models");
        let mut images = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--model-dir" => {
                    i += 1;
                    if i < args.len() {
                        model_dir = PathBuf::from(&args[i]);
                    }
                },
                path => images.push(PathBuf::from(path)),
            }
            i += 1;
        }

        Self { model_dir, images }
    }
}

fn main() {
    env_logger::init();

    let args = ClassifyArgs::from_args();
    if args.images.is_empty() {
        eprintln!("Usage: classify_image [--model-dir DIR] IMAGE...");
        std::process::exit(2);
    }

    let manager = ModelManager::new(EngineConfig::new().with_model_dir(&args.model_dir));
    if let Err(e) = manager.load() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let mut failures = 0;
    for path in &args.images {
        let start = Instant::now();
        let result = fs::read(path)
            .map_err(mediwaste::Error::from)
            .and_then(|bytes| manager.predict(&bytes));
        match result {
            Ok(prediction) => {
                let line = ClassifiedImage {
                    file: path.display().to_string(),
                    prediction: &prediction,
                    disposal: prediction.disposal(),
                    elapsed_ms: start.elapsed().as_millis(),
                };
                match serde_json::to_string(&line) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("{}: {}", path.display(), e);
                        failures += 1;
                    },
                }
            },
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failures += 1;
            },
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}
