//! Retrain the waste classifier
//!
//! Fine-tunes the embedding network on a folder-per-category dataset,
//! refits the scaler and classifier, and writes candidate artifacts with a
//! suffix next to the production ones. Promote them with `promote_artifacts`.
//!
//! Usage:
//!   cargo run --release --bin retrain -- --dataset data/waste --output-dir models
//!   cargo run --release --bin retrain -- --config training.json
//!   cargo run --release --bin retrain -- --dataset data/waste --epochs 5 --classifier random_forest

use mediwaste::ml::classifier::{GradientBoostingParams, RandomForestParams};
use mediwaste::ml::ClassifierStrategy;
use mediwaste::training::TrainingPipeline;
use mediwaste::TrainingConfig;
use std::path::PathBuf;
use std::time::Instant;

struct RetrainArgs {
    config_file: Option<PathBuf>,
    dataset: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    epochs: Option<usize>,
    classifier: Option<String>,
}

impl RetrainArgs {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let mut parsed = Self {
            config_file: None,
            dataset: None,
            output_dir: None,
            epochs: None,
            classifier: None,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--config" => {
                    parsed.config_file = value.map(PathBuf::from);
                    i += 1;
                },
                "--dataset" => {
                    parsed.dataset = value.map(PathBuf::from);
                    i += 1;
                },
                "--output-dir" => {
                    parsed.output_dir = value.map(PathBuf::from);
                    i += 1;
                },
                "--epochs" => {
                    let raw = value.ok_or("--epochs needs a value")?;
                    parsed.epochs = Some(raw.parse().map_err(|_| format!("invalid epoch count: {}", raw))?);
                    i += 1;
                },
                "--classifier" => {
                    parsed.classifier = value;
                    i += 1;
                },
                "--help" | "-h" => {
                    return Err(String::new());
                },
                other => return Err(format!("unknown argument: {}", other)),
            }
            i += 1;
        }
        Ok(parsed)
    }

    fn into_config(self) -> Result<TrainingConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config_file {
            Some(path) => TrainingConfig::from_json_file(path)?,
            None => TrainingConfig::new("dataset", "models"),
        };
        if let Some(dataset) = self.dataset {
            config.dataset_dir = dataset;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(epochs) = self.epochs {
            config = config.with_epochs(epochs);
        }
        if let Some(name) = self.classifier {
            let strategy = match name.as_str() {
                "gradient_boosting" | "xgboost" => {
                    ClassifierStrategy::GradientBoosting(GradientBoostingParams::default())
                },
                "random_forest" | "rf" => ClassifierStrategy::RandomForest(RandomForestParams::default()),
                other => return Err(format!("unknown classifier: {}", other).into()),
            };
            config = config.with_classifier(strategy);
        }
        config.validate()?;
        Ok(config)
    }
}

fn print_usage() {
    eprintln!("Usage: retrain [--config FILE] [--dataset DIR] [--output-dir DIR] [--epochs N]");
    eprintln!("               [--classifier gradient_boosting|random_forest]");
}

fn main() {
    env_logger::init();

    let args = match RetrainArgs::from_args() {
        Ok(args) => args,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("Error: {}", msg);
            }
            print_usage();
            std::process::exit(2);
        },
    };
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        },
    };

    println!("Dataset:    {}", config.dataset_dir.display());
    println!("Output:     {}", config.output_dir.display());
    println!("Classifier: {}", config.classifier.name());
    println!();

    let start = Instant::now();
    let report = match TrainingPipeline::new(config).run() {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Training failed: {}", e);
            std::process::exit(1);
        },
    };

    println!("{}", report.classification_report);
    println!("Confusion matrix:");
    println!("{}", report.confusion_matrix);
    println!(
        "Fine-tuning: {} epochs, best epoch {} (val accuracy {:.3})",
        report.fine_tune.epochs_run, report.fine_tune.best_epoch, report.fine_tune.best_val_accuracy
    );
    println!("Classifier:  {}", report.classifier);
    println!("Candidates:");
    println!("  {}", report.artifacts.network.display());
    println!("  {}", report.artifacts.scaler.display());
    println!("  {}", report.artifacts.classifier.display());
    println!("Report:      {}", report.artifacts.report.display());
    println!("Finished in {:.1}s", start.elapsed().as_secs_f64());
}
