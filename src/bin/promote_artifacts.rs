//! Promote candidate artifacts to production
//!
//! Moves `<stem><suffix>.<ext>` files written by `retrain` onto the
//! production names; previous production files are kept as `.bak`.
//! A running service picks the new set up on its next start.
//!
//! Usage:
//!   cargo run --bin promote_artifacts -- --model-dir models
//!   cargo run --bin promote_artifacts -- --model-dir models --suffix _rc1

use mediwaste::engine::artifacts::DEFAULT_CANDIDATE_SUFFIX;
use mediwaste::engine::{promote_candidate, ArtifactSet};
use std::path::PathBuf;

struct PromoteArgs {
    model_dir: PathBuf,
    suffix: String,
}

impl PromoteArgs {
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut model_dir = PathBuf::from("models");
        let mut suffix = DEFAULT_CANDIDATE_SUFFIX.to_string();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--model-dir" => {
                    i += 1;
                    if i < args.len() {
                        model_dir = PathBuf::from(&args[i]);
                    }
                },
                "--suffix" => {
                    i += 1;
                    if i < args.len() {
                        suffix = args[i].clone();
                    }
                },
                other => eprintln!("Ignoring unknown argument: {}", other),
            }
            i += 1;
        }

        Self { model_dir, suffix }
    }
}

fn main() {
    env_logger::init();

    let args = PromoteArgs::from_args();
    if args.suffix.is_empty() {
        eprintln!("Error: --suffix must not be empty");
        std::process::exit(2);
    }

    let candidate = ArtifactSet::candidate(&args.model_dir, &args.suffix);
    let production = ArtifactSet::production(&args.model_dir);
    match promote_candidate(&candidate, &production) {
        Ok(()) => {
            for path in production.paths() {
                println!("Promoted {}", path.display());
            }
        },
        Err(e) => {
            eprintln!("Promotion failed: {}", e);
            std::process::exit(1);
        },
    }
}
