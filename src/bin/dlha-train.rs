//! DLHA training driver
//!
//! # Usage
//!
//! ```bash
//! dlha-train --train data/KDDTrain+.txt
//! dlha-train --train data/KDDTrain+.txt --test data/KDDTest+.txt --output model/dlha_bundle.json
//! dlha-train --train data/KDDTrain+.txt --config dlha.json --report report.json
//! ```

use anyhow::Context;
use clap::Parser;
use dlha::dataset::load_nsl_kdd;
use dlha::{DetectorConfig, ModelStore, Trainer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dlha-train")]
#[command(version)]
#[command(about = "Train the DLHA two-layer intrusion classifier", long_about = None)]
struct Cli {
    /// NSL-KDD training file
    #[arg(long)]
    train: PathBuf,

    /// NSL-KDD test file to evaluate on after training
    #[arg(long)]
    test: Option<PathBuf>,

    /// Where to write the model bundle (defaults to the configured bundle path)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// JSON config file
    #[arg(long, short, env = "DLHA_CONFIG")]
    config: Option<String>,

    /// Write the evaluation report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DetectorConfig::load(path).with_context(|| format!("loading config {}", path))?,
        None => DetectorConfig::default(),
    };
    let output = cli.output.unwrap_or_else(|| config.server.bundle_path.clone());

    let trainer = Trainer::new(config);
    let training = load_nsl_kdd(&cli.train)?;

    tracing::info!("Training DLHA model on {} records", training.len());
    let bundle = trainer.train(&training)?;
    ModelStore::save(&bundle, &output)
        .with_context(|| format!("saving bundle to {}", output.display()))?;

    if let Some(test) = &cli.test {
        let testing = load_nsl_kdd(test)?;
        tracing::info!("Evaluating on {} records", testing.len());
        let report = trainer.evaluate(&bundle, &testing)?;
        println!("{}", report);

        if let Some(path) = &cli.report {
            std::fs::write(path, serde_json::to_string_pretty(&report)?)
                .with_context(|| format!("writing report to {}", path.display()))?;
        }
    }

    Ok(())
}
