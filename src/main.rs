use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kinet::{config::ExperimentConfig, data, experiment};

/// Train and evaluate a CNN-LSTM movement-sequence classifier.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Training feature array (.npy), shaped (samples, timesteps, features).
    #[arg(long)]
    train_features: Option<PathBuf>,
    /// Training label array (.npy), shaped (samples, n_outputs).
    #[arg(long)]
    train_labels: Option<PathBuf>,
    /// Test feature array (.npy).
    #[arg(long)]
    test_features: Option<PathBuf>,
    /// Test label array (.npy).
    #[arg(long)]
    test_labels: Option<PathBuf>,

    /// Number of training epochs per trial.
    #[arg(long)]
    epochs: Option<usize>,
    /// Number of samples per gradient update.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Number of subsequences per sample.
    #[arg(long)]
    n_steps: Option<usize>,
    /// Number of timesteps per subsequence.
    #[arg(long)]
    n_length: Option<usize>,
    /// Number of train+evaluate cycles to aggregate over.
    #[arg(long)]
    n_trials: Option<usize>,
    /// Number of leading training rows held out for validation.
    #[arg(long)]
    validation_size: Option<usize>,

    /// Disable chart rendering.
    #[arg(long)]
    no_plot: bool,
    /// Directory for rendered charts.
    #[arg(long)]
    plot_dir: Option<PathBuf>,
    /// Write a JSON summary of the aggregated scores to this path.
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let (Some(train_features), Some(train_labels), Some(test_features), Some(test_labels)) = (
                    self.train_features.clone(),
                    self.train_labels.clone(),
                    self.test_features.clone(),
                    self.test_labels.clone(),
                ) else {
                    bail!(
                        "either --config or all of --train-features, --train-labels, \
                         --test-features, and --test-labels must be given"
                    );
                };
                ExperimentConfig::new(train_features, train_labels, test_features, test_labels)
            }
        };

        if let Some(path) = self.train_features {
            config.train_features_path = path;
        }
        if let Some(path) = self.train_labels {
            config.train_labels_path = path;
        }
        if let Some(path) = self.test_features {
            config.test_features_path = path;
        }
        if let Some(path) = self.test_labels {
            config.test_labels_path = path;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(n_steps) = self.n_steps {
            config.n_steps = n_steps;
        }
        if let Some(n_length) = self.n_length {
            config.n_length = n_length;
        }
        if let Some(n_trials) = self.n_trials {
            config.n_trials = n_trials;
        }
        if let Some(validation_size) = self.validation_size {
            config.validation_size = validation_size;
        }
        if self.no_plot {
            config.plot = false;
        }
        if let Some(plot_dir) = self.plot_dir {
            config.plot_dir = plot_dir;
        }
        if let Some(summary) = self.summary {
            config.summary_path = Some(summary);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Args::parse().into_config()?;
    config.validate()?;

    let raw = data::RawDataset::load(&config)?;
    println!(
        "train: {:?} {:?}",
        raw.train_features.shape(),
        raw.train_labels.shape()
    );
    println!(
        "test: {:?} {:?}",
        raw.test_features.shape(),
        raw.test_labels.shape()
    );
    let prepared = data::prepare(raw, &config)?;

    let summary = experiment::run_experiment(&config, &prepared)?;
    println!("{:?}", summary.scores);
    println!("M={} STD={}", summary.mean, summary.std);
    println!("Min={} Max={}", summary.min, summary.max);
    Ok(())
}
