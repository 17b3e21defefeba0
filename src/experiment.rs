//! Repeated train-and-evaluate trials with score aggregation.

use std::fs;

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    config::ExperimentConfig,
    data::PreparedData,
    error::ExperimentError,
    model::{cnn_lstm, Network},
    plot, train,
};

/// Aggregated test accuracies over all trials of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    /// Test accuracy of each trial, in trial order.
    pub scores: Vec<f32>,
    /// Mean of the scores.
    pub mean: f32,
    /// Population standard deviation of the scores.
    pub std: f32,
    /// Smallest score.
    pub min: f32,
    /// Largest score.
    pub max: f32,
}

impl ExperimentSummary {
    /// Aggregate a non-empty list of trial scores.
    pub fn from_scores(scores: Vec<f32>) -> Result<Self, ExperimentError> {
        if scores.is_empty() {
            return Err(ExperimentError::Training(
                "no trial scores to aggregate".to_string(),
            ));
        }
        let n = scores.len() as f32;
        let mean = scores.iter().sum::<f32>() / n;
        let variance = scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / n;
        let std = variance.sqrt();
        let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Ok(Self {
            scores,
            mean,
            std,
            min,
            max,
        })
    }
}

/// Run `n_trials` independent train-and-evaluate cycles.
///
/// Each trial builds a freshly initialized network, trains it on the
/// training-proper rows while monitoring the validation slice, and scores
/// it by test-set accuracy. Charts are rendered per trial when enabled, and
/// the aggregated summary is optionally written as JSON.
pub fn run_experiment(
    config: &ExperimentConfig,
    data: &PreparedData,
) -> Result<ExperimentSummary, ExperimentError> {
    let mut scores = Vec::with_capacity(config.n_trials);
    for trial in 1..=config.n_trials {
        info!("trial {}/{}", trial, config.n_trials);
        let mut network = Network::build(&cnn_lstm(data.n_outputs()), &data.input_shape())?;
        println!("{}", network.summary());

        let history = train::fit(
            &mut network,
            &data.train_features,
            &data.train_labels,
            &data.val_features,
            &data.val_labels,
            config.epochs,
            config.batch_size,
        )?;
        println!("{:?}", train::History::KEYS);

        let (test_loss, test_acc) = train::evaluate(
            &mut network,
            &data.test_features,
            &data.test_labels,
            config.batch_size,
        )?;
        info!(
            "trial {}: test loss {:.4}, test accuracy {:.4}",
            trial, test_loss, test_acc
        );

        if config.plot {
            plot::render_curves(&history, trial, &config.plot_dir)?;
        }
        scores.push(test_acc);
    }

    let summary = ExperimentSummary::from_scores(scores)?;
    if let Some(path) = &config.summary_path {
        let json = serde_json::to_string_pretty(&summary).map_err(|err| {
            ExperimentError::Configuration(format!("can't serialize summary: {}", err))
        })?;
        fs::write(path, json).map_err(|err| {
            ExperimentError::Configuration(format!("can't write {}: {}", path.display(), err))
        })?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::ExperimentSummary;

    #[test]
    fn aggregates_scores() {
        let summary = ExperimentSummary::from_scores(vec![0.70, 0.72, 0.69]).unwrap();
        assert!((summary.mean - 0.70333333).abs() < 1e-5);
        assert!((summary.std - 0.012472191).abs() < 1e-5);
        assert!((summary.min - 0.69).abs() < 1e-6);
        assert!((summary.max - 0.72).abs() < 1e-6);
        assert!(summary.min <= summary.mean && summary.mean <= summary.max);
    }

    #[test]
    fn a_single_score_has_zero_spread() {
        let summary = ExperimentSummary::from_scores(vec![0.9]).unwrap();
        assert_eq!(summary.mean, 0.9);
        assert_eq!(summary.std, 0.0);
        assert_eq!(summary.min, 0.9);
        assert_eq!(summary.max, 0.9);
    }

    #[test]
    fn no_scores_is_an_error() {
        assert!(ExperimentSummary::from_scores(Vec::new()).is_err());
    }

    #[test]
    fn summary_round_trips_through_json() {
        let summary = ExperimentSummary::from_scores(vec![0.5, 0.7]).unwrap();
        let json = serde_json::to_string(&summary).unwrap();
        let back: ExperimentSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scores, summary.scores);
        assert_eq!(back.mean, summary.mean);
    }
}
