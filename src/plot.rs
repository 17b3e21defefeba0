//! Training-curve rendering.

use std::{fs, path::Path};

use plotters::prelude::*;

use crate::{error::ExperimentError, train::History};

fn plot_err<E: std::fmt::Display>(err: E) -> ExperimentError {
    ExperimentError::Plot(err.to_string())
}

/// Render the loss and accuracy curves of one trial as PNG files.
///
/// Writes `trialNN_loss.png` and `trialNN_accuracy.png` into `dir`, creating
/// the directory if needed. Each chart overlays the training metric in red
/// and the validation metric in blue.
pub fn render_curves(history: &History, trial: usize, dir: &Path) -> Result<(), ExperimentError> {
    fs::create_dir_all(dir).map_err(plot_err)?;
    render_chart(
        &dir.join(format!("trial{:02}_loss.png", trial)),
        "Training and validation loss",
        "Loss",
        &history.loss,
        &history.val_loss,
    )?;
    render_chart(
        &dir.join(format!("trial{:02}_accuracy.png", trial)),
        "Training and validation accuracy",
        "Accuracy",
        &history.acc,
        &history.val_acc,
    )
}

fn render_chart(
    path: &Path,
    title: &str,
    y_label: &str,
    training: &[f32],
    validation: &[f32],
) -> Result<(), ExperimentError> {
    if training.is_empty() {
        return Err(ExperimentError::Plot(format!(
            "no epochs recorded for {}",
            title
        )));
    }
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let y_max = training
        .iter()
        .chain(validation.iter())
        .copied()
        .fold(0.0f32, f32::max)
        .max(1e-6)
        * 1.05;
    let x_max = (training.len() as f32).max(2.0);

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(title, ("sans-serif", 24.0))
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0.0f32..x_max, 0.0f32..y_max)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Epochs")
        .y_desc(y_label)
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(
            training
                .iter()
                .enumerate()
                .map(|(i, &v)| (i as f32 + 1.0, v)),
            &RED,
        ))
        .map_err(plot_err)?
        .label("training")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], RED));
    chart
        .draw_series(LineSeries::new(
            validation
                .iter()
                .enumerate()
                .map(|(i, &v)| (i as f32 + 1.0, v)),
            &BLUE,
        ))
        .map_err(plot_err)?
        .label("validation")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], BLUE));
    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::render_curves;
    use crate::train::History;

    #[test]
    fn renders_both_charts() {
        let dir = env::temp_dir().join("kinet-plot-test");
        let history = History {
            loss: vec![0.9, 0.6, 0.4],
            acc: vec![0.5, 0.7, 0.8],
            val_loss: vec![0.95, 0.7, 0.5],
            val_acc: vec![0.45, 0.65, 0.75],
        };
        render_curves(&history, 1, &dir).unwrap();
        assert!(dir.join("trial01_loss.png").is_file());
        assert!(dir.join("trial01_accuracy.png").is_file());
    }

    #[test]
    fn an_empty_history_is_rejected() {
        let dir = env::temp_dir().join("kinet-plot-empty");
        assert!(render_curves(&History::default(), 1, &dir).is_err());
    }
}
