// PNG charts for the reports.
use std::path::Path;

use plotters::prelude::*;

use crate::error::{Result, RiskError};
use crate::model::FeatureImportance;
use crate::report::{GradeHistogram, GroupRate};

const ORANGE: RGBColor = RGBColor(255, 165, 0);

fn plot_err(e: impl std::fmt::Display) -> RiskError {
    RiskError::Plot(e.to_string())
}

/// Blue for Gabriel Pereira, orange for Mousinho da Silveira.
fn school_color(school: &str) -> RGBColor {
    if school == "Mousinho da Silveira" {
        ORANGE
    } else {
        BLUE
    }
}

/// Draws a horizontal bar chart of feature importances
/// input: importances sorted ascending, output path
/// output: none (writes the PNG)
/// logic: split into names and values; X range from 0 to the largest importance with padding;
/// label Y ticks with feature names; one bar per feature, largest at the top
pub fn plot_importances(results: &[FeatureImportance], path: &Path) -> Result<()> {
    let names: Vec<&str> = results.iter().map(|r| r.feature.as_str()).collect();
    let values: Vec<f64> = results.iter().map(|r| r.importance).collect();
    let count = results.len();

    let max_x = values.iter().cloned().fold(0.0_f64, f64::max);
    let x_range = 0.0..(max_x * 1.1).max(1e-6);

    // tall enough for every feature label
    let height = (count as u32 * 18 + 120).max(400);
    let root = BitMapBackend::new(path, (1000, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Feature Importance for Predicting Final Grade", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(200)
        .build_cartesian_2d(x_range, 0..count)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(count)
        .y_label_formatter(&|idx| names.get(*idx).map(|n| n.to_string()).unwrap_or_default())
        .x_desc("Importance")
        .y_desc("Feature")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| Rectangle::new([(0.0, i), (v, i + 1)], BLUE.mix(0.5).filled())),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Vertical bars of the predicted at-risk percentage per group.
pub fn plot_group_rates(rates: &[GroupRate], path: &Path) -> Result<()> {
    let names: Vec<&str> = rates.iter().map(|r| r.group.as_str()).collect();
    let count = rates.len();

    let root = BitMapBackend::new(path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Predicted At-Risk Students by School", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0..count, 0.0..100.0)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(count)
        .x_label_formatter(&|idx| names.get(*idx).map(|n| n.to_string()).unwrap_or_default())
        .x_desc("School")
        .y_desc("Predicted At-Risk (%)")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(rates.iter().enumerate().map(|(i, r)| {
            Rectangle::new(
                [(i, 0.0), (i + 1, r.at_risk_rate * 100.0)],
                school_color(&r.group).mix(0.7).filled(),
            )
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Side-by-side final-grade histogram, one colour per school.
pub fn plot_grade_histogram(histograms: &[GradeHistogram], path: &Path) -> Result<()> {
    let max_count = histograms
        .iter()
        .flat_map(|h| h.counts.iter().copied())
        .max()
        .unwrap_or(0);
    let width = 1.0 / histograms.len().max(1) as f64;

    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Distribution of Final Grades", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..21.0, 0..max_count + 1)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(21)
        .x_desc("Final Grade")
        .y_desc("Students")
        .draw()
        .map_err(plot_err)?;

    for (s, h) in histograms.iter().enumerate() {
        let color = school_color(&h.school);
        let offset = s as f64 * width;
        chart
            .draw_series(h.counts.iter().enumerate().map(|(g, &c)| {
                let x0 = g as f64 + offset;
                Rectangle::new([(x0, 0), (x0 + width, c)], color.mix(0.7).filled())
            }))
            .map_err(plot_err)?
            .label(h.school.clone())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

