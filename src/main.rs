/// Load the student table, select a cohort, and run one of the report views over it
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;

mod config;
mod error;
mod filter;
mod io;
mod model;
mod pages;
mod plot;
mod preprocess;
mod report;

use config::{Cli, Command};
use io::{CsvSource, DatasetCache};

/// Trees used for the insights view when `--trees` is not given.
const INSIGHT_TREES: usize = 200;
/// Trees used for cohort predictions and what-if assessments.
const PREDICTION_TREES: usize = 300;

/// Print a page as text or pretty JSON.
fn emit<P: Serialize + std::fmt::Display>(page: &P, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(page)?);
    } else {
        print!("{}", page);
    }
    Ok(())
}

/// Write a chart unless charts are disabled or there is nothing to draw.
fn chart<T>(
    cli: &Cli,
    data: &[T],
    file: &str,
    draw: impl FnOnce(&[T], &Path) -> error::Result<()>,
) -> Result<()> {
    if cli.no_charts || data.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("creating {}", cli.out_dir.display()))?;
    let path = cli.out_dir.join(file);
    draw(data, &path).with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}

/// load data, filter it into a cohort, then build and print the requested view
/// input: command line
/// output: none (report to stdout, charts to --out-dir)
/// logic: the dataset cache is built here and handed down; every model is trained fresh
/// on the current cohort
fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let source = CsvSource::new(&cli.data, cli.delimiter.byte());
    let cache = DatasetCache::new(source);
    let records = cache
        .load()
        .with_context(|| format!("loading student data from {}", cli.data.display()))?;

    let criteria = cli.filters.criteria(records);
    let cohort = filter::apply(records, &criteria);
    info!("cohort: {} of {} students", cohort.len(), records.len());

    match &cli.command {
        Command::Overview => {
            let page = pages::overview(&criteria, &cohort);
            emit(&page, cli.json)?;
            chart(&cli, &page.histogram, "grade_distribution.png", plot::plot_grade_histogram)?;
        }
        Command::Insights(args) => {
            let page = pages::insights(&criteria, &cohort, &args.params(INSIGHT_TREES))?;
            emit(&page, cli.json)?;
            chart(&cli, &page.importances, "feature_importances.png", plot::plot_importances)?;
        }
        Command::Predict(args) => {
            let page = pages::predictions(&criteria, &cohort, &args.params(PREDICTION_TREES))?;
            emit(&page, cli.json)?;
            chart(&cli, &page.by_school, "risk_by_school.png", plot::plot_group_rates)?;
        }
        Command::Assess { model, profile } => {
            let page = pages::assess(&cohort, &model.params(PREDICTION_TREES), profile.profile())?;
            emit(&page, cli.json)?;
        }
    }

    Ok(())
}

/// end-to-end tests over a CSV file
#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::Write;

    use crate::io::tests::HEADER;
    use crate::model::ForestParams;

    /// One semicolon-separated row; grades follow `g`, absences rise as grades fall.
    fn row(school: &str, sex: &str, studytime: u8, g: u8) -> String {
        format!(
            "\"{school}\";\"{sex}\";17;\"U\";\"GT3\";\"T\";2;2;\"other\";\"services\";\"home\";\"mother\";1;{studytime};0;\"no\";\"yes\";\"no\";\"yes\";\"yes\";\"yes\";\"yes\";\"no\";4;3;3;1;1;3;{abs};{g};{g};{g}",
            abs = 20 - g.min(20)
        )
    }

    fn sample_file() -> std::result::Result<tempfile::NamedTempFile, Box<dyn Error>> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "{}", HEADER)?;
        for i in 0..36u8 {
            let school = if i % 3 == 0 { "MS" } else { "GP" };
            let sex = if i % 2 == 0 { "F" } else { "M" };
            writeln!(f, "{}", row(school, sex, i % 4 + 1, 3 + i % 15))?;
        }
        f.flush()?;
        Ok(f)
    }

    #[test]
    fn pipeline_from_csv_to_reports() -> std::result::Result<(), Box<dyn Error>> {
        let file = sample_file()?;
        let cache = DatasetCache::new(CsvSource::new(file.path(), None));
        let records = cache.load()?;
        assert_eq!(records.len(), 36);

        let cli = Cli::try_parse_from(["student-risk", "predict", "--filter-sex", "F"])?;
        let criteria = cli.filters.criteria(records);
        let cohort = filter::apply(records, &criteria);
        assert_eq!(cohort.len(), 18);

        let page = pages::predictions(&criteria, &cohort, &ForestParams::new(40, 42))?;
        assert_eq!(page.kpis.total_students, 18);
        assert!(page.kpis.at_risk_count > 0);
        assert!(page.by_school.iter().all(|g| (0.0..=1.0).contains(&g.at_risk_rate)));

        let json = serde_json::to_value(&page)?;
        assert_eq!(json["kpis"]["total_students"], 18);
        Ok(())
    }

    #[test]
    fn what_if_uses_trained_schema() -> std::result::Result<(), Box<dyn Error>> {
        let file = sample_file()?;
        let cache = DatasetCache::new(CsvSource::new(file.path(), Some(b';')));
        let records = cache.load()?;
        let cohort = filter::apply(records, &filter::FilterCriteria::full_selection(records));

        let cli = Cli::try_parse_from([
            "student-risk", "assess", "--school", "Gabriel Pereira", "--g1", "4", "--g2", "4",
        ])?;
        let Command::Assess { model, profile } = cli.command else {
            panic!("expected assess");
        };
        let page = pages::assess(&cohort, &model.params(50), profile.profile())?;
        assert!(page.score.at_risk);
        assert_eq!(page.trained_on, 36);
        assert!(page.to_string().starts_with("At Risk"));
        Ok(())
    }
}
