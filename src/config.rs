// Command-line configuration.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::warn;

use crate::filter::FilterCriteria;
use crate::io::{school_code, school_label, StudentRecord};
use crate::model::ForestParams;
use crate::preprocess::StudentProfile;

#[derive(Debug, Parser)]
#[command(name = "student-risk", version, about = "Explore student performance and flag students at risk of failing")]
pub struct Cli {
    /// Student table (UCI student-performance layout)
    #[arg(long, global = true, default_value = "student-mat.csv")]
    pub data: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = Delimiter::Auto)]
    pub delimiter: Delimiter,

    /// Where charts are written
    #[arg(long, global = true, default_value = ".")]
    pub out_dir: PathBuf,

    /// Skip writing PNG charts
    #[arg(long, global = true)]
    pub no_charts: bool,

    /// Print the report as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub filters: FilterArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Delimiter {
    Auto,
    Comma,
    Semicolon,
}

impl Delimiter {
    pub fn byte(self) -> Option<u8> {
        match self {
            Delimiter::Auto => None,
            Delimiter::Comma => Some(b','),
            Delimiter::Semicolon => Some(b';'),
        }
    }
}

/// Cohort selection. Anything left out keeps the full default selection.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// School to include, by full name or code (repeatable)
    #[arg(long = "filter-school", global = true)]
    pub schools: Vec<String>,

    /// Gender code to include (repeatable)
    #[arg(long = "filter-sex", global = true)]
    pub genders: Vec<String>,

    /// Minimum weekly study time (inclusive)
    #[arg(long, global = true)]
    pub min_studytime: Option<u8>,
}

impl FilterArgs {
    pub fn criteria(&self, records: &[StudentRecord]) -> FilterCriteria {
        let given = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        // criteria hold full names; accept codes too
        let schools: Vec<String> = self
            .schools
            .iter()
            .map(|s| match school_code(s).and_then(school_label) {
                Some(label) => label.to_string(),
                None => {
                    warn!("unknown school {:?}; it will select no students", s);
                    s.clone()
                }
            })
            .collect();
        let schools = given(&schools);
        let genders = given(&self.genders);
        FilterCriteria::full_selection(records).narrowed(
            schools.as_deref(),
            genders.as_deref(),
            self.min_studytime,
        )
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cohort KPIs on observed final grades and the grade distribution
    Overview,
    /// Grade breakdowns, absence trends and feature importances
    Insights(ModelArgs),
    /// Predicted at-risk students across the cohort
    Predict(ModelArgs),
    /// What-if risk assessment for one hypothetical student
    Assess {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        profile: ProfileArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Number of trees (200 for insights, 300 for predictions when omitted)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub trees: Option<u64>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Limit tree depth; unlimited by default
    #[arg(long)]
    pub max_depth: Option<usize>,

    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(2..))]
    pub min_samples_split: u64,
}

impl ModelArgs {
    pub fn params(&self, default_trees: usize) -> ForestParams {
        ForestParams::new(self.trees.map_or(default_trees, |t| t as usize), self.seed)
            .max_depth(self.max_depth)
            .min_samples_split(self.min_samples_split as usize)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ProfileArgs {
    /// School, by full name or code
    #[arg(long, default_value = "Gabriel Pereira")]
    pub school: String,

    #[arg(long, default_value = "F")]
    pub sex: String,

    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=4))]
    pub studytime: u8,

    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(0..=100))]
    pub absences: u16,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=20))]
    pub g1: u8,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=20))]
    pub g2: u8,

    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=4))]
    pub failures: u8,

    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub health: u8,
}

impl ProfileArgs {
    pub fn profile(&self) -> StudentProfile {
        let school = match school_code(&self.school) {
            Some(code) => code.to_string(),
            None => {
                warn!("unknown school {:?}; it will not match any trained school column", self.school);
                self.school.clone()
            }
        };
        StudentProfile {
            school,
            sex: self.sex.clone(),
            studytime: self.studytime,
            absences: self.absences,
            g1: self.g1,
            g2: self.g2,
            failures: self.failures,
            health: self.health,
        }
    }
}
