// One function per view: each takes the filtered cohort and assembles everything the view shows.
use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use crate::error::{Result, RiskError};
use crate::filter::FilterCriteria;
use crate::io::StudentRecord;
use crate::model::{train, FeatureImportance, ForestParams, RiskScore};
use crate::preprocess::StudentProfile;
use crate::report::{
    absence_trend, grade_histogram, grade_summary_by, overview_kpis, prediction_kpis, risk_by_group,
    Dimension, GradeHistogram, GradeSummary, GroupKey, GroupRate, OverviewKpis, PredictionKpis,
    TrendLine,
};

#[derive(Debug, Serialize)]
pub struct OverviewPage {
    pub generated_at: DateTime<Utc>,
    pub criteria: FilterCriteria,
    pub kpis: OverviewKpis,
    pub histogram: Vec<GradeHistogram>,
}

pub fn overview(criteria: &FilterCriteria, cohort: &[&StudentRecord]) -> OverviewPage {
    OverviewPage {
        generated_at: Utc::now(),
        criteria: criteria.clone(),
        kpis: overview_kpis(cohort),
        histogram: grade_histogram(cohort),
    }
}

#[derive(Debug, Serialize)]
pub struct Breakdown {
    pub dimension: Dimension,
    pub cells: Vec<GradeSummary>,
}

#[derive(Debug, Serialize)]
pub struct InsightsPage {
    pub generated_at: DateTime<Utc>,
    pub criteria: FilterCriteria,
    pub absence_trends: Vec<TrendLine>,
    pub breakdowns: Vec<Breakdown>,
    /// Empty when the cohort is empty or too small or uniform to fit a forest.
    pub importances: Vec<FeatureImportance>,
}

pub fn insights(criteria: &FilterCriteria, cohort: &[&StudentRecord], params: &ForestParams) -> Result<InsightsPage> {
    let breakdowns = [
        Dimension::StudyTime,
        Dimension::MotherEducation,
        Dimension::FatherEducation,
        Dimension::FamilySize,
    ]
    .into_iter()
    .map(|dimension| Breakdown { dimension, cells: grade_summary_by(cohort, dimension) })
    .collect();

    let importances = match train(cohort, params) {
        Ok(model) => model.importances(),
        Err(RiskError::EmptyCohort) => {
            warn!("no students selected; skipping feature importances");
            Vec::new()
        }
        Err(RiskError::InsufficientData(reason)) => {
            warn!("skipping feature importances: {}", reason);
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    Ok(InsightsPage {
        generated_at: Utc::now(),
        criteria: criteria.clone(),
        absence_trends: absence_trend(cohort)?,
        breakdowns,
        importances,
    })
}

/// A student flagged by the model.
#[derive(Debug, Serialize)]
pub struct FlaggedStudent<'a> {
    pub row: usize,
    pub student: &'a StudentRecord,
    #[serde(flatten)]
    pub score: RiskScore,
}

#[derive(Debug, Serialize)]
pub struct PredictionsPage<'a> {
    pub generated_at: DateTime<Utc>,
    pub criteria: FilterCriteria,
    pub kpis: PredictionKpis,
    pub by_school: Vec<GroupRate>,
    pub by_sex: Vec<GroupRate>,
    /// At-risk students, highest risk first.
    pub flagged: Vec<FlaggedStudent<'a>>,
}

pub fn predictions<'a>(
    criteria: &FilterCriteria,
    cohort: &[&'a StudentRecord],
    params: &ForestParams,
) -> Result<PredictionsPage<'a>> {
    let assessments = match train(cohort, params) {
        Ok(model) => model.assess_cohort(cohort),
        Err(RiskError::EmptyCohort) => {
            warn!("no students selected; nothing to predict");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let mut flagged: Vec<FlaggedStudent<'a>> = assessments
        .iter()
        .enumerate()
        .filter(|(_, a)| a.score.at_risk)
        .map(|(row, a)| FlaggedStudent { row, student: a.student, score: a.score })
        .collect();
    flagged.sort_by(|a, b| {
        b.score.risk_probability.total_cmp(&a.score.risk_probability).then(a.row.cmp(&b.row))
    });

    Ok(PredictionsPage {
        generated_at: Utc::now(),
        criteria: criteria.clone(),
        kpis: prediction_kpis(&assessments),
        by_school: risk_by_group(&assessments, GroupKey::School),
        by_sex: risk_by_group(&assessments, GroupKey::Sex),
        flagged,
    })
}

#[derive(Debug, Serialize)]
pub struct AssessmentPage {
    pub generated_at: DateTime<Utc>,
    pub trained_on: usize,
    pub profile: StudentProfile,
    #[serde(flatten)]
    pub score: RiskScore,
}

/// Trains on the cohort, then scores the profile. An empty cohort is an error here:
/// there is no model to ask.
pub fn assess(cohort: &[&StudentRecord], params: &ForestParams, profile: StudentProfile) -> Result<AssessmentPage> {
    let model = train(cohort, params)?;
    debug!("scoring profile against {} encoded columns", model.schema().len());
    let score = model.assess_profile(&profile)?;
    Ok(AssessmentPage {
        generated_at: Utc::now(),
        trained_on: model.cohort_size(),
        profile,
        score,
    })
}

// ---------------------------------------------------------------------------
// Terminal rendering
// ---------------------------------------------------------------------------

fn write_criteria(f: &mut fmt::Formatter<'_>, c: &FilterCriteria) -> fmt::Result {
    let join = |s: &std::collections::BTreeSet<String>| s.iter().cloned().collect::<Vec<_>>().join(", ");
    writeln!(
        f,
        "Filters: schools [{}], genders [{}], study time >= {}",
        join(&c.schools),
        join(&c.genders),
        c.min_studytime
    )
}

impl fmt::Display for OverviewPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_criteria(f, &self.criteria)?;
        writeln!(f, "\nKey Performance Indicators")?;
        writeln!(f, "{:<34} {:>8}", "Total Students", self.kpis.total_students)?;
        writeln!(f, "{:<34} {:>8.2}", "Average Final Grade (out of 20)", self.kpis.avg_grade)?;
        writeln!(f, "{:<34} {:>7.2}%", "At-Risk Students (G3 < 10)", self.kpis.at_risk_pct)?;
        writeln!(f, "\nFinal grade distribution")?;
        for h in &self.histogram {
            let bins: Vec<String> = h
                .counts
                .iter()
                .enumerate()
                .filter(|&(_, &c)| c > 0)
                .map(|(g, c)| format!("{}:{}", g, c))
                .collect();
            writeln!(f, "  {:<22} {}", h.school, bins.join(" "))?;
        }
        Ok(())
    }
}

impl fmt::Display for InsightsPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_criteria(f, &self.criteria)?;
        writeln!(f, "\nAbsences vs final grade")?;
        for t in &self.absence_trends {
            writeln!(
                f,
                "  {:<22} G3 = {:.3} {:+.3} * absences  (n = {})",
                t.school, t.intercept, t.slope, t.count
            )?;
        }
        for b in &self.breakdowns {
            writeln!(f, "\n{} vs final grade", b.dimension)?;
            for c in &b.cells {
                writeln!(
                    f,
                    "  {:<4} {:<22} n={:<4} min {:>4.1}  q1 {:>4.1}  median {:>4.1}  q3 {:>4.1}  max {:>4.1}",
                    c.value, c.school, c.count, c.min, c.q1, c.median, c.q3, c.max
                )?;
            }
        }
        writeln!(f, "\nFeature importances")?;
        for fi in self.importances.iter().rev() {
            writeln!(f, "  {:<30} {:>8.4}", fi.feature, fi.importance)?;
        }
        Ok(())
    }
}

impl fmt::Display for PredictionsPage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_criteria(f, &self.criteria)?;
        writeln!(f, "\nPredicted Risk Overview (at risk: predicted G3 < 10)")?;
        writeln!(f, "{:<28} {:>7.1}%", "Predicted At-Risk", self.kpis.at_risk_pct)?;
        writeln!(f, "{:<28} {:>8}", "At-Risk Students", self.kpis.at_risk_count)?;
        writeln!(f, "{:<28} {:>8}", "High-Risk Cases (>=70%)", self.kpis.high_risk_count)?;
        writeln!(f, "\nRisk by school")?;
        for g in &self.by_school {
            writeln!(f, "  {:<22} {:>6.1}%  (n = {})", g.group, g.at_risk_rate * 100.0, g.count)?;
        }
        writeln!(f, "\nRisk by gender")?;
        for g in &self.by_sex {
            writeln!(f, "  {:<22} {:>6.1}%  (n = {})", g.group, g.at_risk_rate * 100.0, g.count)?;
        }
        writeln!(f, "\nFlagged students")?;
        for s in &self.flagged {
            writeln!(
                f,
                "  #{:<4} {:<3} {:<2} G1 {:>2} G2 {:>2} absences {:>3}  predicted {:>5.2}  risk {:>4.0}%",
                s.row,
                s.student.school,
                s.student.sex,
                s.student.g1,
                s.student.g2,
                s.student.absences,
                s.score.predicted_g3,
                s.score.risk_probability * 100.0
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for AssessmentPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.score.at_risk { "At Risk" } else { "Not At Risk" };
        writeln!(f, "{}", verdict)?;
        writeln!(f, "Predicted Final Grade: {:.1}", self.score.predicted_g3)?;
        writeln!(f, "Risk Probability: {:.0}%", self.score.risk_probability * 100.0)?;
        writeln!(f, "(model trained on {} students)", self.trained_on)
    }
}
