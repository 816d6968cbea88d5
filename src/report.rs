// Aggregations over a cohort or its risk assessments. Nothing here touches a model.
use std::collections::BTreeMap;
use std::fmt;

use linfa::traits::Fit;
use linfa::Dataset;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::error::Result;
use crate::io::StudentRecord;
use crate::model::{is_at_risk, RiskAssessment};

/// Descriptive KPIs on observed final grades.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewKpis {
    pub total_students: usize,
    pub avg_grade: f64,
    pub at_risk_pct: f64,
}

/// KPIs on predicted final grades.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionKpis {
    pub total_students: usize,
    pub at_risk_count: usize,
    pub at_risk_pct: f64,
    pub high_risk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRate {
    pub group: String,
    pub count: usize,
    pub at_risk_rate: f64,
}

/// How assessments are bucketed in [`risk_by_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    School,
    Sex,
}

impl GroupKey {
    fn of(self, r: &StudentRecord) -> String {
        match self {
            GroupKey::School => r.school_name().unwrap_or("unknown").to_string(),
            GroupKey::Sex => r.sex.clone(),
        }
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Totals on observed G3. An empty cohort reports zeros.
pub fn overview_kpis(cohort: &[&StudentRecord]) -> OverviewKpis {
    let n = cohort.len();
    let sum: f64 = cohort.iter().map(|r| r.target()).sum();
    let failing = cohort.iter().filter(|r| is_at_risk(r.target())).count();
    OverviewKpis {
        total_students: n,
        avg_grade: if n == 0 { 0.0 } else { sum / n as f64 },
        at_risk_pct: pct(failing, n),
    }
}

pub fn prediction_kpis(assessments: &[RiskAssessment<'_>]) -> PredictionKpis {
    let n = assessments.len();
    let at_risk = assessments.iter().filter(|a| a.score.at_risk).count();
    PredictionKpis {
        total_students: n,
        at_risk_count: at_risk,
        at_risk_pct: pct(at_risk, n),
        high_risk_count: assessments.iter().filter(|a| a.score.is_high_risk()).count(),
    }
}

/// Share of at-risk predictions per distinct key, sorted by key.
pub fn risk_by_group(assessments: &[RiskAssessment<'_>], key: GroupKey) -> Vec<GroupRate> {
    let mut groups: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for a in assessments {
        let entry = groups.entry(key.of(a.student)).or_default();
        entry.0 += 1;
        if a.score.at_risk {
            entry.1 += 1;
        }
    }
    groups
        .into_iter()
        .map(|(group, (count, flagged))| GroupRate {
            group,
            count,
            at_risk_rate: flagged as f64 / count as f64,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Descriptive insights
// ---------------------------------------------------------------------------

/// Final-grade counts per school, one bin per integer grade 0..=20.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeHistogram {
    pub school: String,
    pub counts: [usize; 21],
}

pub fn grade_histogram(cohort: &[&StudentRecord]) -> Vec<GradeHistogram> {
    let mut by_school: BTreeMap<String, [usize; 21]> = BTreeMap::new();
    for r in cohort {
        let bins = by_school.entry(GroupKey::School.of(r)).or_insert([0; 21]);
        bins[(r.g3 as usize).min(20)] += 1;
    }
    by_school
        .into_iter()
        .map(|(school, counts)| GradeHistogram { school, counts })
        .collect()
}

/// Attributes the final grade is broken down by in [`grade_summary_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dimension {
    StudyTime,
    MotherEducation,
    FatherEducation,
    FamilySize,
}

impl Dimension {
    fn of(self, r: &StudentRecord) -> String {
        match self {
            Dimension::StudyTime => r.studytime.to_string(),
            Dimension::MotherEducation => r.medu.to_string(),
            Dimension::FatherEducation => r.fedu.to_string(),
            Dimension::FamilySize => r.famsize.clone(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dimension::StudyTime => "Weekly Study Time",
            Dimension::MotherEducation => "Mother's Education (0-4)",
            Dimension::FatherEducation => "Father's Education (0-4)",
            Dimension::FamilySize => "Family Size",
        };
        f.write_str(s)
    }
}

/// Five-number summary of G3 for one (dimension value, school) cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeSummary {
    pub value: String,
    pub school: String,
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

/// Linear-interpolated quantile of sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

pub fn grade_summary_by(cohort: &[&StudentRecord], dim: Dimension) -> Vec<GradeSummary> {
    let mut cells: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
    for r in cohort {
        cells
            .entry((dim.of(r), GroupKey::School.of(r)))
            .or_default()
            .push(r.target());
    }
    cells
        .into_iter()
        .map(|((value, school), mut grades)| {
            grades.sort_by(f64::total_cmp);
            GradeSummary {
                value,
                school,
                count: grades.len(),
                min: grades[0],
                q1: quantile(&grades, 0.25),
                median: quantile(&grades, 0.5),
                q3: quantile(&grades, 0.75),
                max: grades[grades.len() - 1],
            }
        })
        .collect()
}

/// Ordinary least squares line of G3 on absences for one school.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendLine {
    pub school: String,
    pub count: usize,
    pub slope: f64,
    pub intercept: f64,
}

/// One trend line per school. Schools with fewer than two students or no spread in
/// absences have no line.
pub fn absence_trend(cohort: &[&StudentRecord]) -> Result<Vec<TrendLine>> {
    let mut by_school: BTreeMap<String, Vec<&StudentRecord>> = BTreeMap::new();
    for &r in cohort {
        by_school.entry(GroupKey::School.of(r)).or_default().push(r);
    }

    let mut out = Vec::new();
    for (school, recs) in by_school {
        let first = recs[0].absences;
        if recs.len() < 2 || recs.iter().all(|r| r.absences == first) {
            continue;
        }
        let x = Array2::from_shape_fn((recs.len(), 1), |(i, _)| recs[i].absences as f64);
        let y: Array1<f64> = recs.iter().map(|r| r.target()).collect();
        let fitted = LinearRegression::new().fit(&Dataset::new(x, y))?;
        out.push(TrendLine {
            school,
            count: recs.len(),
            slope: fitted.params()[0],
            intercept: fitted.intercept(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tests::student;
    use crate::model::RiskScore;

    fn assessed<'a>(recs: &'a [StudentRecord], flags: &[bool]) -> Vec<RiskAssessment<'a>> {
        recs.iter()
            .zip(flags)
            .map(|(student, &risky)| RiskAssessment {
                student,
                score: RiskScore::from_prediction(if risky { 6.0 } else { 14.0 }),
            })
            .collect()
    }

    #[test]
    fn observed_kpis_for_small_cohort() {
        let recs = vec![student("GP", "F", 1, 8), student("GP", "M", 2, 12), student("MS", "F", 3, 9)];
        let refs: Vec<&StudentRecord> = recs.iter().collect();
        let k = overview_kpis(&refs);
        assert_eq!(k.total_students, 3);
        assert!((k.avg_grade - 29.0 / 3.0).abs() < 1e-9);
        assert!((k.at_risk_pct - 66.67).abs() < 0.01);
    }

    #[test]
    fn empty_cohort_reports_zeros() {
        let k = overview_kpis(&[]);
        assert_eq!(k, OverviewKpis { total_students: 0, avg_grade: 0.0, at_risk_pct: 0.0 });
        let p = prediction_kpis(&[]);
        assert_eq!(p.total_students, 0);
        assert_eq!(p.at_risk_pct, 0.0);
        assert!(risk_by_group(&[], GroupKey::School).is_empty());
        assert!(grade_histogram(&[]).is_empty());
    }

    #[test]
    fn rates_per_school() {
        let recs = vec![
            student("GP", "F", 1, 8),
            student("GP", "M", 1, 8),
            student("MS", "F", 1, 8),
            student("MS", "M", 1, 8),
        ];
        let a = assessed(&recs, &[true, false, true, true]);
        let rates = risk_by_group(&a, GroupKey::School);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].group, "Gabriel Pereira");
        assert_eq!(rates[0].count, 2);
        assert_eq!(rates[0].at_risk_rate, 0.5);
        assert_eq!(rates[1].group, "Mousinho da Silveira");
        assert_eq!(rates[1].at_risk_rate, 1.0);

        let by_sex = risk_by_group(&a, GroupKey::Sex);
        assert_eq!(by_sex[0].group, "F");
        assert_eq!(by_sex[0].at_risk_rate, 1.0);
    }

    #[test]
    fn prediction_kpis_count_high_risk() {
        let recs = vec![student("GP", "F", 1, 8), student("GP", "M", 1, 8), student("MS", "F", 1, 8)];
        let mut a = assessed(&recs, &[true, true, false]);
        a[0].score = RiskScore::from_prediction(2.0);
        let k = prediction_kpis(&a);
        assert_eq!(k.at_risk_count, 2);
        assert_eq!(k.high_risk_count, 1);
        assert!((k.at_risk_pct - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn histogram_bins_by_grade() {
        let recs = vec![student("GP", "F", 1, 8), student("GP", "M", 1, 8), student("MS", "F", 1, 20)];
        let refs: Vec<&StudentRecord> = recs.iter().collect();
        let h = grade_histogram(&refs);
        assert_eq!(h[0].school, "Gabriel Pereira");
        assert_eq!(h[0].counts[8], 2);
        assert_eq!(h[1].counts[20], 1);
    }

    #[test]
    fn five_number_summary() {
        let recs: Vec<StudentRecord> = [5, 10, 15, 20, 0].iter().map(|&g| student("GP", "F", 2, g)).collect();
        let refs: Vec<&StudentRecord> = recs.iter().collect();
        let s = grade_summary_by(&refs, Dimension::StudyTime);
        assert_eq!(s.len(), 1);
        assert_eq!((s[0].min, s[0].q1, s[0].median, s[0].q3, s[0].max), (0.0, 5.0, 10.0, 15.0, 20.0));
        assert_eq!(s[0].value, "2");
    }

    #[test]
    fn trend_recovers_exact_line() -> Result<()> {
        let recs: Vec<StudentRecord> = (0..5u8)
            .map(|i| {
                let mut r = student("GP", "F", 1, 15 - 2 * i);
                r.absences = i as u16 * 4;
                r
            })
            .collect();
        let mut refs: Vec<&StudentRecord> = recs.iter().collect();
        let lone = student("MS", "M", 1, 10);
        refs.push(&lone);

        let lines = absence_trend(&refs)?;
        assert_eq!(lines.len(), 1);
        assert!((lines[0].slope + 0.5).abs() < 1e-6);
        assert!((lines[0].intercept - 15.0).abs() < 1e-6);
        Ok(())
    }
}
