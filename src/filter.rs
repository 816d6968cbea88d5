// Sidebar-style cohort selection: school and gender membership plus a study-time floor.
use std::collections::BTreeSet;

use serde::Serialize;

use crate::io::StudentRecord;

/// Which students make up the cohort.
///
/// Schools and genders are membership sets; an empty set selects nobody.
/// `min_studytime` is an inclusive lower bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterCriteria {
    pub schools: BTreeSet<String>,
    pub genders: BTreeSet<String>,
    pub min_studytime: u8,
}

/// Choices a caller can offer: sorted distinct school labels and genders, and the
/// observed study-time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub schools: Vec<String>,
    pub genders: Vec<String>,
    pub studytime_min: u8,
    pub studytime_max: u8,
}

impl FilterOptions {
    pub fn from_records(records: &[StudentRecord]) -> Self {
        let schools: BTreeSet<&str> = records.iter().filter_map(|r| r.school_name()).collect();
        let genders: BTreeSet<&str> = records.iter().map(|r| r.sex.as_str()).collect();
        FilterOptions {
            schools: schools.into_iter().map(String::from).collect(),
            genders: genders.into_iter().map(String::from).collect(),
            studytime_min: records.iter().map(|r| r.studytime).min().unwrap_or(0),
            studytime_max: records.iter().map(|r| r.studytime).max().unwrap_or(0),
        }
    }
}

impl FilterCriteria {
    /// Everything pre-selected: the default view, which filters nothing out.
    pub fn full_selection(records: &[StudentRecord]) -> Self {
        let opts = FilterOptions::from_records(records);
        FilterCriteria {
            schools: opts.schools.into_iter().collect(),
            genders: opts.genders.into_iter().collect(),
            min_studytime: opts.studytime_min,
        }
    }

    /// Replaces the school selection when `schools` is given; same for genders and the floor.
    pub fn narrowed(
        mut self,
        schools: Option<&[String]>,
        genders: Option<&[String]>,
        min_studytime: Option<u8>,
    ) -> Self {
        if let Some(s) = schools {
            self.schools = s.iter().cloned().collect();
        }
        if let Some(g) = genders {
            self.genders = g.iter().cloned().collect();
        }
        if let Some(m) = min_studytime {
            self.min_studytime = m;
        }
        self
    }

    pub fn matches(&self, rec: &StudentRecord) -> bool {
        let school_ok = rec
            .school_name()
            .is_some_and(|name| self.schools.contains(name));
        school_ok && self.genders.contains(&rec.sex) && rec.studytime >= self.min_studytime
    }
}

/// Returns the records satisfying every criterion, in input order.
pub fn apply<'a>(records: &'a [StudentRecord], criteria: &FilterCriteria) -> Vec<&'a StudentRecord> {
    records.iter().filter(|r| criteria.matches(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tests::student;

    fn sample() -> Vec<StudentRecord> {
        vec![
            student("GP", "F", 1, 8),
            student("GP", "M", 3, 12),
            student("MS", "F", 2, 9),
            student("MS", "M", 4, 15),
            student("XX", "F", 2, 11),
        ]
    }

    #[test]
    fn full_selection_keeps_every_labelled_record() {
        let recs: Vec<_> = sample().into_iter().take(4).collect();
        let crit = FilterCriteria::full_selection(&recs);
        let out = apply(&recs, &crit);
        assert_eq!(out.len(), recs.len());
        assert!(out.iter().zip(&recs).all(|(a, b)| *a == b));
    }

    #[test]
    fn output_satisfies_criteria_and_nothing_is_missed() {
        let recs = sample();
        let crit = FilterCriteria::full_selection(&recs).narrowed(
            Some(&["Mousinho da Silveira".to_string()]),
            Some(&["F".to_string()]),
            Some(2),
        );
        let out = apply(&recs, &crit);
        assert_eq!(out, vec![&recs[2]]);
        for r in &out {
            assert_eq!(r.school_name(), Some("Mousinho da Silveira"));
            assert_eq!(r.sex, "F");
            assert!(r.studytime >= 2);
        }

        // each criterion alone would admit more; the conjunction admits only the intersection
        let crit = FilterCriteria::full_selection(&recs).narrowed(
            Some(&["Gabriel Pereira".to_string()]),
            Some(&["M".to_string()]),
            Some(1),
        );
        assert_eq!(apply(&recs, &crit), vec![&recs[1]]);

        let crit = FilterCriteria::full_selection(&recs).narrowed(None, Some(&["F".to_string()]), Some(3));
        assert!(apply(&recs, &crit).is_empty());
    }

    #[test]
    fn empty_selection_selects_nobody() {
        let recs = sample();
        let crit = FilterCriteria::full_selection(&recs).narrowed(None, Some(&[]), None);
        assert!(apply(&recs, &crit).is_empty());
    }

    #[test]
    fn unknown_school_code_never_matches() {
        let recs = sample();
        let crit = FilterCriteria::full_selection(&recs);
        assert!(!crit.matches(&recs[4]));
    }

    #[test]
    fn options_are_sorted_and_distinct() {
        let opts = FilterOptions::from_records(&sample());
        assert_eq!(opts.schools, vec!["Gabriel Pereira", "Mousinho da Silveira"]);
        assert_eq!(opts.genders, vec!["F", "M"]);
        assert_eq!((opts.studytime_min, opts.studytime_max), (1, 4));
    }
}
