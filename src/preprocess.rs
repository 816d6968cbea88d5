// Feature encoding: numeric columns pass through, categorical columns become indicator columns.
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::error::{Result, RiskError};
use crate::io::{FeatureValue, StudentRecord};

/// Ordered column layout produced by [`fit_encode`]. Every later encoding must be
/// aligned to it before it can be fed to a model trained on the fitted matrix.
#[derive(Debug, Clone)]
pub struct EncodingSchema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    fingerprint: u64,
}

impl PartialEq for EncodingSchema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl EncodingSchema {
    fn new(columns: Vec<String>) -> Self {
        let mut hasher = DefaultHasher::new();
        columns.hash(&mut hasher);
        let index = columns.iter().enumerate().map(|(i, c)| (c.clone(), i)).collect();
        EncodingSchema { columns, index, fingerprint: hasher.finish() }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Identifies the column layout; equal layouts share a fingerprint.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }
}

fn indicator_name(column: &str, level: &str) -> String {
    format!("{}_{}", column, level)
}

/// Training matrix and its target vector, row-aligned with the input records.
#[derive(Debug, Clone)]
pub struct EncodedMatrix {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

/// A single encoded row, tagged with the schema it was aligned to.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRow {
    pub schema_id: u64,
    pub values: Array1<f64>,
}

/// Encode a cohort into a numeric matrix and learn its column schema.
/// input: cohort records
/// output: (features + G3 targets, schema)
/// logic: numeric columns first in table order, then for each categorical column in table
/// order one indicator per observed level except the sorted-first one
pub fn fit_encode(records: &[&StudentRecord]) -> Result<(EncodedMatrix, EncodingSchema)> {
    let first = records.first().ok_or(RiskError::EmptyCohort)?;
    let layout = first.features();

    // collect observed levels per categorical column
    let mut levels: Vec<BTreeSet<&str>> = vec![BTreeSet::new(); layout.len()];
    for r in records {
        for (slot, (_, value)) in levels.iter_mut().zip(r.features()) {
            if let FeatureValue::Categorical(v) = value {
                slot.insert(v);
            }
        }
    }

    let mut columns: Vec<String> = layout
        .iter()
        .filter(|(_, v)| matches!(v, FeatureValue::Numeric(_)))
        .map(|(name, _)| name.to_string())
        .collect();
    for ((name, value), observed) in layout.iter().zip(&levels) {
        if let FeatureValue::Categorical(_) = value {
            // sorted-first level is the reference
            columns.extend(observed.iter().skip(1).map(|l| indicator_name(name, l)));
        }
    }
    let schema = EncodingSchema::new(columns);

    let mut x = Array2::<f64>::zeros((records.len(), schema.len()));
    let mut y = Array1::<f64>::zeros(records.len());
    for (i, r) in records.iter().enumerate() {
        fill_row(&schema, &r.features(), x.row_mut(i).as_slice_mut());
        y[i] = r.target();
    }

    Ok((EncodedMatrix { x, y }, schema))
}

/// Encode one ad-hoc row against an existing schema.
/// Columns outside the schema (including never-seen levels) are dropped; schema columns the
/// row does not provide are zero.
pub fn align_encode(features: &[(&str, FeatureValue<'_>)], schema: &EncodingSchema) -> EncodedRow {
    let mut values = Array1::<f64>::zeros(schema.len());
    fill_row(schema, features, values.as_slice_mut());
    EncodedRow { schema_id: schema.fingerprint(), values }
}

fn fill_row(schema: &EncodingSchema, features: &[(&str, FeatureValue<'_>)], row: Option<&mut [f64]>) {
    // freshly allocated standard-layout rows are always contiguous
    let Some(row) = row else { return };
    for (name, value) in features {
        let slot = match value {
            FeatureValue::Numeric(v) => schema.position(name).map(|i| (i, *v)),
            FeatureValue::Categorical(level) => {
                schema.position(&indicator_name(name, level)).map(|i| (i, 1.0))
            }
        };
        if let Some((i, v)) = slot {
            row[i] = v;
        }
    }
}

/// The handful of fields a what-if assessment asks for. Everything else the model
/// knows about is treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentProfile {
    pub school: String,
    pub sex: String,
    pub studytime: u8,
    pub absences: u16,
    pub g1: u8,
    pub g2: u8,
    pub failures: u8,
    pub health: u8,
}

impl StudentProfile {
    pub fn features(&self) -> Vec<(&'static str, FeatureValue<'_>)> {
        use FeatureValue::{Categorical as C, Numeric as N};
        vec![
            ("studytime", N(self.studytime as f64)),
            ("absences", N(self.absences as f64)),
            ("G1", N(self.g1 as f64)),
            ("G2", N(self.g2 as f64)),
            ("failures", N(self.failures as f64)),
            ("health", N(self.health as f64)),
            ("sex", C(&self.sex)),
            ("school", C(&self.school)),
        ]
    }
}
