/// Train a bagged regression-tree ensemble and turn its grade predictions into risk scores.
use linfa::traits::{Fit, Predict, PredictInplace};
use linfa::{Dataset, DatasetBase};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::{Result, RiskError};
use crate::io::StudentRecord;
use crate::preprocess::{align_encode, fit_encode, EncodedRow, EncodingSchema, StudentProfile};

/// Final grades below this are failing.
pub const PASS_GRADE: f64 = 10.0;
/// Risk scores at or above this count as high-risk cases.
pub const HIGH_RISK: f64 = 0.7;

/// Linear risk heuristic: 1.0 at grade 0, 0.0 from grade 10 upwards.
pub fn risk_probability(predicted_grade: f64) -> f64 {
    ((PASS_GRADE - predicted_grade) / PASS_GRADE).clamp(0.0, 1.0)
}

pub fn is_at_risk(grade: f64) -> bool {
    grade < PASS_GRADE
}

// ---------------------------------------------------------------------------
// Regression tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// CART regression tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Grower<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    min_samples_split: usize,
    max_depth: Option<usize>,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Sum of squared deviations from the mean, and the mean itself.
fn sse(y: &Array1<f64>, idx: &[usize]) -> (f64, f64) {
    let n = idx.len() as f64;
    let (sum, sumsq) = idx.iter().fold((0.0, 0.0), |(s, q), &i| (s + y[i], q + y[i] * y[i]));
    let mean = sum / n;
    ((sumsq - sum * mean).max(0.0), mean)
}

impl<'a> Grower<'a> {
    fn grow(&mut self, idx: &mut [usize], depth: usize) -> usize {
        let (impurity, mean) = sse(self.y, idx);
        let at_limit = self.max_depth.is_some_and(|d| depth >= d);
        let split = if idx.len() < self.min_samples_split || at_limit || impurity <= 1e-12 {
            None
        } else {
            self.best_split(idx, impurity)
        };

        let Some(best) = split else {
            self.nodes.push(Node::Leaf(mean));
            return self.nodes.len() - 1;
        };
        self.importances[best.feature] += best.gain;

        // reserve our slot before children so the root stays at 0
        let me = self.nodes.len();
        self.nodes.push(Node::Leaf(mean));

        let x = self.x;
        idx.sort_by(|&a, &b| x[(a, best.feature)].total_cmp(&x[(b, best.feature)]));
        let cut = idx.partition_point(|&i| x[(i, best.feature)] <= best.threshold);
        let (l, r) = idx.split_at_mut(cut);
        let left = self.grow(l, depth + 1);
        let right = self.grow(r, depth + 1);
        self.nodes[me] = Node::Split { feature: best.feature, threshold: best.threshold, left, right };
        me
    }

    fn best_split(&self, idx: &[usize], impurity: f64) -> Option<BestSplit> {
        let n = idx.len();
        let mut order = idx.to_vec();
        let mut best: Option<BestSplit> = None;

        for f in 0..self.x.ncols() {
            let x = self.x;
            order.sort_by(|&a, &b| x[(a, f)].total_cmp(&x[(b, f)]));
            let total: f64 = order.iter().map(|&i| self.y[i]).sum();
            let total_sq: f64 = order.iter().map(|&i| self.y[i] * self.y[i]).sum();

            let (mut sum_l, mut sq_l) = (0.0, 0.0);
            for k in 1..n {
                let yi = self.y[order[k - 1]];
                sum_l += yi;
                sq_l += yi * yi;
                let (lo, hi) = (x[(order[k - 1], f)], x[(order[k], f)]);
                if lo >= hi {
                    continue;
                }
                let (nl, nr) = (k as f64, (n - k) as f64);
                let sum_r = total - sum_l;
                let children = (sq_l - sum_l * sum_l / nl) + ((total_sq - sq_l) - sum_r * sum_r / nr);
                let gain = impurity - children;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some(BestSplit { feature: f, threshold, gain });
                }
            }
        }
        best
    }
}

impl RegressionTree {
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                Node::Leaf(v) => return v,
                Node::Split { feature, threshold, left, right } => {
                    at = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }
}

// ---------------------------------------------------------------------------
// Forest
// ---------------------------------------------------------------------------

/// Hyper-parameters for [`RandomForest`]. Fitting is deterministic for a given seed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForestParams {
    n_trees: usize,
    seed: u64,
    min_samples_split: usize,
    max_depth: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams { n_trees: 100, seed: 42, min_samples_split: 2, max_depth: None }
    }
}

impl ForestParams {
    pub fn new(n_trees: usize, seed: u64) -> Self {
        ForestParams { n_trees, seed, ..Default::default() }
    }

    pub fn min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn n_trees(&self) -> usize {
        self.n_trees
    }
}

/// Bootstrap-aggregated regression trees. Prediction is the mean over trees.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    importances: Array1<f64>,
}

impl RandomForest {
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Mean decrease in squared error per feature, summing to 1 unless no tree split.
    pub fn feature_importances(&self) -> &Array1<f64> {
        &self.importances
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        total / self.trees.len() as f64
    }
}

fn normalized(mut v: Array1<f64>) -> Array1<f64> {
    let total = v.sum();
    if total > 0.0 {
        v /= total;
    }
    v
}

impl Fit<Array2<f64>, Array1<f64>, RiskError> for ForestParams {
    type Object = RandomForest;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<f64>>) -> Result<RandomForest> {
        let x = dataset.records();
        let y = dataset.targets();
        let n = x.nrows();
        if self.n_trees == 0 {
            return Err(linfa::Error::Parameters("forest needs at least one tree".into()).into());
        }
        if n == 0 {
            return Err(RiskError::InsufficientData("no training rows".into()));
        }
        if y.len() != n {
            return Err(linfa::Error::Parameters(format!("{} rows but {} targets", n, y.len())).into());
        }

        let mut master = StdRng::seed_from_u64(self.seed);
        let mut trees = Vec::with_capacity(self.n_trees);
        let mut importances = Array1::<f64>::zeros(x.ncols());

        for t in 0..self.n_trees {
            let mut rng = StdRng::seed_from_u64(master.random::<u64>());
            let mut sample: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();

            let mut grower = Grower {
                x,
                y,
                min_samples_split: self.min_samples_split.max(2),
                max_depth: self.max_depth,
                nodes: Vec::new(),
                importances: vec![0.0; x.ncols()],
            };
            grower.grow(&mut sample, 0);
            debug!("tree {}: {} nodes", t, grower.nodes.len());

            importances += &normalized(Array1::from(grower.importances));
            trees.push(RegressionTree { nodes: grower.nodes });
        }

        Ok(RandomForest { trees, importances: normalized(importances) })
    }
}

impl PredictInplace<Array2<f64>, Array1<f64>> for RandomForest {
    fn predict_inplace<'a>(&'a self, x: &'a Array2<f64>, y: &mut Array1<f64>) {
        assert_eq!(x.nrows(), y.len(), "number of rows and predictions must match");
        for (row, out) in x.rows().into_iter().zip(y.iter_mut()) {
            *out = self.predict_row(row);
        }
    }

    fn default_target(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}

// ---------------------------------------------------------------------------
// Risk model
// ---------------------------------------------------------------------------

/// Predicted grade and what it implies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskScore {
    pub predicted_g3: f64,
    pub risk_probability: f64,
    pub at_risk: bool,
}

impl RiskScore {
    pub fn from_prediction(predicted_g3: f64) -> Self {
        RiskScore {
            predicted_g3,
            risk_probability: risk_probability(predicted_g3),
            at_risk: is_at_risk(predicted_g3),
        }
    }

    pub fn is_high_risk(&self) -> bool {
        self.risk_probability >= HIGH_RISK
    }
}

/// A score bound to the student it was computed for.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment<'a> {
    pub student: &'a StudentRecord,
    #[serde(flatten)]
    pub score: RiskScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// A forest fitted on one cohort, together with the schema its inputs must follow.
pub struct RiskModel {
    schema: EncodingSchema,
    forest: RandomForest,
    cohort_size: usize,
}

/// Fit a fresh model on a cohort.
/// input: cohort records, forest parameters
/// output: the fitted model or why it could not be fitted
/// logic: encode (empty cohort fails); refuse fewer than two rows or a constant final grade;
/// fit the forest on the encoded matrix against G3
pub fn train(cohort: &[&StudentRecord], params: &ForestParams) -> Result<RiskModel> {
    let (matrix, schema) = fit_encode(cohort)?;
    if cohort.len() < 2 {
        return Err(RiskError::InsufficientData(format!(
            "cohort has {} student, need at least 2",
            cohort.len()
        )));
    }
    let first = matrix.y[0];
    if matrix.y.iter().all(|&g| g == first) {
        return Err(RiskError::InsufficientData(format!(
            "every student in the cohort has final grade {}",
            first
        )));
    }

    info!(
        "fitting {} trees on {} students x {} features",
        params.n_trees(),
        cohort.len(),
        schema.len()
    );
    let forest = params.fit(&Dataset::new(matrix.x, matrix.y))?;
    let nodes: usize = forest.trees().iter().map(|t| t.n_nodes()).sum();
    debug!("forest holds {} nodes", nodes);
    Ok(RiskModel { schema, forest, cohort_size: cohort.len() })
}

impl RiskModel {
    pub fn schema(&self) -> &EncodingSchema {
        &self.schema
    }

    pub fn cohort_size(&self) -> usize {
        self.cohort_size
    }

    /// Predicted final grades for each record, in input order.
    pub fn predict_grades(&self, records: &[&StudentRecord]) -> Array1<f64> {
        let mut x = Array2::<f64>::zeros((records.len(), self.schema.len()));
        for (mut row, r) in x.rows_mut().into_iter().zip(records) {
            row.assign(&align_encode(&r.features(), &self.schema).values);
        }
        self.forest.predict(&x)
    }

    pub fn assess_cohort<'a>(&self, records: &[&'a StudentRecord]) -> Vec<RiskAssessment<'a>> {
        self.predict_grades(records)
            .iter()
            .zip(records)
            .map(|(&g, &student)| RiskAssessment { student, score: RiskScore::from_prediction(g) })
            .collect()
    }

    /// Scores a row encoded elsewhere. The row must carry this model's schema.
    pub fn assess_row(&self, row: &EncodedRow) -> Result<RiskScore> {
        if row.schema_id != self.schema.fingerprint() || row.values.len() != self.schema.len() {
            return Err(RiskError::SchemaMismatch {
                expected: self.schema.fingerprint(),
                found: row.schema_id,
            });
        }
        let x = row.values.view().insert_axis(Axis(0)).to_owned();
        let predicted: Array1<f64> = self.forest.predict(&x);
        Ok(RiskScore::from_prediction(predicted[0]))
    }

    /// What-if assessment for a single hypothetical student.
    pub fn assess_profile(&self, profile: &StudentProfile) -> Result<RiskScore> {
        self.assess_row(&align_encode(&profile.features(), &self.schema))
    }

    /// Per-column importance, ascending.
    pub fn importances(&self) -> Vec<FeatureImportance> {
        let mut out: Vec<FeatureImportance> = self
            .schema
            .columns()
            .iter()
            .zip(self.forest.feature_importances())
            .map(|(c, &v)| FeatureImportance { feature: c.clone(), importance: v })
            .collect();
        out.sort_by(|a, b| a.importance.total_cmp(&b.importance).then_with(|| a.feature.cmp(&b.feature)));
        out
    }
}
