//! Histogram gradient-boosted trees with logistic loss
//!
//! Features are bucketed once into at most `max_bin` quantile bins. Each
//! boosting round grows one regression tree leaf-wise: the leaf with the
//! largest split gain is split next until `num_leaves` is reached or no split
//! satisfies `min_data_in_leaf`. Split search runs over features in parallel.
//!
//! # Checkpoint format
//!
//! ```json
//! {
//!   "model_type": "gradient_boosted",
//!   "feature_names": ["close", "..."],
//!   "n_features": 42,
//!   "learning_rate": 0.2,
//!   "init_value": -0.05,
//!   "feature_importance": { "close": 0.12, "...": 0.01 },
//!   "trees": [{ "nodes": [{"feature": 0, "threshold": 1.5, "left": 1, "right": 2, "value": null}, ...] }]
//! }
//! ```
//!
//! Feature importance is each feature's share of all splits, so the values
//! sum to one once any split was made.

use super::metrics::log_loss;
use super::{Classifier, Dataset, ModelError};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct GbmParams {
    pub num_iterations: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_bin: usize,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian_in_leaf: f64,
    pub lambda_l2: f64,
    pub early_stopping_rounds: usize,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            num_iterations: 500,
            learning_rate: 0.2,
            num_leaves: 2500,
            max_bin: 205,
            min_data_in_leaf: 210,
            min_sum_hessian_in_leaf: 1e-3,
            lambda_l2: 0.0,
            early_stopping_rounds: 10,
        }
    }
}

/// A single node of a regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionNode {
    /// Feature index to split on (-1 for leaf nodes)
    pub feature: i32,
    /// Rows with `x <= threshold` go left
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    /// Raw score contribution of a leaf, already scaled by the learning rate
    pub value: Option<f64>,
}

impl RegressionNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: -1,
            threshold: 0.0,
            left: -1,
            right: -1,
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<RegressionNode>,
}

impl Tree {
    fn predict(&self, row: ArrayView1<f32>) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.feature < 0 {
                return node.value.unwrap_or(0.0);
            }
            let x = f64::from(row[node.feature as usize]);
            idx = if x.is_nan() || x <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GbmCheckpoint {
    model_type: String,
    feature_names: Vec<String>,
    n_features: usize,
    learning_rate: f64,
    init_value: f64,
    #[serde(default)]
    feature_importance: HashMap<String, f64>,
    trees: Vec<Tree>,
}

/// Upper bin edges per feature; a value falls in the first bin whose edge is >= it
#[derive(Debug, Clone)]
struct BinMapper {
    edges: Vec<Vec<f64>>,
}

impl BinMapper {
    fn fit(x: &Array2<f32>, max_bin: usize) -> Self {
        let edges = (0..x.ncols())
            .into_par_iter()
            .map(|j| {
                let mut values: Vec<f64> = x.column(j).iter().map(|v| f64::from(*v)).collect();
                values.sort_by(f64::total_cmp);
                let mut distinct = values.clone();
                distinct.dedup();
                if distinct.len() <= max_bin {
                    distinct
                        .windows(2)
                        .map(|w| (w[0] + w[1]) / 2.0)
                        .collect::<Vec<_>>()
                } else {
                    let mut cuts: Vec<f64> = (1..max_bin)
                        .map(|k| values[k * values.len() / max_bin])
                        .collect();
                    cuts.dedup();
                    // the largest value must stay in the last bin
                    cuts.retain(|c| *c < values[values.len() - 1]);
                    cuts
                }
            })
            .collect();
        Self { edges }
    }

    fn bin(&self, feature: usize, value: f64) -> u16 {
        self.edges[feature].partition_point(|edge| *edge < value) as u16
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    /// Column-major bin indices
    fn transform(&self, x: &Array2<f32>) -> Vec<Vec<u16>> {
        (0..x.ncols())
            .into_par_iter()
            .map(|j| x.column(j).iter().map(|v| self.bin(j, f64::from(*v))).collect())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct LeafState {
    node: usize,
    rows: Vec<usize>,
    sum_g: f64,
    sum_h: f64,
    best: Option<Split>,
}

struct TreeBuilder<'a> {
    params: &'a GbmParams,
    bins: &'a [Vec<u16>],
    mapper: &'a BinMapper,
    grad: &'a [f64],
    hess: &'a [f64],
}

impl TreeBuilder<'_> {
    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda_l2)
    }

    fn best_split(&self, rows: &[usize], sum_g: f64, sum_h: f64) -> Option<Split> {
        let min_data = self.params.min_data_in_leaf.max(1);
        if rows.len() < 2 * min_data {
            return None;
        }
        let parent = self.score(sum_g, sum_h);
        (0..self.bins.len())
            .into_par_iter()
            .filter_map(|feature| {
                let n_bins = self.mapper.n_bins(feature);
                if n_bins < 2 {
                    return None;
                }
                let mut hist = vec![(0.0f64, 0.0f64, 0usize); n_bins];
                let column = &self.bins[feature];
                for &r in rows {
                    let cell = &mut hist[column[r] as usize];
                    cell.0 += self.grad[r];
                    cell.1 += self.hess[r];
                    cell.2 += 1;
                }

                let (mut gl, mut hl, mut nl) = (0.0f64, 0.0f64, 0usize);
                let mut best: Option<Split> = None;
                for (bin, (g, h, n)) in hist.iter().enumerate().take(n_bins - 1) {
                    gl += g;
                    hl += h;
                    nl += n;
                    let nr = rows.len() - nl;
                    if nl < min_data || nr < min_data {
                        continue;
                    }
                    let hr = sum_h - hl;
                    if hl < self.params.min_sum_hessian_in_leaf || hr < self.params.min_sum_hessian_in_leaf {
                        continue;
                    }
                    let gain = self.score(gl, hl) + self.score(sum_g - gl, hr) - parent;
                    if gain > best.map_or(1e-12, |b| b.gain) {
                        best = Some(Split { feature, bin, gain });
                    }
                }
                best
            })
            .max_by(|a, b| {
                a.gain
                    .total_cmp(&b.gain)
                    .then_with(|| b.feature.cmp(&a.feature))
            })
    }

    fn leaf(&self, node: usize, rows: Vec<usize>) -> LeafState {
        let sum_g = rows.iter().map(|&r| self.grad[r]).sum();
        let sum_h = rows.iter().map(|&r| self.hess[r]).sum();
        let best = self.best_split(&rows, sum_g, sum_h);
        LeafState {
            node,
            rows,
            sum_g,
            sum_h,
            best,
        }
    }

    fn build(&self, n_rows: usize, split_counts: &mut [usize]) -> Tree {
        let mut nodes = vec![RegressionNode::leaf(0.0)];
        let mut leaves = vec![self.leaf(0, (0..n_rows).collect())];

        while leaves.len() < self.params.num_leaves {
            let candidate = leaves
                .iter()
                .enumerate()
                .filter_map(|(i, l)| l.best.map(|s| (i, s)))
                .max_by(|a, b| a.1.gain.total_cmp(&b.1.gain).then_with(|| b.0.cmp(&a.0)));
            let Some((index, split)) = candidate else {
                break;
            };

            let parent = leaves.swap_remove(index);
            let column = &self.bins[split.feature];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = parent
                .rows
                .iter()
                .partition(|&&r| column[r] as usize <= split.bin);

            let left = nodes.len();
            nodes.push(RegressionNode::leaf(0.0));
            nodes.push(RegressionNode::leaf(0.0));
            nodes[parent.node] = RegressionNode {
                feature: split.feature as i32,
                threshold: self.mapper.edges[split.feature][split.bin],
                left: left as i32,
                right: left as i32 + 1,
                value: None,
            };
            split_counts[split.feature] += 1;

            leaves.push(self.leaf(left, left_rows));
            leaves.push(self.leaf(left + 1, right_rows));
        }

        for leaf in &leaves {
            let value = -leaf.sum_g / (leaf.sum_h + self.params.lambda_l2).max(1e-12);
            nodes[leaf.node] = RegressionNode::leaf(value * self.params.learning_rate);
        }
        Tree { nodes }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone)]
pub struct GradientBoostedTrees {
    params: GbmParams,
    feature_names: Vec<String>,
    init_value: f64,
    trees: Vec<Tree>,
    feature_importance: HashMap<String, f64>,
    fitted: bool,
}

impl GradientBoostedTrees {
    pub fn new(params: GbmParams) -> Self {
        Self {
            params,
            feature_names: Vec::new(),
            init_value: 0.0,
            trees: Vec::new(),
            feature_importance: HashMap::new(),
            fitted: false,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Share of splits made on each feature
    pub fn feature_importance(&self) -> &HashMap<String, f64> {
        &self.feature_importance
    }

    /// The `n` most used features, highest share first
    pub fn top_features(&self, n: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_importance
            .iter()
            .filter(|(_, share)| **share > 0.0)
            .map(|(name, share)| (name.clone(), *share))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let checkpoint: GbmCheckpoint = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self {
            params: GbmParams {
                learning_rate: checkpoint.learning_rate,
                ..GbmParams::default()
            },
            feature_names: checkpoint.feature_names,
            init_value: checkpoint.init_value,
            trees: checkpoint.trees,
            feature_importance: checkpoint.feature_importance,
            fitted: true,
        })
    }

    fn raw_score(&self, row: ArrayView1<f32>) -> f64 {
        self.init_value + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    fn set_importance(&mut self, split_counts: &[usize]) {
        let total = split_counts.iter().sum::<usize>().max(1) as f64;
        self.feature_importance = self
            .feature_names
            .iter()
            .cloned()
            .zip(split_counts.iter().map(|count| *count as f64 / total))
            .collect();
        for (name, share) in self.top_features(30) {
            info!("feature importance {}: {:.4}", name, share);
        }
    }
}

impl Classifier for GradientBoostedTrees {
    fn name(&self) -> &'static str {
        "gbm"
    }

    fn fit(&mut self, train: &Dataset, valid: &Dataset, feature_names: &[String]) -> Result<(), ModelError> {
        if train.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        let n_features = train.x.ncols();
        self.feature_names = if feature_names.len() == n_features {
            feature_names.to_vec()
        } else {
            (0..n_features).map(|j| format!("f{}", j)).collect()
        };

        let y: Vec<f64> = train.y.iter().map(|v| f64::from(*v)).collect();
        let mean = (y.iter().sum::<f64>() / y.len() as f64).clamp(1e-6, 1.0 - 1e-6);
        self.init_value = (mean / (1.0 - mean)).ln();
        self.trees.clear();

        let mapper = BinMapper::fit(&train.x, self.params.max_bin.max(2));
        let bins = mapper.transform(&train.x);
        debug!("binned {} features", bins.len());

        let mut train_raw = vec![self.init_value; y.len()];
        let mut valid_raw = vec![self.init_value; valid.len()];
        let mut split_counts = vec![0usize; n_features];
        let mut best = (f64::INFINITY, 0usize);
        let valid_y = valid.y.to_vec();

        for iteration in 0..self.params.num_iterations {
            let (grad, hess): (Vec<f64>, Vec<f64>) = train_raw
                .iter()
                .zip(&y)
                .map(|(raw, label)| {
                    let p = sigmoid(*raw);
                    (p - label, (p * (1.0 - p)).max(1e-16))
                })
                .unzip();

            let builder = TreeBuilder {
                params: &self.params,
                bins: &bins,
                mapper: &mapper,
                grad: &grad,
                hess: &hess,
            };
            let tree = builder.build(y.len(), &mut split_counts);

            for (i, row) in train.x.outer_iter().enumerate() {
                train_raw[i] += tree.predict(row);
            }
            for (i, row) in valid.x.outer_iter().enumerate() {
                valid_raw[i] += tree.predict(row);
            }
            self.trees.push(tree);

            if valid.is_empty() {
                continue;
            }
            let probs: Vec<f32> = valid_raw.iter().map(|r| sigmoid(*r) as f32).collect();
            let loss = log_loss(&valid_y, &probs);
            debug!("[{}] valid binary_logloss: {:.6}", iteration + 1, loss);

            if loss < best.0 {
                best = (loss, iteration);
            } else if iteration - best.1 >= self.params.early_stopping_rounds {
                info!(
                    "Early stopping, best iteration is [{}] binary_logloss: {:.6}",
                    best.1 + 1,
                    best.0
                );
                break;
            }
        }

        if !valid.is_empty() {
            self.trees.truncate(best.1 + 1);
        }
        self.fitted = true;
        info!("trained {} trees", self.trees.len());
        self.set_importance(&split_counts);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f32>) -> Result<Array1<f32>, ModelError> {
        if !self.fitted {
            return Err(ModelError::NotFitted);
        }
        if x.ncols() != self.feature_names.len() {
            return Err(ModelError::FeatureCount {
                expected: self.feature_names.len(),
                actual: x.ncols(),
            });
        }
        let probs: Vec<f32> = (0..x.nrows())
            .into_par_iter()
            .map(|i| sigmoid(self.raw_score(x.row(i))) as f32)
            .collect();
        Ok(Array1::from(probs))
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        let checkpoint = GbmCheckpoint {
            model_type: "gradient_boosted".to_string(),
            feature_names: self.feature_names.clone(),
            n_features: self.feature_names.len(),
            learning_rate: self.params.learning_rate,
            init_value: self.init_value,
            feature_importance: self.feature_importance.clone(),
            trees: self.trees.clone(),
        };
        fs::write(path, serde_json::to_string(&checkpoint)?)?;
        info!("💾 saved {} trees to {}", self.trees.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metrics::roc_auc;

    fn small_params() -> GbmParams {
        GbmParams {
            num_iterations: 30,
            num_leaves: 4,
            min_data_in_leaf: 2,
            ..GbmParams::default()
        }
    }

    /// Label is 1 when the first feature exceeds 0.5; the second is noise
    fn dataset(n: usize, offset: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            let k = i + offset;
            if j == 0 {
                (k % 10) as f32 / 10.0
            } else {
                ((k * 7) % 5) as f32
            }
        });
        let y = x.column(0).mapv(|v| if v > 0.5 { 1.0 } else { 0.0 });
        Dataset { x, y }
    }

    #[test]
    fn test_learns_threshold_rule() {
        let train = dataset(80, 0);
        let valid = dataset(20, 3);
        let mut model = GradientBoostedTrees::new(small_params());
        model
            .fit(&train, &valid, &["signal".to_string(), "noise".to_string()])
            .unwrap();

        let probs = model.predict_proba(&valid.x).unwrap();
        let auc = roc_auc(valid.y.as_slice().unwrap(), probs.as_slice().unwrap());
        assert!(auc > 0.99, "auc = {auc}");
        assert!(model.n_trees() >= 1 && model.n_trees() <= 30);
    }

    #[test]
    fn test_min_data_in_leaf_blocks_splits() {
        let train = dataset(20, 0);
        let mut model = GradientBoostedTrees::new(GbmParams {
            num_iterations: 3,
            ..GbmParams::default()
        });
        model.fit(&train, &dataset(10, 0), &[]).unwrap();

        // every tree is a single leaf, so all rows share one probability
        let probs = model.predict_proba(&train.x).unwrap();
        assert!(probs.iter().all(|p| (p - probs[0]).abs() < 1e-6));
        assert!(model.trees.iter().all(|t| t.nodes.len() == 1));
    }

    #[test]
    fn test_checkpoint_reload_predicts_identically() {
        let train = dataset(60, 0);
        let valid = dataset(20, 1);
        let mut model = GradientBoostedTrees::new(small_params());
        model.fit(&train, &valid, &[]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();
        let reloaded = GradientBoostedTrees::load(&path).unwrap();

        let before = model.predict_proba(&valid.x).unwrap();
        let after = reloaded.predict_proba(&valid.x).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_importance_ranks_the_signal_feature() {
        let mut model = GradientBoostedTrees::new(small_params());
        model
            .fit(&dataset(80, 0), &dataset(20, 3), &["signal".to_string(), "noise".to_string()])
            .unwrap();

        let top = model.top_features(2);
        assert_eq!(top[0].0, "signal");
        let total: f64 = model.feature_importance().values().sum();
        assert!((total - 1.0).abs() < 1e-9, "total = {total}");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();
        let reloaded = GradientBoostedTrees::load(&path).unwrap();
        let reloaded_top = reloaded.top_features(2);
        assert_eq!(reloaded_top.len(), top.len());
        for ((name, share), (expected_name, expected_share)) in reloaded_top.iter().zip(&top) {
            assert_eq!(name, expected_name);
            assert!((share - expected_share).abs() < 1e-12);
        }
    }

    #[test]
    fn test_predict_requires_fit_and_matching_width() {
        let model = GradientBoostedTrees::new(small_params());
        assert!(matches!(
            model.predict_proba(&Array2::zeros((1, 2))),
            Err(ModelError::NotFitted)
        ));

        let mut model = GradientBoostedTrees::new(small_params());
        model.fit(&dataset(40, 0), &dataset(10, 0), &[]).unwrap();
        assert!(matches!(
            model.predict_proba(&Array2::zeros((1, 3))),
            Err(ModelError::FeatureCount { expected: 2, actual: 3 })
        ));
    }
}
