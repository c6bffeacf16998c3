//! Feed-forward binary classifier
//!
//! Each hidden block is `Linear → BatchNorm → ReLU → Dropout`; the output is
//! one sigmoid unit trained with binary cross entropy and Adam (L2 weight
//! decay added to the gradient). Weights use Xavier-uniform initialisation with
//! zero biases. After every epoch the validation ROC-AUC is computed; the best
//! state is kept and restored once `patience` epochs pass without improvement.

use super::metrics::{log_loss, roc_auc};
use super::{Classifier, Dataset, ModelError};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, Zip};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const BN_EPS: f32 = 1e-5;
const BN_MOMENTUM: f32 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct MlpParams {
    pub hidden: Vec<usize>,
    pub dropout: f32,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub epochs: usize,
    pub train_batch_size: usize,
    pub valid_batch_size: usize,
    pub patience: usize,
    pub seed: u64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden: vec![128, 64, 16],
            dropout: 0.4,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            epochs: 50,
            train_batch_size: 100,
            valid_batch_size: 300,
            patience: 10,
            seed: 10,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dense {
    /// (fan_in, fan_out)
    w: Array2<f32>,
    b: Array1<f32>,
}

impl Dense {
    fn new(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        Self {
            w: Array2::from_shape_fn((fan_in, fan_out), |_| rng.sample(dist)),
            b: Array1::zeros(fan_out),
        }
    }

    fn forward(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.w) + &self.b
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
}

impl BatchNorm {
    fn new(features: usize) -> Self {
        Self {
            gamma: Array1::ones(features),
            beta: Array1::zeros(features),
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
        }
    }

    /// Normalise with batch statistics; returns (output, xhat, 1/std)
    fn forward_train(&mut self, z: &Array2<f32>) -> (Array2<f32>, Array2<f32>, Array1<f32>) {
        let n = z.nrows() as f32;
        let width = z.ncols();
        let mean = z.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(width));
        let centered = z - &mean;
        let var = centered
            .mapv(|v| v * v)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(width));
        let inv_std = var.mapv(|v| 1.0 / (v + BN_EPS).sqrt());
        let xhat = &centered * &inv_std;
        let out = &xhat * &self.gamma + &self.beta;

        let unbiased = if n > 1.0 { &var * (n / (n - 1.0)) } else { var };
        self.running_mean = &self.running_mean * (1.0 - BN_MOMENTUM) + &mean * BN_MOMENTUM;
        self.running_var = &self.running_var * (1.0 - BN_MOMENTUM) + &unbiased * BN_MOMENTUM;
        (out, xhat, inv_std)
    }

    fn forward_eval(&self, z: &Array2<f32>) -> Array2<f32> {
        let inv_std = self.running_var.mapv(|v| 1.0 / (v + BN_EPS).sqrt());
        (z - &self.running_mean) * &inv_std * &self.gamma + &self.beta
    }

    fn backward(
        &self,
        dy: &Array2<f32>,
        xhat: &Array2<f32>,
        inv_std: &Array1<f32>,
        grad: &mut BatchNorm,
    ) -> Array2<f32> {
        let n = dy.nrows() as f32;
        grad.beta = dy.sum_axis(Axis(0));
        grad.gamma = (dy * xhat).sum_axis(Axis(0));

        let dxhat = dy * &self.gamma;
        let sum_dxhat = dxhat.sum_axis(Axis(0));
        let sum_dxhat_xhat = (&dxhat * xhat).sum_axis(Axis(0));
        (&dxhat * n - &sum_dxhat - &(xhat * &sum_dxhat_xhat)) * &(inv_std / n)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HiddenBlock {
    dense: Dense,
    norm: BatchNorm,
}

struct BlockCache {
    input: Array2<f32>,
    xhat: Array2<f32>,
    inv_std: Array1<f32>,
    /// ReLU gate times the inverted-dropout scale
    mask: Array2<f32>,
}

/// Network weights; gradients and Adam moments reuse the same shape
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MlpState {
    hidden: Vec<HiddenBlock>,
    output: Dense,
}

impl MlpState {
    fn new(n_features: usize, hidden: &[usize], rng: &mut StdRng) -> Self {
        let mut blocks = Vec::with_capacity(hidden.len());
        let mut fan_in = n_features;
        for &width in hidden {
            blocks.push(HiddenBlock {
                dense: Dense::new(fan_in, width, rng),
                norm: BatchNorm::new(width),
            });
            fan_in = width;
        }
        Self {
            hidden: blocks,
            output: Dense::new(fan_in, 1, rng),
        }
    }

    fn zeros_like(&self) -> Self {
        let mut zeros = self.clone();
        for mut tensor in zeros.tensors_mut() {
            tensor.fill(0.0);
        }
        zeros
    }

    fn n_features(&self) -> usize {
        self.hidden
            .first()
            .map_or(self.output.w.nrows(), |b| b.dense.w.nrows())
    }

    /// Trainable tensors in a fixed order
    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = Vec::with_capacity(self.hidden.len() * 4 + 2);
        for block in self.hidden.iter_mut() {
            out.push(block.dense.w.view_mut().into_dyn());
            out.push(block.dense.b.view_mut().into_dyn());
            out.push(block.norm.gamma.view_mut().into_dyn());
            out.push(block.norm.beta.view_mut().into_dyn());
        }
        out.push(self.output.w.view_mut().into_dyn());
        out.push(self.output.b.view_mut().into_dyn());
        out
    }

    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = Vec::with_capacity(self.hidden.len() * 4 + 2);
        for block in &self.hidden {
            out.push(block.dense.w.view().into_dyn());
            out.push(block.dense.b.view().into_dyn());
            out.push(block.norm.gamma.view().into_dyn());
            out.push(block.norm.beta.view().into_dyn());
        }
        out.push(self.output.w.view().into_dyn());
        out.push(self.output.b.view().into_dyn());
        out
    }

    fn forward(&self, x: ArrayView2<f32>) -> Array1<f32> {
        let mut h = x.to_owned();
        for block in &self.hidden {
            let z = block.dense.forward(&h.view());
            h = block.norm.forward_eval(&z).mapv(|v| v.max(0.0));
        }
        self.output.forward(&h.view()).column(0).mapv(sigmoid)
    }

    fn forward_train(
        &mut self,
        x: ArrayView2<f32>,
        dropout: f32,
        rng: &mut StdRng,
    ) -> (Array1<f32>, Vec<BlockCache>, Array2<f32>) {
        let keep = 1.0 - dropout;
        let mut caches = Vec::with_capacity(self.hidden.len());
        let mut h = x.to_owned();
        for block in self.hidden.iter_mut() {
            let z = block.dense.forward(&h.view());
            let (y, xhat, inv_std) = block.norm.forward_train(&z);
            let mask = Array2::from_shape_fn(y.dim(), |idx| {
                if y[idx] > 0.0 && (dropout <= 0.0 || rng.gen::<f32>() >= dropout) {
                    1.0 / keep
                } else {
                    0.0
                }
            });
            let out = &y * &mask;
            caches.push(BlockCache {
                input: h,
                xhat,
                inv_std,
                mask,
            });
            h = out;
        }
        let probs = self.output.forward(&h.view()).column(0).mapv(sigmoid);
        (probs, caches, h)
    }

    /// Gradients of the mean binary cross entropy
    fn backward(
        &self,
        labels: ArrayView1<f32>,
        probs: &Array1<f32>,
        caches: &[BlockCache],
        last: &Array2<f32>,
    ) -> MlpState {
        let mut grads = self.zeros_like();
        let n = probs.len() as f32;
        let dlogit = ((probs - &labels) / n).insert_axis(Axis(1));

        grads.output.w = last.t().dot(&dlogit);
        grads.output.b = dlogit.sum_axis(Axis(0));
        let mut dh = dlogit.dot(&self.output.w.t());

        for ((block, cache), grad) in self
            .hidden
            .iter()
            .zip(caches)
            .zip(grads.hidden.iter_mut())
            .rev()
        {
            let dy = &dh * &cache.mask;
            let dz = block.norm.backward(&dy, &cache.xhat, &cache.inv_std, &mut grad.norm);
            grad.dense.w = cache.input.t().dot(&dz);
            grad.dense.b = dz.sum_axis(Axis(0));
            dh = dz.dot(&block.dense.w.t());
        }
        grads
    }
}

#[derive(Debug, Clone)]
struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: i32,
    m: MlpState,
    v: MlpState,
}

impl Adam {
    fn new(state: &MlpState, lr: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
            t: 0,
            m: state.zeros_like(),
            v: state.zeros_like(),
        }
    }

    fn step(&mut self, params: &mut MlpState, grads: &MlpState) {
        self.t += 1;
        let (lr, b1, b2, eps, wd) = (self.lr, self.beta1, self.beta2, self.eps, self.weight_decay);
        let bc1 = 1.0 - b1.powi(self.t);
        let bc2 = 1.0 - b2.powi(self.t);

        let moments = self.m.tensors_mut().into_iter().zip(self.v.tensors_mut());
        for ((p, g), (m, v)) in params.tensors_mut().into_iter().zip(grads.tensors()).zip(moments) {
            Zip::from(p).and(g).and(m).and(v).for_each(|p, &g, m, v| {
                let g = g + wd * *p;
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr * (*m / bc1) / ((*v / bc2).sqrt() + eps);
            });
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MlpCheckpoint {
    model_type: String,
    feature_names: Vec<String>,
    state: MlpState,
}

#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    params: MlpParams,
    feature_names: Vec<String>,
    state: Option<MlpState>,
}

impl NeuralNetwork {
    pub fn new(params: MlpParams) -> Self {
        Self {
            params,
            feature_names: Vec::new(),
            state: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let checkpoint: MlpCheckpoint = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self {
            params: MlpParams::default(),
            feature_names: checkpoint.feature_names,
            state: Some(checkpoint.state),
        })
    }

    fn predict_batches(&self, state: &MlpState, x: &Array2<f32>) -> Array1<f32> {
        let batch = self.params.valid_batch_size.max(1);
        let mut out = Vec::with_capacity(x.nrows());
        for start in (0..x.nrows()).step_by(batch) {
            let end = (start + batch).min(x.nrows());
            out.extend(state.forward(x.slice(ndarray::s![start..end, ..])).iter());
        }
        Array1::from(out)
    }
}

impl Classifier for NeuralNetwork {
    fn name(&self) -> &'static str {
        "mlp"
    }

    fn fit(&mut self, train: &Dataset, valid: &Dataset, feature_names: &[String]) -> Result<(), ModelError> {
        if train.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        self.feature_names = feature_names.to_vec();

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut state = MlpState::new(train.x.ncols(), &self.params.hidden, &mut rng);
        let mut adam = Adam::new(&state, self.params.learning_rate, self.params.weight_decay);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let valid_y = valid.y.to_vec();

        let mut best: Option<(f64, MlpState)> = None;
        let mut not_improved = 0usize;

        for epoch in 0..self.params.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0f64;
            for chunk in order.chunks(self.params.train_batch_size.max(1)) {
                let x = train.x.select(Axis(0), chunk);
                let y = train.y.select(Axis(0), chunk);
                let (probs, caches, last) = state.forward_train(x.view(), self.params.dropout, &mut rng);
                epoch_loss += log_loss(&y.to_vec(), &probs.to_vec()) * chunk.len() as f64;
                let grads = state.backward(y.view(), &probs, &caches, &last);
                adam.step(&mut state, &grads);
            }

            let probs = self.predict_batches(&state, &valid.x);
            let auc = roc_auc(&valid_y, &probs.to_vec());
            info!(
                "epoch {}: train loss {:.5}, valid auc {:.5}",
                epoch + 1,
                epoch_loss / train.len() as f64,
                auc
            );

            if best.as_ref().map_or(true, |(score, _)| auc > *score) {
                debug!("validation auc improved, keeping state");
                best = Some((auc, state.clone()));
                not_improved = 0;
            } else {
                not_improved += 1;
                if not_improved >= self.params.patience {
                    info!("early stopping at epoch {}", epoch + 1);
                    break;
                }
            }
        }

        let (score, best_state) = best.unwrap_or((0.5, state));
        info!("restored best state, valid auc {:.5}", score);
        self.state = Some(best_state);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f32>) -> Result<Array1<f32>, ModelError> {
        let state = self.state.as_ref().ok_or(ModelError::NotFitted)?;
        if x.ncols() != state.n_features() {
            return Err(ModelError::FeatureCount {
                expected: state.n_features(),
                actual: x.ncols(),
            });
        }
        Ok(self.predict_batches(state, x))
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        let state = self.state.as_ref().ok_or(ModelError::NotFitted)?;
        let checkpoint = MlpCheckpoint {
            model_type: "mlp".to_string(),
            feature_names: self.feature_names.clone(),
            state: state.clone(),
        };
        fs::write(path, serde_json::to_string(&checkpoint)?)?;
        info!("💾 saved network to {}", path.display());
        Ok(())
    }
}
