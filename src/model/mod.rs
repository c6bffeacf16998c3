//! Binary classifiers over the linked feature matrix
//!
//! The aggregated frame and its side block are densified into one `f32`
//! matrix ordered by market id. Training data is split 80/20 in id order (no
//! shuffling across the boundary) and handed to a [`Classifier`]; predicted
//! probabilities are turned into confidences with `2p - 1`.

pub mod gbm;
pub mod metrics;
pub mod mlp;

pub use gbm::{GbmParams, GradientBoostedTrees};
pub use mlp::{MlpParams, NeuralNetwork};

use crate::config::ModelKind;
use crate::features::BinaryMatrix;
use crate::frame::{Column, Frame, FrameError};
use crate::schema::{CONFIDENCE, MARKET_ID};
use log::info;
use ndarray::{s, Array1, Array2};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("column {column} has {null_count} missing values")]
    Missing { column: String, null_count: usize },

    #[error("column {column} has non-numeric dtype {dtype}")]
    NonNumeric { column: String, dtype: String },

    #[error("side block has {actual} rows, frame has {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("matrix has {actual} features, model was fitted on {expected}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("model is not fitted")]
    NotFitted,

    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Features and labels for one side of the split
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f32>,
    pub y: Array1<f32>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// Dense model input in ascending id order
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub x: Array2<f32>,
    pub ids: Vec<i32>,
    pub feature_names: Vec<String>,
    /// Source frame row of each matrix row
    pub rows: Vec<usize>,
}

pub trait Classifier {
    fn name(&self) -> &'static str;

    /// Train on `train`, early stopping on `valid`
    fn fit(&mut self, train: &Dataset, valid: &Dataset, feature_names: &[String]) -> Result<(), ModelError>;

    /// Probability of the positive class per row
    fn predict_proba(&self, x: &Array2<f32>) -> Result<Array1<f32>, ModelError>;

    fn save(&self, path: &Path) -> Result<(), ModelError>;
}

pub fn build(kind: ModelKind) -> Box<dyn Classifier> {
    match kind {
        ModelKind::Gbm => Box::new(GradientBoostedTrees::new(GbmParams::default())),
        ModelKind::Mlp => Box::new(NeuralNetwork::new(MlpParams::default())),
    }
}

fn missing_count(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_none()).count()
}

fn numeric_values(column: &Column) -> Result<Vec<Option<f64>>, ModelError> {
    column.f64s().map_err(|_| ModelError::NonNumeric {
        column: column.name().to_string(),
        dtype: column.dtype().to_string(),
    })
}

/// Densify every feature column (all but id and label) plus the side block
///
/// Any missing value is an error naming the column.
pub fn to_x(frame: &Frame, side: &BinaryMatrix, side_names: &[String]) -> Result<DesignMatrix, ModelError> {
    if side.n_rows() != frame.height() {
        return Err(ModelError::ShapeMismatch {
            expected: frame.height(),
            actual: side.n_rows(),
        });
    }

    let id_column = frame.column(MARKET_ID)?;
    if id_column.null_count() > 0 {
        return Err(ModelError::Missing {
            column: MARKET_ID.to_string(),
            null_count: id_column.null_count(),
        });
    }
    let raw_ids = id_column.i32s()?;
    let mut rows: Vec<usize> = (0..frame.height()).collect();
    rows.sort_by_key(|&r| raw_ids[r]);
    let ids: Vec<i32> = rows.iter().map(|&r| raw_ids[r].unwrap_or_default()).collect();

    let columns: Vec<&Column> = frame
        .columns()
        .iter()
        .filter(|c| c.name() != MARKET_ID && c.name() != CONFIDENCE)
        .collect();
    let offset = columns.len();

    let mut x = Array2::<f32>::zeros((rows.len(), offset + side.n_cols()));
    for (j, column) in columns.iter().enumerate() {
        let values = numeric_values(column)?;
        let null_count = missing_count(&values);
        if null_count > 0 {
            return Err(ModelError::Missing {
                column: column.name().to_string(),
                null_count,
            });
        }
        for (i, &r) in rows.iter().enumerate() {
            x[[i, j]] = values[r].unwrap_or_default() as f32;
        }
    }
    for (i, &r) in rows.iter().enumerate() {
        for &c in side.row(r) {
            x[[i, offset + c as usize]] = 1.0;
        }
    }

    let mut feature_names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
    feature_names.extend(side_names.iter().cloned());
    info!("design matrix: {} rows x {} features", x.nrows(), x.ncols());

    Ok(DesignMatrix {
        x,
        ids,
        feature_names,
        rows,
    })
}

/// Design matrix plus `confidence` labels in the same row order
pub fn to_x_y(
    frame: &Frame,
    side: &BinaryMatrix,
    side_names: &[String],
) -> Result<(DesignMatrix, Array1<f32>), ModelError> {
    let labels = numeric_values(frame.column(CONFIDENCE)?)?;
    let null_count = missing_count(&labels);
    if null_count > 0 {
        return Err(ModelError::Missing {
            column: CONFIDENCE.to_string(),
            null_count,
        });
    }
    let design = to_x(frame, side, side_names)?;
    let y = design
        .rows
        .iter()
        .map(|&r| labels[r].unwrap_or_default() as f32)
        .collect();
    Ok((design, y))
}

/// First 80% of rows (id order) train, the rest validate
pub fn split(x: &Array2<f32>, y: &Array1<f32>) -> Result<(Dataset, Dataset), ModelError> {
    let n = y.len();
    if n < 2 {
        return Err(ModelError::EmptyDataset);
    }
    let cut = ((n as f64 * 0.8) as usize).clamp(1, n - 1);
    let train = Dataset {
        x: x.slice(s![..cut, ..]).to_owned(),
        y: y.slice(s![..cut]).to_owned(),
    };
    let valid = Dataset {
        x: x.slice(s![cut.., ..]).to_owned(),
        y: y.slice(s![cut..]).to_owned(),
    };
    info!("train size: {}, valid size: {}", train.len(), valid.len());
    Ok((train, valid))
}

/// Build the matrix, split it and fit `model`
pub fn create_dataset_and_train(
    model: &mut dyn Classifier,
    frame: &Frame,
    side: &BinaryMatrix,
    side_names: &[String],
) -> Result<DesignMatrix, ModelError> {
    let (design, y) = to_x_y(frame, side, side_names)?;
    let (train, valid) = split(&design.x, &y)?;
    model.fit(&train, &valid, &design.feature_names)?;
    Ok(design)
}

/// Map a probability to a confidence in [-1, 1]
pub fn to_confidence(p: f32) -> f32 {
    p * 2.0 - 1.0
}
