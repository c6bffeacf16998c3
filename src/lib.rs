//! newsflow: market/news linkage, feature extraction and a binary classifier
//! for next-period asset direction.
//!
//! Training links every market row to the news published for its asset, folds
//! the pairs back into one row per market id and fits a classifier on the
//! resulting features. Prediction replays the same fitted stages one trading
//! day at a time.

pub mod config;
pub mod features;
pub mod frame;
pub mod ids;
pub mod linkage;
pub mod loader;
pub mod model;
pub mod prep;
pub mod preprocess;
pub mod runner;
pub mod schema;
pub mod snapshot;
pub mod streaming;
pub mod timing;

use thiserror::Error;

/// Top-level error returned by the runner and the binaries
#[derive(Debug, Error)]
pub enum NewsflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Load error: {0}")]
    Load(#[from] loader::LoadError),

    #[error("Frame error: {0}")]
    Frame(#[from] frame::FrameError),

    #[error("Id error: {0}")]
    Id(#[from] ids::IdError),

    #[error("Linkage error: {0}")]
    Link(#[from] linkage::LinkError),

    #[error("Feature error: {0}")]
    Feature(#[from] features::FeatureError),

    #[error("Model error: {0}")]
    Model(#[from] model::ModelError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] snapshot::SnapshotError),

    #[error("{date}: produced {actual} predictions for {expected} template rows")]
    PredictionMismatch {
        date: chrono::NaiveDate,
        expected: usize,
        actual: usize,
    },
}
