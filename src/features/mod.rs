//! Feature extraction on the linked market frame
//!
//! Set-valued and free-text news fields become binary side blocks, lag
//! statistics are appended as frame columns, and columns the model cannot
//! consume are dropped. Everything fitted on training data is recorded in a
//! [`FeaturePipeline`] that replays the same steps on every prediction day.
//!
//! # Architecture
//!
//! ```text
//! aggregated market frame
//!     ↓
//! FeatureProducer (audiences, provider, headlineTag, headline, subjects) → BinaryMatrix
//!     ↓
//! FrameMutator::Lag (per-asset rolling stats, rayon pool)
//!     ↓
//! FrameMutator::DropColumns (time, assetCode, removed news fields)
//!     ↓
//! (frame, side block) → model dataset
//! ```

pub mod encoders;
pub mod lag;
pub mod matrix;

pub use encoders::{CountVectorizer, MultiLabelBinarizer};
pub use lag::LagAggregationTransformer;
pub use matrix::BinaryMatrix;

use crate::config::Settings;
use crate::frame::{Frame, FrameError};
use crate::schema::{ASSET_CODE, AUDIENCES, HEADLINE, HEADLINE_TAG, PROVIDER, SUBJECTS, TIME};
use log::info;
use thiserror::Error;

const HEADLINE_MAX_FEATURES: usize = 3000;
const SUBJECTS_MAX_FEATURES: usize = 5000;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("failed to build lag worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("side block has {actual} rows, frame has {expected}")]
    RowMismatch { expected: usize, actual: usize },
}

/// Transformers that rewrite the frame itself
#[derive(Debug, Clone)]
pub enum FrameMutator {
    DropColumns(Vec<String>),
    Lag(LagAggregationTransformer),
}

impl FrameMutator {
    pub fn transform(&mut self, mut frame: Frame) -> Result<Frame, FeatureError> {
        match self {
            FrameMutator::DropColumns(columns) => {
                let names: Vec<&str> = columns.iter().map(String::as_str).collect();
                frame.drop_columns(&names);
                Ok(frame)
            }
            FrameMutator::Lag(lag) => lag.transform(frame),
        }
    }
}

/// Transformers that consume one raw news column and emit a binary block
#[derive(Debug, Clone)]
pub enum FeatureProducer {
    Audiences(MultiLabelBinarizer),
    Provider(MultiLabelBinarizer),
    HeadlineTag(MultiLabelBinarizer),
    Headline(CountVectorizer),
    Subjects(CountVectorizer),
}

impl FeatureProducer {
    pub fn column(&self) -> &'static str {
        match self {
            FeatureProducer::Audiences(_) => AUDIENCES,
            FeatureProducer::Provider(_) => PROVIDER,
            FeatureProducer::HeadlineTag(_) => HEADLINE_TAG,
            FeatureProducer::Headline(_) => HEADLINE,
            FeatureProducer::Subjects(_) => SUBJECTS,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            FeatureProducer::Audiences(e)
            | FeatureProducer::Provider(e)
            | FeatureProducer::HeadlineTag(e) => e.classes().len(),
            FeatureProducer::Headline(v) | FeatureProducer::Subjects(v) => v.vocabulary_len(),
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        (0..self.n_features())
            .map(|i| format!("{}_{}", self.column(), i))
            .collect()
    }

    /// Encode the raw column and release it from the frame
    pub fn transform(&self, frame: &mut Frame) -> Result<BinaryMatrix, FeatureError> {
        let raw = frame.remove_column(self.column())?;
        let cells = raw.strs()?;
        let block = match self {
            FeatureProducer::Audiences(e)
            | FeatureProducer::Provider(e)
            | FeatureProducer::HeadlineTag(e) => e.transform(&cells),
            FeatureProducer::Headline(v) | FeatureProducer::Subjects(v) => v.transform(&cells),
        };
        Ok(block)
    }
}

#[derive(Debug, Clone)]
pub enum FeatureTransformer {
    FrameMutator(FrameMutator),
    FeatureProducer(FeatureProducer),
    NoOp,
}

/// Ordered transformers fitted during training
#[derive(Debug, Clone, Default)]
pub struct FeaturePipeline {
    transformers: Vec<FeatureTransformer>,
}

impl FeaturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transformer: FeatureTransformer) {
        self.transformers.push(transformer);
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Side-block column names, in block order
    pub fn feature_names(&self) -> Vec<String> {
        self.transformers
            .iter()
            .filter_map(|t| match t {
                FeatureTransformer::FeatureProducer(p) => Some(p.feature_names()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Replay every transformer; side blocks are stacked in pipeline order
    pub fn transform(&mut self, mut frame: Frame) -> Result<(Frame, BinaryMatrix), FeatureError> {
        let mut blocks = BinaryMatrix::empty(frame.height());
        for transformer in self.transformers.iter_mut() {
            match transformer {
                FeatureTransformer::FrameMutator(mutator) => frame = mutator.transform(frame)?,
                FeatureTransformer::FeatureProducer(producer) => {
                    let block = producer.transform(&mut frame)?;
                    blocks = blocks.hstack(&block);
                }
                FeatureTransformer::NoOp => {}
            }
        }
        if blocks.n_rows() != frame.height() {
            return Err(FeatureError::RowMismatch {
                expected: frame.height(),
                actual: blocks.n_rows(),
            });
        }
        Ok((frame, blocks))
    }
}

/// Output of the training-time extraction
pub struct ExtractedFeatures {
    pub frame: Frame,
    pub news: BinaryMatrix,
    pub news_feature_names: Vec<String>,
    pub pipeline: FeaturePipeline,
}

/// Encoders fitted on the raw training news, before linkage
#[derive(Debug, Clone)]
pub struct Features {
    audience_encoder: MultiLabelBinarizer,
    provider_encoder: MultiLabelBinarizer,
    headline_tag_encoder: MultiLabelBinarizer,
}

fn categories_of(frame: &Frame, name: &str) -> Result<Vec<String>, FrameError> {
    let mut values: Vec<String> = frame
        .column(name)?
        .strs()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    values.sort();
    values.dedup();
    Ok(values)
}

impl Features {
    pub fn fit(news: &Frame) -> Result<Self, FeatureError> {
        let audiences = news.column(AUDIENCES)?.strs()?;
        Ok(Self {
            audience_encoder: MultiLabelBinarizer::fit_flattened(audiences.into_iter().flatten()),
            provider_encoder: MultiLabelBinarizer::fit(categories_of(news, PROVIDER)?),
            headline_tag_encoder: MultiLabelBinarizer::fit(categories_of(news, HEADLINE_TAG)?),
        })
    }

    /// Extract training features and record the pipeline that replays them
    pub fn post_merge_feature_extraction(
        &self,
        settings: &Settings,
        mut frame: Frame,
    ) -> Result<ExtractedFeatures, FeatureError> {
        let mut pipeline = FeaturePipeline::new();
        let mut news = BinaryMatrix::empty(frame.height());
        let mut dropped: Vec<String> = Vec::new();

        if settings.use_news {
            let removed = |name: &str| settings.remove_news_features.iter().any(|c| c == name);

            let mut producers = vec![FeatureProducer::Audiences(self.audience_encoder.clone())];
            if removed(PROVIDER) {
                dropped.push(PROVIDER.to_string());
            } else {
                producers.push(FeatureProducer::Provider(self.provider_encoder.clone()));
            }
            if removed(HEADLINE_TAG) {
                dropped.push(HEADLINE_TAG.to_string());
            } else {
                producers.push(FeatureProducer::HeadlineTag(self.headline_tag_encoder.clone()));
            }
            if removed(HEADLINE) {
                dropped.push(HEADLINE.to_string());
            } else {
                let mut vectorizer = CountVectorizer::new(HEADLINE_MAX_FEATURES, true);
                vectorizer.fit(&frame.column(HEADLINE)?.strs()?);
                producers.push(FeatureProducer::Headline(vectorizer));
            }
            if removed(SUBJECTS) {
                dropped.push(SUBJECTS.to_string());
            } else {
                let mut vectorizer = CountVectorizer::new(SUBJECTS_MAX_FEATURES, false);
                vectorizer.fit(&frame.column(SUBJECTS)?.strs()?);
                producers.push(FeatureProducer::Subjects(vectorizer));
            }

            for producer in producers {
                let block = producer.transform(&mut frame)?;
                info!(
                    "{} feature extraction has done: {} columns, {} set",
                    producer.column(),
                    block.n_cols(),
                    block.nnz()
                );
                news = news.hstack(&block);
                pipeline.add(FeatureTransformer::FeatureProducer(producer));
            }
        } else {
            pipeline.add(FeatureTransformer::NoOp);
        }

        if settings.uses_history() {
            let scale = settings.scale.then_some(settings.scale_type);
            let mut lag = LagAggregationTransformer::new(
                lag::DEFAULT_WINDOWS.to_vec(),
                1,
                scale,
                true,
                settings.lag_workers,
            );
            frame = lag.transform(frame)?;
            pipeline.add(FeatureTransformer::FrameMutator(FrameMutator::Lag(lag)));
        }

        dropped.extend([TIME.to_string(), ASSET_CODE.to_string()]);
        let mut drop = FrameMutator::DropColumns(dropped);
        frame = drop.transform(frame)?;
        pipeline.add(FeatureTransformer::FrameMutator(drop));

        let news_feature_names = pipeline.feature_names();
        Ok(ExtractedFeatures {
            frame,
            news,
            news_feature_names,
            pipeline,
        })
    }
}
