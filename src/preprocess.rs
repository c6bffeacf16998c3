//! Per-column numeric preprocessing fitted on training data
//!
//! A [`Preprocessor`] runs log1p transforms, then scalers, then median
//! imputation over fixed column lists. `fit_transform` learns the scaler and
//! imputer parameters; `transform` replays them on prediction days. Columns
//! missing from a frame are skipped. Transformed columns are stored as Float32.

use crate::config::ScaleType;
use crate::frame::{float32_array, Column, Frame, FrameError};
use crate::schema::{MARKET_RETURN_COLUMNS, NEWS_NUMERIC_COLUMNS};
use log::debug;

const NEWS_LOG_NORMAL_COLUMNS: [&str; 18] = [
    "bodySize",
    "sentenceCount",
    "wordCount",
    "firstMentionSentence",
    "sentimentNegative",
    "sentimentNeutral",
    "sentimentPositive",
    "sentimentWordCount",
    "noveltyCount12H",
    "noveltyCount24H",
    "noveltyCount3D",
    "noveltyCount5D",
    "noveltyCount7D",
    "volumeCounts12H",
    "volumeCounts24H",
    "volumeCounts3D",
    "volumeCounts5D",
    "volumeCounts7D",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnTransform {
    Log1p,
    Standard { mean: f64, scale: f64 },
    MinMax { min: f64, range: f64 },
    MedianImpute { median: f64 },
    MeanImpute { mean: f64 },
}

impl ColumnTransform {
    fn apply(&self, x: f64) -> f64 {
        match *self {
            ColumnTransform::Log1p => x.ln_1p(),
            ColumnTransform::Standard { mean, scale } => (x - mean) / scale,
            ColumnTransform::MinMax { min, range } => (x - min) / range,
            ColumnTransform::MedianImpute { median: fill }
            | ColumnTransform::MeanImpute { mean: fill } => {
                if x.is_nan() {
                    fill
                } else {
                    x
                }
            }
        }
    }

    pub fn apply_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|x| self.apply(*x)).collect()
    }
}

/// Fit a scaler on the non-missing values of a column
pub fn fit_scaler(scale: ScaleType, values: &[f64]) -> ColumnTransform {
    Step::Scale(scale).fit(values)
}

/// Mean of the non-missing values, used to fill gaps
pub fn fit_mean_imputer(values: &[f64]) -> ColumnTransform {
    let observed: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    ColumnTransform::MeanImpute {
        mean: mean_std(&observed).0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Log1p,
    Scale(ScaleType),
    Impute,
}

impl Step {
    /// Learn parameters from the non-missing values of a column
    fn fit(&self, values: &[f64]) -> ColumnTransform {
        let observed: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
        match self {
            Step::Log1p => ColumnTransform::Log1p,
            Step::Scale(ScaleType::Standard) => {
                let (mean, std) = mean_std(&observed);
                ColumnTransform::Standard {
                    mean,
                    scale: if std > 0.0 { std } else { 1.0 },
                }
            }
            Step::Scale(ScaleType::MinMax) => {
                let min = observed.iter().copied().fold(f64::INFINITY, f64::min);
                let max = observed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let range = max - min;
                ColumnTransform::MinMax {
                    min: if min.is_finite() { min } else { 0.0 },
                    range: if range.is_finite() && range > 0.0 { range } else { 1.0 },
                }
            }
            Step::Impute => ColumnTransform::MedianImpute {
                median: median(observed),
            },
        }
    }
}

pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

pub struct Preprocessor {
    plan: Vec<(String, Step)>,
    fitted: Option<Vec<(String, ColumnTransform)>>,
}

impl Preprocessor {
    fn from_lists(log_columns: &[&str], scaled: &[&str], imputed: &[&str], scale: ScaleType) -> Self {
        let mut plan: Vec<(String, Step)> = Vec::new();
        plan.extend(log_columns.iter().map(|c| (c.to_string(), Step::Log1p)));
        plan.extend(scaled.iter().map(|c| (c.to_string(), Step::Scale(scale))));
        plan.extend(imputed.iter().map(|c| (c.to_string(), Step::Impute)));
        Self { plan, fitted: None }
    }

    /// Price/return columns: scaled, then median-imputed
    pub fn market(scale: ScaleType) -> Self {
        Self::from_lists(&[], &MARKET_RETURN_COLUMNS, &MARKET_RETURN_COLUMNS, scale)
    }

    /// News counts and sentiment: log1p on heavy-tailed fields, scaled, then median-imputed
    pub fn news(scale: ScaleType) -> Self {
        Self::from_lists(
            &NEWS_LOG_NORMAL_COLUMNS,
            &NEWS_NUMERIC_COLUMNS,
            &NEWS_NUMERIC_COLUMNS,
            scale,
        )
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fit_transform(&mut self, frame: &mut Frame) -> Result<(), FrameError> {
        let mut fitted = Vec::with_capacity(self.plan.len());
        for (name, step) in &self.plan {
            if !frame.contains(name) {
                debug!("preprocess: {} absent, skipped", name);
                continue;
            }
            let values = Self::values(frame, name)?;
            let transform = step.fit(&values);
            Self::write(frame, name, &values, &transform)?;
            fitted.push((name.clone(), transform));
        }
        self.fitted = Some(fitted);
        Ok(())
    }

    /// Apply fitted parameters; an unfitted preprocessor leaves the frame unchanged
    pub fn transform(&self, frame: &mut Frame) -> Result<(), FrameError> {
        for (name, transform) in self.fitted.iter().flatten() {
            if !frame.contains(name) {
                continue;
            }
            let values = Self::values(frame, name)?;
            Self::write(frame, name, &values, transform)?;
        }
        Ok(())
    }

    fn values(frame: &Frame, name: &str) -> Result<Vec<f64>, FrameError> {
        Ok(frame
            .column(name)?
            .f64s()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    fn write(
        frame: &mut Frame,
        name: &str,
        values: &[f64],
        transform: &ColumnTransform,
    ) -> Result<(), FrameError> {
        let out: Vec<f64> = values.iter().map(|x| transform.apply(*x)).collect();
        frame.set_column(Column::new(name, float32_array(&out))?)
    }
}
