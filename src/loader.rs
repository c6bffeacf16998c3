//! CSV input for the training files and the prediction-day replay
//!
//! Column dtypes come from [`market_dtype`] / [`news_dtype`]. Empty cells are
//! missing values; an unnamed leading column (a written-out row index) is
//! skipped.

use crate::frame::{DType, Frame, FrameError};
use crate::schema::{
    market_dtype, news_dtype, ASSET_CODE, FIRST_CREATED, TARGET_RETURN, TIME, UNIVERSE,
};
use arrow::compute::concat_batches;
use arrow::csv::{reader::Format, ReaderBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: ArrowError,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Storage type the CSV reader parses a column into before it is cast to `dtype`
///
/// Integers go through Float64 so that cells written as "3.0" still load.
fn read_type(dtype: DType) -> DataType {
    match dtype {
        DType::Categorical => DataType::Utf8,
        dtype if dtype.is_integer() => DataType::Float64,
        dtype => dtype.to_arrow(),
    }
}

/// Read a CSV file, typing each column with `dtype_of`
pub fn read_csv(path: &Path, dtype_of: fn(&str) -> DType) -> Result<Frame, LoadError> {
    let open = || {
        File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    let csv_error = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let (header, _) = Format::default()
        .with_header(true)
        .infer_schema(open()?, Some(0))
        .map_err(csv_error)?;

    let mut fields = Vec::with_capacity(header.fields().len());
    let mut projection = Vec::with_capacity(header.fields().len());
    for (index, field) in header.fields().iter().enumerate() {
        let name = field.name();
        if name.trim().is_empty() {
            debug!("skipping unnamed column {} in {}", index, path.display());
        } else {
            projection.push(index);
        }
        fields.push(Field::new(name, read_type(dtype_of(name)), true));
    }
    let schema = Schema::new(fields);
    let projected = Arc::new(schema.project(&projection).map_err(csv_error)?);

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_header(true)
        .with_projection(projection)
        .build(open()?)
        .map_err(csv_error)?;
    let batches = reader.collect::<Result<Vec<_>, _>>().map_err(csv_error)?;
    let batch = concat_batches(&projected, &batches).map_err(csv_error)?;

    let mut frame = Frame::from_record_batch(&batch)?;
    for name in frame.column_names() {
        frame.cast_column(&name, dtype_of(&name))?;
    }

    info!(
        "📖 loaded {}: {} rows x {} columns",
        path.display(),
        frame.height(),
        frame.width()
    );
    Ok(frame)
}

pub fn load_market(path: &Path) -> Result<Frame, LoadError> {
    read_csv(path, market_dtype)
}

pub fn load_news(path: &Path) -> Result<Frame, LoadError> {
    read_csv(path, news_dtype)
}

/// Rows to fill for one prediction day, prefilled with confidence 0
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionTemplate {
    pub date: NaiveDate,
    pub asset_codes: Vec<String>,
    pub confidence: Vec<f32>,
}

impl PredictionTemplate {
    pub fn new(date: NaiveDate, asset_codes: Vec<String>) -> Self {
        let confidence = vec![0.0; asset_codes.len()];
        Self {
            date,
            asset_codes,
            confidence,
        }
    }

    pub fn len(&self) -> usize {
        self.asset_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asset_codes.is_empty()
    }
}

/// One step of the replay: the day's market rows, the news published since
/// the previous market day, and the template to fill
#[derive(Debug, Clone)]
pub struct PredictionDay {
    pub market: Frame,
    pub news: Frame,
    pub template: PredictionTemplate,
}

/// Replays static market/news frames one trading day at a time
pub struct PredictionDays {
    days: std::vec::IntoIter<PredictionDay>,
}

fn day_of(times: &[Option<DateTime<Utc>>]) -> Vec<Option<NaiveDate>> {
    times.iter().map(|t| t.map(|t| t.date_naive())).collect()
}

impl PredictionDays {
    /// Split by market day; news dated after the previous market day and up to
    /// this one belongs to this day (earlier news goes to the first day)
    pub fn from_frames(mut market: Frame, news: Frame) -> Result<Self, LoadError> {
        market.drop_columns(&[TARGET_RETURN, UNIVERSE]);

        let market_days = day_of(&market.column(TIME)?.timestamps()?);
        let news_days = day_of(&news.column(FIRST_CREATED)?.timestamps()?);

        let mut rows_by_day: BTreeMap<NaiveDate, Vec<bool>> = BTreeMap::new();
        for (row, day) in market_days.iter().enumerate() {
            if let Some(day) = day {
                rows_by_day
                    .entry(*day)
                    .or_insert_with(|| vec![false; market.height()])[row] = true;
            }
        }

        let mut days = Vec::with_capacity(rows_by_day.len());
        let mut previous: Option<NaiveDate> = None;
        let mut assigned = 0usize;
        for (day, mask) in rows_by_day {
            let news_mask: Vec<bool> = news_days
                .iter()
                .map(|d| d.map_or(false, |d| d <= day && previous.map_or(true, |p| d > p)))
                .collect();
            assigned += news_mask.iter().filter(|m| **m).count();

            let day_market = market.filter_rows(&mask)?;
            let asset_codes = day_market
                .column(ASSET_CODE)?
                .strs()?
                .into_iter()
                .map(|c| c.unwrap_or_default().to_string())
                .collect();
            days.push(PredictionDay {
                template: PredictionTemplate::new(day, asset_codes),
                market: day_market,
                news: news.filter_rows(&news_mask)?,
            });
            previous = Some(day);
        }

        if assigned < news.height() {
            warn!(
                "{} news rows fall after the last market day and are not replayed",
                news.height() - assigned
            );
        }
        info!("prepared {} prediction days", days.len());
        Ok(Self {
            days: days.into_iter(),
        })
    }

    pub fn load(market_path: &Path, news_path: &Path) -> Result<Self, LoadError> {
        Self::from_frames(load_market(market_path)?, load_news(news_path)?)
    }
}

impl Iterator for PredictionDays {
    type Item = PredictionDay;

    fn next(&mut self) -> Option<Self::Item> {
        self.days.next()
    }
}
