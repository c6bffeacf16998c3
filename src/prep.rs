//! Frame preparation applied before preprocessing and linkage

use crate::frame::{Column, DType, Frame, FrameError};
use crate::schema::{
    ASSET_NAME, CONFIDENCE, SOURCE_ID, SOURCE_TIMESTAMP, TARGET_RETURN, TIME, UNIVERSE,
};
use arrow::array::BooleanArray;
use chrono::NaiveDate;
use log::{debug, info};
use std::sync::Arc;

/// Training label: `returnsOpenNextMktres10 >= 0` (missing returns count as false)
pub fn add_confidence(market: &mut Frame) -> Result<(), FrameError> {
    let labels: BooleanArray = market
        .column(TARGET_RETURN)?
        .f64s()?
        .into_iter()
        .map(|r| Some(r.map_or(false, |r| r >= 0.0)))
        .collect();
    market.set_column(Column::new(CONFIDENCE, Arc::new(labels))?)
}

/// Narrow 64-bit columns: Float64 → Float32, Int64 → Int32
pub fn compress_dtypes(frame: &mut Frame) -> Result<(), FrameError> {
    let targets: Vec<(String, DType)> = frame
        .schema()
        .into_iter()
        .filter(|(_, dtype)| dtype.compressed() != *dtype)
        .collect();

    for (name, dtype) in targets {
        debug!("compressing {} from {} to {}", name, dtype, dtype.compressed());
        frame.cast_column(&name, dtype.compressed())?;
    }
    Ok(())
}

/// Keep rows whose timestamp in `column` falls on or after `since`
pub fn filter_since(frame: &Frame, column: &str, since: NaiveDate) -> Result<Frame, FrameError> {
    let mask: Vec<bool> = frame
        .column(column)?
        .timestamps()?
        .iter()
        .map(|t| t.map_or(false, |t| t.date_naive() >= since))
        .collect();
    let filtered = frame.filter_rows(&mask)?;
    info!(
        "📅 {} filter since {}: {} → {} rows",
        column,
        since,
        frame.height(),
        filtered.height()
    );
    Ok(filtered)
}

/// Drop columns never used as features (both training and prediction days)
pub fn remove_unnecessary_columns(market: &mut Frame, news: &mut Frame) {
    market.drop_columns(&[ASSET_NAME]);
    news.drop_columns(&[TIME, SOURCE_ID, SOURCE_TIMESTAMP, ASSET_NAME]);
}

/// Training variant: also drops the raw target and the universe flag
pub fn remove_unnecessary_columns_train(market: &mut Frame, news: &mut Frame) {
    market.drop_columns(&[TARGET_RETURN, UNIVERSE]);
    remove_unnecessary_columns(market, news);
}

/// Dictionary-encode a text column if present
pub fn to_category(frame: &mut Frame, name: &str) -> Result<(), FrameError> {
    if frame.contains(name) {
        frame.cast_column(name, DType::Categorical)?;
    }
    Ok(())
}

/// Log how many empty strings each text column carries
pub fn log_empty_strings(frame: &Frame) {
    for column in frame.columns().iter().filter(|c| c.dtype().is_textual()) {
        let empty = (0..column.len())
            .filter(|&i| column.str_at(i) == Some(""))
            .count();
        info!("empty value in {}: {}", column.name(), empty);
    }
}
