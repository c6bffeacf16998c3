//! Row identifiers for market and news frames
//!
//! Ids are dense, 1-based `Int32` values assigned in row order. They are
//! assigned once, before any filtering, and every later stage (linkage,
//! aggregation, prediction mapping) keys on them.

use crate::frame::{Column, Frame, FrameError};
use arrow::array::Int32Array;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("id column {column} has {null_count} missing values")]
    Missing { column: String, null_count: usize },

    #[error("id column {column} has duplicate value {value}")]
    Duplicate { column: String, value: i32 },

    #[error("id column {column} is not increasing at row {row}")]
    NotMonotonic { column: String, row: usize },
}

/// Write `1..=height` into `name`, replacing any existing column
pub fn assign_ids(frame: &mut Frame, name: &str) -> Result<(), FrameError> {
    let height = i32::try_from(frame.height()).map_err(|_| FrameError::LengthMismatch {
        name: name.to_string(),
        expected: i32::MAX as usize,
        actual: frame.height(),
    })?;
    let ids = Int32Array::from_iter_values(1..=height);
    frame.set_column(Column::new(name, Arc::new(ids))?)
}

/// Check that `name` holds non-missing, strictly increasing (hence unique) ids
pub fn validate_ids(frame: &Frame, name: &str) -> Result<(), IdError> {
    let column = frame.column(name)?;
    let ids = column.i32s()?;

    let null_count = column.null_count();
    if null_count > 0 {
        return Err(IdError::Missing {
            column: name.to_string(),
            null_count,
        });
    }

    for (row, pair) in ids.windows(2).enumerate() {
        let (prev, next) = (pair[0].unwrap_or_default(), pair[1].unwrap_or_default());
        if next == prev {
            return Err(IdError::Duplicate {
                column: name.to_string(),
                value: next,
            });
        }
        if next < prev {
            return Err(IdError::NotMonotonic {
                column: name.to_string(),
                row: row + 1,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float32Array};

    fn frame_with_ids(ids: Vec<Option<i32>>) -> Frame {
        Frame::try_from_iter([("id", Arc::new(Int32Array::from(ids)) as ArrayRef)]).unwrap()
    }

    #[test]
    fn test_assign_ids_replaces_existing() {
        let mut frame = frame_with_ids(vec![Some(7), Some(3), None]);
        assign_ids(&mut frame, "id").unwrap();

        assert_eq!(
            frame.column("id").unwrap().i32s().unwrap(),
            &[Some(1), Some(2), Some(3)]
        );
        validate_ids(&frame, "id").unwrap();
    }

    #[test]
    fn test_assign_ids_on_new_column() {
        let mut frame =
            Frame::try_from_iter([("close", Arc::new(Float32Array::from(vec![1.0, 2.0])) as ArrayRef)])
                .unwrap();
        assign_ids(&mut frame, "news_id").unwrap();
        assert_eq!(frame.width(), 2);
        validate_ids(&frame, "news_id").unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let frame = frame_with_ids(vec![Some(1), Some(2), Some(2)]);
        assert!(matches!(
            validate_ids(&frame, "id"),
            Err(IdError::Duplicate { value: 2, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_decreasing() {
        let frame = frame_with_ids(vec![Some(1), Some(3), Some(2)]);
        assert!(matches!(
            validate_ids(&frame, "id"),
            Err(IdError::NotMonotonic { row: 2, .. })
        ));
    }

    #[test]
    fn test_validate_reports_missing() {
        let frame = frame_with_ids(vec![Some(1), None]);
        assert!(matches!(
            validate_ids(&frame, "id"),
            Err(IdError::Missing { null_count: 1, .. })
        ));
    }
}
