//! In-memory columnar frames over arrow arrays
//!
//! A `Frame` is an ordered set of equally long named columns, each one arrow
//! array. Row gathers, filters, vertical concatenation and casts go through
//! arrow's compute kernels; a frame converts to and from a `RecordBatch` at
//! the I/O edges.

pub mod column;
pub mod dtype;
pub mod value;

pub use column::{date_array, float32_array, float64_array, timestamp_array, Column};
pub use dtype::DType;
pub use value::Value;

use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("column {name} has {actual} rows, frame has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("column {name}: expected {expected}, found {actual}")]
    TypeMismatch {
        name: String,
        expected: DType,
        actual: DType,
    },

    #[error("column {name}: unsupported storage type {data_type}")]
    UnsupportedType { name: String, data_type: DataType },

    #[error("cannot cast {from} to {to}")]
    UnsupportedCast { from: DType, to: DType },

    #[error("cannot fill {dtype} column with {value:?}")]
    InvalidFill { dtype: DType, value: Value },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<Column>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Result<Self, FrameError> {
        let mut frame = Self::new();
        for column in columns {
            frame.push_column(column)?;
        }
        Ok(frame)
    }

    /// Build from `(name, array)` pairs, in the manner of `RecordBatch::try_from_iter`
    pub fn try_from_iter<I, S>(columns: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = (S, ArrayRef)>,
        S: Into<String>,
    {
        let mut frame = Self::new();
        for (name, array) in columns {
            frame.push_column(Column::new(name, array)?)?;
        }
        Ok(frame)
    }

    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self, FrameError> {
        Self::try_from_iter(
            batch
                .schema()
                .fields()
                .iter()
                .zip(batch.columns())
                .map(|(field, array)| (field.name().clone(), Arc::clone(array))),
        )
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch, FrameError> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.name(), c.array().data_type().clone(), true))
            .collect();
        let arrays: Vec<ArrayRef> = self.columns.iter().map(|c| Arc::clone(c.array())).collect();
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn schema(&self) -> Vec<(String, DType)> {
        self.columns
            .iter()
            .map(|c| (c.name().to_string(), c.dtype()))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, FrameError> {
        self.position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))
    }

    fn check_length(&self, column: &Column) -> Result<(), FrameError> {
        if !self.columns.is_empty() && column.len() != self.height() {
            return Err(FrameError::LengthMismatch {
                name: column.name().to_string(),
                expected: self.height(),
                actual: column.len(),
            });
        }
        Ok(())
    }

    /// Append a new column; the name must not exist yet
    pub fn push_column(&mut self, column: Column) -> Result<(), FrameError> {
        if self.contains(column.name()) {
            return Err(FrameError::DuplicateColumn(column.name().to_string()));
        }
        self.check_length(&column)?;
        self.columns.push(column);
        Ok(())
    }

    /// Replace a column in place, or append it when absent
    pub fn set_column(&mut self, column: Column) -> Result<(), FrameError> {
        match self.position(column.name()) {
            Some(i) => {
                if self.columns.len() > 1 {
                    self.check_length(&column)?;
                }
                self.columns[i] = column;
                Ok(())
            }
            None => self.push_column(column),
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Column, FrameError> {
        self.position(name)
            .map(|i| self.columns.remove(i))
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))
    }

    /// Drop columns by name, ignoring names that are not present
    pub fn drop_columns(&mut self, names: &[&str]) {
        self.columns.retain(|c| !names.contains(&c.name()));
    }

    pub fn select(&self, names: &[&str]) -> Result<Frame, FrameError> {
        let columns = names
            .iter()
            .map(|name| self.column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Frame::from_columns(columns)
    }

    pub fn cast_column(&mut self, name: &str, dtype: DType) -> Result<(), FrameError> {
        let column = self.column(name)?;
        if column.dtype() != dtype {
            let cast = column.cast(dtype)?;
            self.set_column(cast)?;
        }
        Ok(())
    }

    /// Gather rows by index; `None` yields a row of missing values
    pub fn take_rows(&self, indices: &[Option<usize>]) -> Result<Frame, FrameError> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.take(indices))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame { columns })
    }

    pub fn filter_rows(&self, mask: &[bool]) -> Result<Frame, FrameError> {
        let mask = BooleanArray::from(mask.to_vec());
        let columns = self
            .columns
            .iter()
            .map(|c| c.filter(&mask))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame { columns })
    }

    /// Concatenate rows of `other` (matched by column name) below `self`
    pub fn vstack(self, other: Frame) -> Result<Frame, FrameError> {
        if self.columns.is_empty() {
            return Ok(other);
        }
        if other.columns.is_empty() {
            return Ok(self);
        }
        if let Some(extra) = other.columns.iter().find(|c| !self.contains(c.name())) {
            return Err(FrameError::DuplicateColumn(extra.name().to_string()));
        }

        let columns = self
            .columns
            .iter()
            .map(|column| column.concat(other.column(column.name())?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame { columns })
    }

    /// Row values, in column order
    pub fn row(&self, i: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.get(i)).collect()
    }
}
