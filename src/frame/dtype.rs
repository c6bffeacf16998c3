//! Column data types and their memory classes
//!
//! Each [`DType`] maps onto one arrow storage type. Categorical text is an
//! `Int32`-keyed dictionary, timestamps are microseconds pinned to UTC.

use arrow::datatypes::{DataType, TimeUnit};
use std::fmt;

/// Timezone attached to every timestamp column
pub const UTC_OFFSET: &str = "+00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
    Utf8,
    Categorical,
    Timestamp,
    Date,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Utf8 => "utf8",
            DType::Categorical => "category",
            DType::Timestamp => "timestamp",
            DType::Date => "date",
        }
    }

    /// Arrow storage type of this dtype
    pub fn to_arrow(&self) -> DataType {
        match self {
            DType::Bool => DataType::Boolean,
            DType::Int8 => DataType::Int8,
            DType::Int16 => DataType::Int16,
            DType::Int32 => DataType::Int32,
            DType::Int64 => DataType::Int64,
            DType::Float16 => DataType::Float16,
            DType::Float32 => DataType::Float32,
            DType::Float64 => DataType::Float64,
            DType::Utf8 => DataType::Utf8,
            DType::Categorical => {
                DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
            }
            DType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC_OFFSET.into())),
            DType::Date => DataType::Date32,
        }
    }

    /// Dtype of an arrow storage type; `None` for types frames do not hold
    pub fn from_arrow(data_type: &DataType) -> Option<DType> {
        let dtype = match data_type {
            DataType::Boolean => DType::Bool,
            DataType::Int8 => DType::Int8,
            DataType::Int16 => DType::Int16,
            DataType::Int32 => DType::Int32,
            DataType::Int64 => DType::Int64,
            DataType::Float16 => DType::Float16,
            DataType::Float32 => DType::Float32,
            DataType::Float64 => DType::Float64,
            DataType::Utf8 => DType::Utf8,
            DataType::Dictionary(key, value)
                if **key == DataType::Int32 && **value == DataType::Utf8 =>
            {
                DType::Categorical
            }
            DataType::Timestamp(TimeUnit::Microsecond, _) => DType::Timestamp,
            DataType::Date32 => DType::Date,
            _ => return None,
        };
        Some(dtype)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float16 | DType::Float32 | DType::Float64)
    }

    /// Integer or float (bool is not counted as numeric)
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Numeric or bool; these read as f64 with bools as 0/1
    pub fn is_number_like(&self) -> bool {
        self.is_numeric() || *self == DType::Bool
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, DType::Utf8 | DType::Categorical)
    }

    /// Representative dtype after aggregation, if this dtype is subject to restoration.
    ///
    /// Narrow types (8/16-bit and bool) collapse to `Float16`, 32-bit ints and
    /// all wider floats collapse to `Float32`. Everything else keeps its type.
    pub fn restored(&self) -> Option<DType> {
        match self {
            DType::Float16 | DType::Int16 | DType::Int8 | DType::Bool => Some(DType::Float16),
            DType::Float64 | DType::Float32 | DType::Int32 => Some(DType::Float32),
            _ => None,
        }
    }

    /// Compressed dtype used when loading raw frames
    pub fn compressed(&self) -> DType {
        match self {
            DType::Float64 => DType::Float32,
            DType::Int64 => DType::Int32,
            other => *other,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restoration_classes() {
        assert_eq!(DType::Bool.restored(), Some(DType::Float16));
        assert_eq!(DType::Int8.restored(), Some(DType::Float16));
        assert_eq!(DType::Int16.restored(), Some(DType::Float16));
        assert_eq!(DType::Float16.restored(), Some(DType::Float16));
        assert_eq!(DType::Int32.restored(), Some(DType::Float32));
        assert_eq!(DType::Float32.restored(), Some(DType::Float32));
        assert_eq!(DType::Float64.restored(), Some(DType::Float32));
        assert_eq!(DType::Int64.restored(), None);
        assert_eq!(DType::Utf8.restored(), None);
        assert_eq!(DType::Categorical.restored(), None);
    }

    #[test]
    fn test_arrow_mapping() {
        let all = [
            DType::Bool,
            DType::Int8,
            DType::Int16,
            DType::Int32,
            DType::Int64,
            DType::Float16,
            DType::Float32,
            DType::Float64,
            DType::Utf8,
            DType::Categorical,
            DType::Timestamp,
            DType::Date,
        ];
        for dtype in all {
            assert_eq!(DType::from_arrow(&dtype.to_arrow()), Some(dtype));
        }
        assert_eq!(DType::from_arrow(&DataType::UInt64), None);
        assert_eq!(
            DType::from_arrow(&DataType::Dictionary(
                Box::new(DataType::Int8),
                Box::new(DataType::Utf8)
            )),
            None
        );
    }

    #[test]
    fn test_compressed() {
        assert_eq!(DType::Float64.compressed(), DType::Float32);
        assert_eq!(DType::Int64.compressed(), DType::Int32);
        assert_eq!(DType::Int8.compressed(), DType::Int8);
    }
}
