//! Named arrow arrays
//!
//! Missing values are arrow nulls. Float arrays are normalised on the way in
//! so that NaN never sits in a valid slot: a NaN produced by arithmetic reads
//! as missing like any other gap.

use super::dtype::{DType, UTC_OFFSET};
use super::value::Value;
use super::FrameError;
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float32Array, Float64Array, Scalar,
    StringArray, TimestampMicrosecondArray, UInt64Array,
};
use arrow::compute::{self, kernels::zip::zip};
use arrow::datatypes::{
    DataType, Date32Type, Float16Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, TimestampMicrosecondType,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// Timestamp column storage from optional UTC instants
pub fn timestamp_array(values: &[Option<DateTime<Utc>>]) -> ArrayRef {
    let micros: Vec<Option<i64>> = values.iter().map(|t| t.map(|t| t.timestamp_micros())).collect();
    Arc::new(TimestampMicrosecondArray::from(micros).with_timezone(UTC_OFFSET))
}

pub fn date_array(values: &[Option<NaiveDate>]) -> ArrayRef {
    let days: Vec<Option<i32>> = values
        .iter()
        .map(|d| d.map(Date32Type::from_naive_date))
        .collect();
    Arc::new(Date32Array::from(days))
}

/// Float32 storage from f64 values, NaN meaning missing
pub fn float32_array(values: &[f64]) -> ArrayRef {
    Arc::new(
        values
            .iter()
            .map(|x| (!x.is_nan()).then_some(*x as f32))
            .collect::<Float32Array>(),
    )
}

/// Float64 storage from optional values
pub fn float64_array(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

fn nan_mask<I>(values: I) -> Option<BooleanArray>
where
    I: Iterator<Item = Option<bool>>,
{
    let mask: BooleanArray = values.map(|v| Some(v.unwrap_or(false))).collect();
    (mask.true_count() > 0).then_some(mask)
}

/// Turn NaN cells of a float array into nulls
fn null_nans(array: ArrayRef) -> Result<ArrayRef, FrameError> {
    let mask = match array.data_type() {
        DataType::Float16 => {
            nan_mask(array.as_primitive::<Float16Type>().iter().map(|v| v.map(|x| x.is_nan())))
        }
        DataType::Float32 => {
            nan_mask(array.as_primitive::<Float32Type>().iter().map(|v| v.map(f32::is_nan)))
        }
        DataType::Float64 => {
            nan_mask(array.as_primitive::<Float64Type>().iter().map(|v| v.map(f64::is_nan)))
        }
        _ => None,
    };
    match mask {
        Some(mask) => Ok(compute::nullif(array.as_ref(), &mask)?),
        None => Ok(array),
    }
}

/// Single-row array of `dtype` holding `value`, or `None` if the two do not fit
fn fill_scalar(dtype: DType, value: &Value) -> Result<Option<ArrayRef>, FrameError> {
    let raw: ArrayRef = match (dtype, value) {
        (dtype, Value::Int(_) | Value::Float(_)) if dtype.is_numeric() => {
            Arc::new(Float64Array::from(vec![value.as_f64()]))
        }
        (DType::Bool, Value::Bool(b)) => Arc::new(BooleanArray::from(vec![*b])),
        (DType::Utf8 | DType::Categorical, Value::Str(s)) => {
            Arc::new(StringArray::from(vec![s.as_str()]))
        }
        (DType::Timestamp, Value::Timestamp(t)) => timestamp_array(&[Some(*t)]),
        (DType::Date, Value::Date(d)) => date_array(&[Some(*d)]),
        _ => return Ok(None),
    };
    Ok(Some(compute::cast(raw.as_ref(), &dtype.to_arrow())?))
}

/// Named column over one arrow array
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    dtype: DType,
    array: ArrayRef,
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.dtype == other.dtype && *self.array == *other.array
    }
}

impl Column {
    /// Wrap an arrow array; its storage type must map onto a [`DType`]
    pub fn new(name: impl Into<String>, array: ArrayRef) -> Result<Self, FrameError> {
        let name = name.into();
        let dtype = DType::from_arrow(array.data_type()).ok_or_else(|| {
            FrameError::UnsupportedType {
                name: name.clone(),
                data_type: array.data_type().clone(),
            }
        })?;
        let array = if dtype.is_float() {
            null_nans(array)?
        } else {
            array
        };
        Ok(Self { name, dtype, array })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    pub fn into_array(self) -> ArrayRef {
        self.array
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.array.null_count()
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.array.is_null(i)
    }

    fn with_array(&self, array: ArrayRef) -> Result<Column, FrameError> {
        Column::new(self.name.as_str(), array)
    }

    fn mismatch(&self, expected: DType) -> FrameError {
        FrameError::TypeMismatch {
            name: self.name.clone(),
            expected,
            actual: self.dtype,
        }
    }

    /// Numeric view of a cell (bools as 0/1); `None` for missing or non-numeric
    pub fn f64_at(&self, i: usize) -> Option<f64> {
        if self.array.is_null(i) {
            return None;
        }
        let a = &self.array;
        let value = match self.dtype {
            DType::Bool => {
                if a.as_boolean().value(i) {
                    1.0
                } else {
                    0.0
                }
            }
            DType::Int8 => f64::from(a.as_primitive::<Int8Type>().value(i)),
            DType::Int16 => f64::from(a.as_primitive::<Int16Type>().value(i)),
            DType::Int32 => f64::from(a.as_primitive::<Int32Type>().value(i)),
            DType::Int64 => a.as_primitive::<Int64Type>().value(i) as f64,
            DType::Float16 => a.as_primitive::<Float16Type>().value(i).to_f64(),
            DType::Float32 => f64::from(a.as_primitive::<Float32Type>().value(i)),
            DType::Float64 => a.as_primitive::<Float64Type>().value(i),
            _ => return None,
        };
        Some(value)
    }

    /// Borrowed text of a Utf8 or Categorical cell
    pub fn str_at(&self, i: usize) -> Option<&str> {
        if self.array.is_null(i) {
            return None;
        }
        match self.dtype {
            DType::Utf8 => Some(self.array.as_string::<i32>().value(i)),
            DType::Categorical => {
                let dict = self.array.as_dictionary::<Int32Type>();
                let key = usize::try_from(dict.keys().value(i)).ok()?;
                Some(dict.values().as_string::<i32>().value(key))
            }
            _ => None,
        }
    }

    pub fn get(&self, i: usize) -> Value {
        if self.array.is_null(i) {
            return Value::Null;
        }
        let a = &self.array;
        match self.dtype {
            DType::Bool => Value::Bool(a.as_boolean().value(i)),
            DType::Int8 => Value::Int(a.as_primitive::<Int8Type>().value(i).into()),
            DType::Int16 => Value::Int(a.as_primitive::<Int16Type>().value(i).into()),
            DType::Int32 => Value::Int(a.as_primitive::<Int32Type>().value(i).into()),
            DType::Int64 => Value::Int(a.as_primitive::<Int64Type>().value(i)),
            DType::Float16 | DType::Float32 | DType::Float64 => {
                self.f64_at(i).map_or(Value::Null, Value::Float)
            }
            DType::Utf8 | DType::Categorical => self
                .str_at(i)
                .map_or(Value::Null, |s| Value::Str(s.to_string())),
            DType::Timestamp => self.timestamp_at(i).map_or(Value::Null, Value::Timestamp),
            DType::Date => a
                .as_primitive::<Date32Type>()
                .value_as_date(i)
                .map_or(Value::Null, Value::Date),
        }
    }

    fn timestamp_at(&self, i: usize) -> Option<DateTime<Utc>> {
        let micros = self.array.as_primitive::<TimestampMicrosecondType>().value(i);
        DateTime::from_timestamp_micros(micros)
    }

    pub fn timestamps(&self) -> Result<Vec<Option<DateTime<Utc>>>, FrameError> {
        if self.dtype != DType::Timestamp {
            return Err(self.mismatch(DType::Timestamp));
        }
        Ok((0..self.len())
            .map(|i| {
                if self.array.is_null(i) {
                    None
                } else {
                    self.timestamp_at(i)
                }
            })
            .collect())
    }

    pub fn dates(&self) -> Result<Vec<Option<NaiveDate>>, FrameError> {
        if self.dtype != DType::Date {
            return Err(self.mismatch(DType::Date));
        }
        let dates = self.array.as_primitive::<Date32Type>();
        Ok((0..dates.len())
            .map(|i| if dates.is_null(i) { None } else { dates.value_as_date(i) })
            .collect())
    }

    pub fn i32s(&self) -> Result<Vec<Option<i32>>, FrameError> {
        if self.dtype != DType::Int32 {
            return Err(self.mismatch(DType::Int32));
        }
        Ok(self.array.as_primitive::<Int32Type>().iter().collect())
    }

    /// Text cells of a Utf8 or Categorical column
    pub fn strs(&self) -> Result<Vec<Option<&str>>, FrameError> {
        if !self.dtype.is_textual() {
            return Err(self.mismatch(DType::Utf8));
        }
        Ok((0..self.len()).map(|i| self.str_at(i)).collect())
    }

    /// Numeric cells (bools as 0/1)
    pub fn f64s(&self) -> Result<Vec<Option<f64>>, FrameError> {
        if !self.dtype.is_number_like() {
            return Err(self.mismatch(DType::Float64));
        }
        let values = compute::cast(self.array.as_ref(), &DataType::Float64)?;
        Ok(values.as_primitive::<Float64Type>().iter().collect())
    }

    /// Gather rows by index; `None` produces a missing value
    pub fn take(&self, indices: &[Option<usize>]) -> Result<Column, FrameError> {
        let indices: UInt64Array = indices.iter().map(|i| i.map(|i| i as u64)).collect();
        self.with_array(compute::take(self.array.as_ref(), &indices, None)?)
    }

    pub fn filter(&self, mask: &BooleanArray) -> Result<Column, FrameError> {
        self.with_array(compute::filter(self.array.as_ref(), mask)?)
    }

    /// Rows of `other` appended below this column's rows
    pub fn concat(&self, other: &Column) -> Result<Column, FrameError> {
        if self.dtype != other.dtype {
            return Err(other.mismatch(self.dtype));
        }
        self.with_array(compute::concat(&[self.array.as_ref(), other.array.as_ref()])?)
    }

    /// Convert to another dtype through arrow's cast kernel
    ///
    /// Categorical text reaches non-text dtypes through Utf8. Text never
    /// becomes a number.
    pub fn cast(&self, to: DType) -> Result<Column, FrameError> {
        if self.dtype == to {
            return Ok(self.clone());
        }
        if self.dtype.is_textual() && to.is_numeric() {
            return Err(FrameError::UnsupportedCast { from: self.dtype, to });
        }
        if self.dtype == DType::Categorical && to != DType::Utf8 {
            return self.cast(DType::Utf8)?.cast(to);
        }

        let target = to.to_arrow();
        if !compute::can_cast_types(self.array.data_type(), &target) {
            return Err(FrameError::UnsupportedCast { from: self.dtype, to });
        }
        self.with_array(compute::cast(self.array.as_ref(), &target)?)
    }

    /// Copy with missing values replaced by `value`
    ///
    /// Categorical columns are filled as text and re-encoded, so the fill
    /// becomes one more category.
    pub fn fill_null(&self, value: &Value) -> Result<Column, FrameError> {
        if self.dtype == DType::Categorical {
            return self.cast(DType::Utf8)?.fill_null(value)?.cast(DType::Categorical);
        }
        let fill = fill_scalar(self.dtype, value)?.ok_or_else(|| FrameError::InvalidFill {
            dtype: self.dtype,
            value: value.clone(),
        })?;
        if self.null_count() == 0 {
            return Ok(self.clone());
        }

        let present = compute::is_not_null(self.array.as_ref())?;
        self.with_array(zip(&present, &self.array, &Scalar::new(fill))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{DictionaryArray, Int32Array, Int64Array};
    use half::f16;

    fn categorical(values: Vec<Option<&str>>) -> Column {
        let array: DictionaryArray<Int32Type> = values.into_iter().collect();
        Column::new("provider", Arc::new(array)).unwrap()
    }

    #[test]
    fn test_unsupported_storage_is_rejected() {
        let result = Column::new("n", Arc::new(UInt64Array::from(vec![1u64])));
        assert!(matches!(result, Err(FrameError::UnsupportedType { .. })));
    }

    #[test]
    fn test_nan_reads_as_missing() {
        let column = Column::new("close", Arc::new(Float32Array::from(vec![1.0, f32::NAN]))).unwrap();
        assert_eq!(column.null_count(), 1);
        assert_eq!(column.f64s().unwrap(), vec![Some(1.0), None]);
    }

    #[test]
    fn test_take_with_missing() {
        let column = Column::new("close", Arc::new(Float32Array::from(vec![1.0, 2.0, 3.0]))).unwrap();
        let taken = column.take(&[Some(2), None, Some(0)]).unwrap();

        assert_eq!(taken.len(), 3);
        assert_eq!(taken.f64_at(0), Some(3.0));
        assert!(taken.is_null(1));
        assert_eq!(taken.f64_at(2), Some(1.0));
    }

    #[test]
    fn test_categorical_concat_merges_dictionaries() {
        let a = categorical(vec![Some("BUSINESS"), None]);
        let b = categorical(vec![Some("FEATURE"), Some("BUSINESS")]);

        let merged = a.concat(&b).unwrap();

        assert_eq!(merged.dtype(), DType::Categorical);
        assert_eq!(
            merged.strs().unwrap(),
            vec![Some("BUSINESS"), None, Some("FEATURE"), Some("BUSINESS")]
        );
    }

    #[test]
    fn test_concat_rejects_mixed_types() {
        let a = Column::new("x", Arc::new(Int32Array::from(vec![1]))).unwrap();
        let b = Column::new("x", Arc::new(Float32Array::from(vec![1.0]))).unwrap();
        assert!(matches!(a.concat(&b), Err(FrameError::TypeMismatch { .. })));
    }

    #[test]
    fn test_cast_bool_to_float16() {
        let column = Column::new(
            "marketCommentary",
            Arc::new(BooleanArray::from(vec![Some(true), Some(false), None])),
        )
        .unwrap();
        let cast = column.cast(DType::Float16).unwrap();

        assert_eq!(cast.dtype(), DType::Float16);
        assert_eq!(cast.array().as_primitive::<Float16Type>().value(0), f16::ONE);
        assert_eq!(cast.f64_at(1), Some(0.0));
        assert!(cast.is_null(2));
    }

    #[test]
    fn test_cast_text_to_bool() {
        let column = Column::new(
            "flag",
            Arc::new(StringArray::from(vec![Some("True"), Some("false"), None])),
        )
        .unwrap();
        let cast = column.cast(DType::Bool).unwrap();
        assert_eq!(
            cast.array().as_boolean(),
            &BooleanArray::from(vec![Some(true), Some(false), None])
        );
    }

    #[test]
    fn test_text_never_casts_to_number() {
        let column = categorical(vec![Some("1")]);
        assert!(matches!(
            column.cast(DType::Float32),
            Err(FrameError::UnsupportedCast { .. })
        ));
    }

    #[test]
    fn test_fill_categorical_adds_empty_category() {
        let filled = categorical(vec![Some("RTRS"), None])
            .fill_null(&Value::Str(String::new()))
            .unwrap();

        assert_eq!(filled.dtype(), DType::Categorical);
        assert_eq!(filled.str_at(1), Some(""));
        assert_eq!(filled.null_count(), 0);
    }

    #[test]
    fn test_fill_numeric_keeps_dtype() {
        let column = Column::new("urgency", Arc::new(Int64Array::from(vec![None, Some(3)]))).unwrap();
        let filled = column.fill_null(&Value::Int(0)).unwrap();

        assert_eq!(filled.dtype(), DType::Int64);
        assert_eq!(filled.f64s().unwrap(), vec![Some(0.0), Some(3.0)]);
    }

    #[test]
    fn test_fill_rejects_wrong_value() {
        let column = Column::new("headline", Arc::new(StringArray::from(vec![None::<&str>]))).unwrap();
        assert!(matches!(
            column.fill_null(&Value::Int(0)),
            Err(FrameError::InvalidFill { .. })
        ));
    }

    #[test]
    fn test_timestamps_round_trip_through_storage() {
        let t = DateTime::from_timestamp(1_262_642_400, 0).unwrap();
        let column = Column::new("time", timestamp_array(&[Some(t), None])).unwrap();

        assert_eq!(column.dtype(), DType::Timestamp);
        assert_eq!(column.timestamps().unwrap(), vec![Some(t), None]);
        assert_eq!(column.get(0), Value::Timestamp(t));

        let dates = column.cast(DType::Date).unwrap();
        assert_eq!(dates.dates().unwrap(), vec![Some(t.date_naive()), None]);
    }
}
