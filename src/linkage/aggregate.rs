//! Reduction of linked (market, news) rows back to one row per market id

use super::LinkError;
use crate::frame::{float64_array, Column, DType, Frame, Value};
use crate::schema::MARKET_COMMENTARY;
use arrow::array::{Int32Array, StringArray};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const JOIN_SEPARATOR: &str = ", ";

/// Numeric reduction over the non-missing values of one group
pub type NumericReducer = fn(&[f64]) -> f64;

#[derive(Debug, Clone, Copy)]
pub enum Reduction {
    /// First non-missing value of the group
    First,
    Mean,
    /// Stringify each member and join with `", "`
    Concat,
    Custom(NumericReducer),
}

impl PartialEq for Reduction {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Reduction::First, Reduction::First)
                | (Reduction::Mean, Reduction::Mean)
                | (Reduction::Concat, Reduction::Concat)
                | (Reduction::Custom(_), Reduction::Custom(_))
        )
    }
}

pub struct AggregationEngine {
    concat_features: Vec<String>,
    overrides: HashMap<String, Reduction>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn cell_text(column: &Column, row: usize) -> String {
    match column.str_at(row) {
        Some(s) => s.to_string(),
        None => column.get(row).to_string(),
    }
}

/// Commentary flags arrive as bools or text ("" meaning false); reduce them as 0/1
fn coerce_commentary(column: &Column) -> Result<Column, LinkError> {
    let column = if column.dtype().is_textual() {
        column.cast(DType::Bool)?.fill_null(&Value::Bool(false))?
    } else {
        column.clone()
    };
    Ok(column.cast(DType::Int8)?)
}

impl AggregationEngine {
    pub fn new(concat_features: Vec<String>) -> Self {
        Self {
            concat_features,
            overrides: HashMap::new(),
        }
    }

    /// Force a reduction for one column, taking precedence over the defaults
    pub fn register(&mut self, column: impl Into<String>, reduction: Reduction) {
        self.overrides.insert(column.into(), reduction);
    }

    pub fn reduction_for(&self, name: &str, dtype: DType, market_columns: &[String]) -> Reduction {
        if let Some(reduction) = self.overrides.get(name) {
            return *reduction;
        }
        if market_columns.iter().any(|c| c == name) {
            return Reduction::First;
        }
        if name == MARKET_COMMENTARY {
            return Reduction::Mean;
        }
        if self.concat_features.iter().any(|c| c == name) {
            return Reduction::Concat;
        }
        if dtype.is_numeric() {
            Reduction::Mean
        } else {
            Reduction::First
        }
    }

    /// Replace missing values in news-origin columns with neutral defaults
    ///
    /// Numbers become 0, text becomes "", bools become false. Categorical
    /// columns gain an empty category first. Temporal columns are left alone.
    pub fn fill_news_columns(frame: &mut Frame, columns: &[String]) -> Result<(), LinkError> {
        for name in columns {
            let column = frame.column(name)?;
            let fill = match column.dtype() {
                dtype if dtype.is_numeric() => Value::Int(0),
                DType::Utf8 | DType::Categorical => Value::Str(String::new()),
                DType::Bool => Value::Bool(false),
                _ => continue,
            };
            let filled = column.fill_null(&fill)?;
            frame.set_column(filled)?;
        }
        Ok(())
    }

    /// Group rows by `key` and reduce every other column
    ///
    /// The output is sorted by key with exactly one row per distinct key.
    /// Reduced columns are cast back to the class of their dtype in
    /// `dtypes_before`: narrow types to Float16, 32/64-bit floats and Int32
    /// to Float32. The key keeps its integer dtype.
    pub fn aggregate(
        &self,
        frame: &Frame,
        key: &str,
        market_columns: &[String],
        dtypes_before: &HashMap<String, DType>,
    ) -> Result<Frame, LinkError> {
        let key_column = frame.column(key)?;
        let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (row, id) in key_column.i32s()?.iter().enumerate() {
            if let Some(id) = id {
                groups.entry(*id).or_default().push(row);
            }
        }
        let members: Vec<&Vec<usize>> = groups.values().collect();

        let mut columns = Vec::with_capacity(frame.width());
        for column in frame.columns() {
            let name = column.name();
            if name == key {
                let ids = Int32Array::from_iter_values(groups.keys().copied());
                columns.push(Column::new(name, Arc::new(ids))?.cast(column.dtype())?);
                continue;
            }

            let reduction = self.reduction_for(name, column.dtype(), market_columns);
            debug!("{}: {:?}", name, reduction);

            let source = if name == MARKET_COMMENTARY {
                coerce_commentary(column)?
            } else {
                column.clone()
            };
            let mut reduced = Self::reduce(&source, &members, reduction)?;

            let restored = dtypes_before.get(name).and_then(DType::restored);
            if let Some(target) = restored {
                if reduced.dtype().is_number_like() {
                    reduced = reduced.cast(target)?;
                }
            }
            columns.push(reduced);
        }

        let aggregated = Frame::from_columns(columns)?;
        info!(
            "📊 aggregated {} linked rows into {} observations",
            frame.height(),
            aggregated.height()
        );
        Ok(aggregated)
    }

    fn reduce(
        column: &Column,
        members: &[&Vec<usize>],
        reduction: Reduction,
    ) -> Result<Column, LinkError> {
        let numeric_groups = || {
            members.iter().map(|rows| {
                rows.iter()
                    .filter_map(|&r| column.f64_at(r))
                    .collect::<Vec<f64>>()
            })
        };

        match reduction {
            Reduction::First => {
                let picks: Vec<Option<usize>> = members
                    .iter()
                    .map(|rows| {
                        rows.iter()
                            .find(|&&r| !column.is_null(r))
                            .or_else(|| rows.first())
                            .copied()
                    })
                    .collect();
                Ok(column.take(&picks)?)
            }
            Reduction::Mean => {
                let means = numeric_groups().map(|v| Some(mean(&v))).collect();
                Ok(Column::new(column.name(), float64_array(means))?)
            }
            Reduction::Custom(f) => {
                let values = numeric_groups().map(|v| Some(f(&v))).collect();
                Ok(Column::new(column.name(), float64_array(values))?)
            }
            Reduction::Concat => {
                let joined: StringArray = members
                    .iter()
                    .map(|rows| {
                        Some(
                            rows.iter()
                                .map(|&r| cell_text(column, r))
                                .collect::<Vec<_>>()
                                .join(JOIN_SEPARATOR),
                        )
                    })
                    .collect();
                Ok(Column::new(column.name(), Arc::new(joined))?)
            }
        }
    }
}
