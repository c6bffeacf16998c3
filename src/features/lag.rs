//! Rolling lag statistics per asset
//!
//! Rows are grouped by asset code and ordered by time inside each group; the
//! frame keeps its row order. Each group is handled by
//! one task on a fixed-size rayon pool. For every lag column and window the
//! previous `window` observations (after a shift of one row) yield a mean, a
//! max and a min. A window containing a missing value, or reaching before the
//! first observation, produces a missing statistic that is later imputed.

use super::FeatureError;
use crate::config::ScaleType;
use crate::frame::{float32_array, Column, Frame};
use crate::preprocess::{fit_mean_imputer, fit_scaler, ColumnTransform};
use crate::schema::{ASSET_CODE, TIME};
use crate::timing::measure;
use log::{debug, info};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::{BTreeMap, HashMap};

pub const LAG_FEATURES: [&str; 4] = [
    "returnsClosePrevMktres10",
    "returnsClosePrevRaw10",
    "open",
    "close",
];

pub const DEFAULT_WINDOWS: [usize; 3] = [3, 7, 14];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagStat {
    Mean,
    Max,
    Min,
}

impl LagStat {
    const ALL: [LagStat; 3] = [LagStat::Mean, LagStat::Max, LagStat::Min];

    fn as_str(&self) -> &'static str {
        match self {
            LagStat::Mean => "mean",
            LagStat::Max => "max",
            LagStat::Min => "min",
        }
    }

    fn compute(&self, window: &[f64]) -> f64 {
        match self {
            LagStat::Mean => window.iter().sum::<f64>() / window.len() as f64,
            LagStat::Max => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            LagStat::Min => window.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }
}

pub fn lag_column_name(column: &str, window: usize, stat: LagStat) -> String {
    format!("{}_lag_{}_{}", column, window, stat.as_str())
}

/// Statistics of one rolling window over `values`, missing where undefined
fn rolling(values: &[f64], window: usize, shift: usize, stat: LagStat) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i < shift + window - 1 {
                return f64::NAN;
            }
            let end = i + 1 - shift;
            let slice = &values[end - window..end];
            if slice.iter().any(|x| x.is_nan()) {
                f64::NAN
            } else {
                stat.compute(slice)
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct LagAggregationTransformer {
    windows: Vec<usize>,
    shift_size: usize,
    scale: Option<ScaleType>,
    remove_raw: bool,
    workers: usize,
    scalers: Option<HashMap<String, ColumnTransform>>,
    imputers: Option<HashMap<String, ColumnTransform>>,
}

impl LagAggregationTransformer {
    pub fn new(
        windows: Vec<usize>,
        shift_size: usize,
        scale: Option<ScaleType>,
        remove_raw: bool,
        workers: usize,
    ) -> Self {
        Self {
            windows,
            shift_size,
            scale,
            remove_raw,
            workers: workers.max(1),
            scalers: None,
            imputers: None,
        }
    }

    pub fn output_columns(&self) -> Vec<String> {
        let mut names = Vec::new();
        for column in LAG_FEATURES {
            for window in &self.windows {
                for stat in LagStat::ALL {
                    names.push(lag_column_name(column, *window, stat));
                }
            }
        }
        names
    }

    fn extract_group(&self, rows: &[usize], raw: &[Vec<f64>]) -> (Vec<usize>, Vec<Vec<f64>>) {
        let mut features = Vec::with_capacity(LAG_FEATURES.len() * self.windows.len() * 3);
        for values in raw {
            let group: Vec<f64> = rows.iter().map(|&r| values[r]).collect();
            for window in &self.windows {
                for stat in LagStat::ALL {
                    features.push(rolling(&group, *window, self.shift_size, stat));
                }
            }
        }
        (rows.to_vec(), features)
    }

    /// Append lag features; the first call fits scalers and imputers
    pub fn transform(&mut self, frame: Frame) -> Result<Frame, FeatureError> {
        measure("lag_aggregation", || self.transform_inner(frame))
    }

    fn transform_inner(&mut self, mut frame: Frame) -> Result<Frame, FeatureError> {
        info!("start extract lag...");
        let times = frame.column(TIME)?.timestamps()?;
        let mut order: Vec<usize> = (0..frame.height()).collect();
        order.sort_by_key(|&i| times[i]);

        // row order of the frame is kept; each group lists its rows by time
        let codes = frame.column(ASSET_CODE)?.strs()?;
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for row in order {
            groups
                .entry(codes[row].unwrap_or_default().to_string())
                .or_default()
                .push(row);
        }

        debug!("lag groups: {}", groups.len());

        let raw: Vec<Vec<f64>> = LAG_FEATURES
            .iter()
            .map(|name| -> Result<Vec<f64>, FeatureError> {
                Ok(frame
                    .column(name)?
                    .f64s()?
                    .into_iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect())
            })
            .collect::<Result<_, _>>()?;

        let pool = ThreadPoolBuilder::new().num_threads(self.workers).build()?;
        let partials: Vec<(Vec<usize>, Vec<Vec<f64>>)> = pool.install(|| {
            groups
                .values()
                .collect::<Vec<_>>()
                .par_iter()
                .map(|rows| self.extract_group(rows, &raw))
                .collect()
        });

        let names = self.output_columns();
        let mut outputs = vec![vec![f64::NAN; frame.height()]; names.len()];
        for (rows, features) in partials {
            for (output, values) in outputs.iter_mut().zip(features) {
                for (row, value) in rows.iter().zip(values) {
                    output[*row] = value;
                }
            }
        }

        if let Some(scale) = self.scale {
            let scalers = self.scalers.get_or_insert_with(|| {
                names
                    .iter()
                    .zip(&outputs)
                    .map(|(name, values)| (name.clone(), fit_scaler(scale, values)))
                    .collect()
            });
            for (name, values) in names.iter().zip(outputs.iter_mut()) {
                if let Some(scaler) = scalers.get(name) {
                    *values = scaler.apply_all(values);
                }
            }
        }

        if self.remove_raw {
            frame.drop_columns(&LAG_FEATURES);
        }

        let imputers = self.imputers.get_or_insert_with(|| {
            names
                .iter()
                .zip(&outputs)
                .map(|(name, values)| (name.clone(), fit_mean_imputer(values)))
                .collect()
        });
        for (name, values) in names.iter().zip(outputs) {
            let values = match imputers.get(name) {
                Some(imputer) => imputer.apply_all(&values),
                None => values,
            };
            frame.set_column(Column::new(name.as_str(), float32_array(&values))?)?;
        }

        info!("Lag Aggregation has done");
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::timestamp_array;
    use approx::assert_relative_eq;
    use arrow::array::{ArrayRef, DictionaryArray, Float32Array, Int32Array};
    use arrow::datatypes::Int32Type;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[test]
    fn test_rolling_with_shift() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mean = rolling(&values, 3, 1, LagStat::Mean);

        assert!(mean[..3].iter().all(|x| x.is_nan()));
        assert_eq!(mean[3], 2.0);
        assert_eq!(mean[4], 3.0);
        assert_eq!(rolling(&values, 3, 1, LagStat::Max)[4], 4.0);
        assert_eq!(rolling(&values, 3, 1, LagStat::Min)[4], 2.0);
    }

    #[test]
    fn test_rolling_missing_value_poisons_window() {
        let values = [1.0, f64::NAN, 3.0, 4.0, 5.0];
        let mean = rolling(&values, 2, 1, LagStat::Mean);
        assert!(mean[2].is_nan());
        assert!(mean[3].is_nan());
        assert_eq!(mean[4], 3.5);
    }

    fn market() -> Frame {
        // two assets interleaved, given out of time order
        let days = [3u32, 1, 2, 4, 1, 2, 3, 4];
        let codes = ["A", "A", "A", "A", "B", "B", "B", "B"];
        let closes = [3.0f32, 1.0, 2.0, 4.0, 10.0, 20.0, 30.0, 40.0];
        let n = days.len();

        let times: Vec<_> = days
            .iter()
            .map(|d| Some(Utc.with_ymd_and_hms(2010, 1, *d, 22, 0, 0).unwrap()))
            .collect();
        let codes: DictionaryArray<Int32Type> = codes.into_iter().collect();
        let floats = |values: Vec<f32>| Arc::new(Float32Array::from(values)) as ArrayRef;

        Frame::try_from_iter([
            (TIME, timestamp_array(&times)),
            (ASSET_CODE, Arc::new(codes) as ArrayRef),
            ("returnsClosePrevMktres10", floats(vec![0.1; n])),
            ("returnsClosePrevRaw10", floats(vec![0.2; n])),
            ("open", floats(closes.to_vec())),
            ("close", floats(closes.to_vec())),
            ("id", Arc::new(Int32Array::from_iter_values(1..=n as i32)) as ArrayRef),
        ])
        .unwrap()
    }

    fn value_for(frame: &Frame, id: i32, column: &str) -> f64 {
        let ids = frame.column("id").unwrap().i32s().unwrap();
        let row = ids.iter().position(|x| *x == Some(id)).unwrap();
        frame.column(column).unwrap().f64_at(row).unwrap()
    }

    #[test]
    fn test_groups_are_independent_and_time_ordered() {
        let mut lag = LagAggregationTransformer::new(vec![2], 1, None, true, 2);
        let out = lag.transform(market()).unwrap();

        let ids = out.column("id").unwrap().i32s().unwrap();
        assert_eq!(ids, (1..=8).map(Some).collect::<Vec<_>>());
        assert!(!out.contains("close"));
        assert_eq!(out.height(), 8);
        // asset A day 4 (id 4): previous two closes are days 2 and 3
        assert_relative_eq!(value_for(&out, 4, "close_lag_2_mean"), 2.5, epsilon = 1e-6);
        // asset B day 3 (id 7): days 1 and 2
        assert_relative_eq!(value_for(&out, 7, "close_lag_2_max"), 20.0, epsilon = 1e-6);
        assert_eq!(out.column("close_lag_2_min").unwrap().null_count(), 0);
    }

    #[test]
    fn test_imputer_is_fitted_once() {
        let mut lag = LagAggregationTransformer::new(vec![2], 1, None, false, 1);
        let first = lag.transform(market()).unwrap();
        // undefined windows are filled with the fitted mean
        let filled = value_for(&first, 2, "close_lag_2_mean");
        assert!(filled.is_finite());

        let second = lag.transform(market()).unwrap();
        assert_relative_eq!(value_for(&second, 2, "close_lag_2_mean"), filled, epsilon = 1e-6);
        assert_eq!(lag.output_columns().len(), 12);
    }
}
