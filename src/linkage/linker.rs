//! Market ↔ news row linkage
//!
//! One `link` call walks the stages `Init → CodesLinked → DatesAligned →
//! IdsLinked`; `create_new_market_frame` then aggregates (`Aggregated`) and
//! releases the call-scoped frame (`Done`). The linker itself only keeps its
//! [`LinkSettings`] between calls, so the same instance serves training and
//! every prediction day.

use super::aggregate::AggregationEngine;
use super::asset_codes::AssetCodeResolver;
use super::dates::DateAligner;
use super::LinkError;
use crate::config::Settings;
use crate::frame::{date_array, Column, DType, Frame};
use crate::ids::validate_ids;
use crate::schema::{ASSET_CODE, ASSET_CODES, FIRST_CREATED, MARKET_ID, NEWS_ID, TIME};
use crate::timing::measure;
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::HashMap;

const DATE: &str = "date";
const PREV_DATE: &str = "prevDate";

/// Helper columns removed before aggregation
pub const LINK_COLUMNS: [&str; 7] = [
    DATE,
    PREV_DATE,
    "newsAssetCodes",
    ASSET_CODES,
    FIRST_CREATED,
    "firstCreatedDate",
    NEWS_ID,
];

/// News columns used for matching rather than as content
const NEWS_KEY_COLUMNS: [&str; 3] = [ASSET_CODES, FIRST_CREATED, NEWS_ID];

/// Fitted linkage parameters, reused unchanged at inference
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub concat_features: Vec<String>,
    pub max_day_diff: u32,
}

impl LinkSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            concat_features: settings.concat_features.clone(),
            max_day_diff: settings.max_day_diff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStage {
    Init,
    CodesLinked,
    DatesAligned,
    IdsLinked,
    Aggregated,
    Done,
}

/// Frames and schema captured during one `link` call
struct LinkSession {
    linked: Frame,
    market_columns: Vec<String>,
    dtypes_before: HashMap<String, DType>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub same_day: usize,
    pub fallback: usize,
    pub unmatched: usize,
}

pub struct MarketNewsLinker {
    settings: LinkSettings,
    aggregator: AggregationEngine,
    stage: LinkStage,
    session: Option<LinkSession>,
    stats: LinkStats,
}

fn dates_of(frame: &Frame, column: &str) -> Result<Vec<Option<NaiveDate>>, LinkError> {
    Ok(frame
        .column(column)?
        .timestamps()?
        .iter()
        .map(|t| t.map(|t| t.date_naive()))
        .collect())
}

impl MarketNewsLinker {
    pub fn new(settings: LinkSettings) -> Self {
        let aggregator = AggregationEngine::new(settings.concat_features.clone());
        Self {
            settings,
            aggregator,
            stage: LinkStage::Init,
            session: None,
            stats: LinkStats::default(),
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn stage(&self) -> LinkStage {
        self.stage
    }

    /// Pair counts of the most recent `link` call
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Reductions can be overridden per column before linking
    pub fn aggregator_mut(&mut self) -> &mut AggregationEngine {
        &mut self.aggregator
    }

    fn expect_stage(&self, expected: LinkStage) -> Result<(), LinkError> {
        if self.stage != expected {
            return Err(LinkError::InvalidStage {
                expected,
                actual: self.stage,
            });
        }
        Ok(())
    }

    /// Join every market row to its matching news rows
    ///
    /// Same-day pairs need `time > firstCreated`; fallback pairs match the
    /// aligned prior news date with no time filter. Pairs of one market row
    /// keep that order (same-day first) and rows without any pair are kept
    /// once with missing news fields.
    pub fn link(&mut self, market: &Frame, news: &Frame) -> Result<(), LinkError> {
        if self.stage == LinkStage::Done {
            self.clear();
        }
        self.expect_stage(LinkStage::Init)?;
        measure("link", || self.link_inner(market, news))
    }

    fn link_inner(&mut self, market: &Frame, news: &Frame) -> Result<(), LinkError> {
        // aggregation groups by market id, so a repeated id would merge rows
        validate_ids(market, MARKET_ID)?;
        validate_ids(news, NEWS_ID)?;

        let market_names = market.column_names();
        let collisions: Vec<String> = news
            .column_names()
            .into_iter()
            .filter(|name| !NEWS_KEY_COLUMNS.contains(&name.as_str()))
            .filter(|name| market_names.contains(name))
            .collect();
        if !collisions.is_empty() {
            return Err(LinkError::ColumnCollision(collisions));
        }

        let market_codes = market.column(ASSET_CODE)?.strs()?;
        let news_codes = news.column(ASSET_CODES)?.strs()?;
        let links = AssetCodeResolver::resolve(
            market_codes.iter().flatten().copied(),
            news_codes.iter().flatten().copied(),
        );
        self.stage = LinkStage::CodesLinked;

        let market_times = market.column(TIME)?.timestamps()?;
        let market_dates = dates_of(market, TIME)?;
        let first_created = news.column(FIRST_CREATED)?.timestamps()?;
        let news_dates = dates_of(news, FIRST_CREATED)?;
        let aligned = DateAligner::new(self.settings.max_day_diff).align(
            market_dates.iter().flatten().copied(),
            news_dates.iter().flatten().copied(),
        );
        self.stage = LinkStage::DatesAligned;

        let mut news_index: HashMap<(&str, NaiveDate), Vec<usize>> = HashMap::new();
        for (row, (codes, date)) in news_codes.iter().zip(&news_dates).enumerate() {
            if let (Some(codes), Some(date)) = (codes, date) {
                news_index.entry((*codes, *date)).or_default().push(row);
            }
        }

        let mut stats = LinkStats::default();
        let mut market_rows: Vec<Option<usize>> = Vec::with_capacity(market.height());
        let mut news_rows: Vec<Option<usize>> = Vec::with_capacity(market.height());
        let mut prev_dates: Vec<Option<NaiveDate>> = Vec::with_capacity(market.height());

        for row in 0..market.height() {
            let date = market_dates[row];
            let prev = date.and_then(|d| aligned.get(&d).copied());
            let linked_values = market_codes[row].map_or(&[][..], |c| links.news_values_for(c));
            let before = news_rows.len();

            if let (Some(date), Some(time)) = (date, market_times[row]) {
                for raw in linked_values {
                    for &j in news_index.get(&(raw.as_str(), date)).into_iter().flatten() {
                        if first_created[j].map_or(false, |created| time > created) {
                            news_rows.push(Some(j));
                            stats.same_day += 1;
                        }
                    }
                }
            }
            if let Some(prev) = prev {
                for raw in linked_values {
                    for &j in news_index.get(&(raw.as_str(), prev)).into_iter().flatten() {
                        news_rows.push(Some(j));
                        stats.fallback += 1;
                    }
                }
            }
            if news_rows.len() == before {
                news_rows.push(None);
                stats.unmatched += 1;
            }

            let pairs = news_rows.len() - before;
            market_rows.extend(std::iter::repeat(Some(row)).take(pairs));
            prev_dates.extend(std::iter::repeat(prev).take(pairs));
        }
        self.stage = LinkStage::IdsLinked;

        info!(
            "🔗 linked {} market rows: {} same-day pairs, {} fallback pairs, {} without news",
            market.height(),
            stats.same_day,
            stats.fallback,
            stats.unmatched
        );

        let mut linked = market.take_rows(&market_rows)?;
        let row_dates: Vec<Option<NaiveDate>> =
            market_rows.iter().map(|r| r.and_then(|r| market_dates[r])).collect();
        linked.push_column(Column::new(DATE, date_array(&row_dates))?)?;
        linked.push_column(Column::new(PREV_DATE, date_array(&prev_dates))?)?;
        for column in news.columns() {
            linked.push_column(column.take(&news_rows)?)?;
        }
        debug!("linked frame shape: {:?}", linked.shape());

        let mut dtypes_before: HashMap<String, DType> = market.schema().into_iter().collect();
        dtypes_before.extend(news.schema());

        self.stats = stats;
        self.session = Some(LinkSession {
            linked,
            market_columns: market_names,
            dtypes_before,
        });
        Ok(())
    }

    /// Aggregate the linked frame into one row per market id and release it
    pub fn create_new_market_frame(&mut self) -> Result<Frame, LinkError> {
        self.expect_stage(LinkStage::IdsLinked)?;
        let LinkSession {
            mut linked,
            market_columns,
            dtypes_before,
        } = self.session.take().ok_or(LinkError::InvalidStage {
            expected: LinkStage::IdsLinked,
            actual: LinkStage::Done,
        })?;

        measure("create_new_market_frame", || -> Result<Frame, LinkError> {
            linked.drop_columns(&LINK_COLUMNS);
            let news_columns: Vec<String> = linked
                .column_names()
                .into_iter()
                .filter(|name| !market_columns.contains(name))
                .collect();
            AggregationEngine::fill_news_columns(&mut linked, &news_columns)?;

            let aggregated =
                self.aggregator
                    .aggregate(&linked, MARKET_ID, &market_columns, &dtypes_before)?;
            self.stage = LinkStage::Aggregated;
            info!("✅ linking done: {:?}", aggregated.shape());
            Ok(aggregated)
        })
        .map(|aggregated| {
            self.stage = LinkStage::Done;
            aggregated
        })
    }

    /// Drop any call-scoped state and return to `Init`
    pub fn clear(&mut self) {
        self.session = None;
        self.stage = LinkStage::Init;
    }

    /// `link`, `create_new_market_frame` and `clear` in one call
    pub fn link_and_aggregate(&mut self, market: &Frame, news: &Frame) -> Result<Frame, LinkError> {
        let result = self
            .link(market, news)
            .and_then(|_| self.create_new_market_frame());
        self.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::timestamp_array;
    use crate::ids::IdError;
    use arrow::array::{ArrayRef, DictionaryArray, Float32Array, Int32Array, Int8Array, StringArray};
    use arrow::datatypes::Int32Type;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            concat_features: vec!["headline".to_string()],
            max_day_diff: 3,
        }
    }

    fn market(codes: &[&str], times: Vec<Option<DateTime<Utc>>>) -> Frame {
        let n = codes.len() as i32;
        let codes: DictionaryArray<Int32Type> = codes.iter().copied().collect();
        Frame::try_from_iter([
            (TIME, timestamp_array(&times)),
            (ASSET_CODE, Arc::new(codes) as ArrayRef),
            ("close", Arc::new(Float32Array::from_iter_values((0..n).map(|i| i as f32))) as ArrayRef),
            (MARKET_ID, Arc::new(Int32Array::from_iter_values(1..=n)) as ArrayRef),
        ])
        .unwrap()
    }

    fn news(codes: &[&str], created: Vec<Option<DateTime<Utc>>>, headlines: &[&str]) -> Frame {
        let n = codes.len() as i32;
        Frame::try_from_iter([
            (ASSET_CODES, Arc::new(StringArray::from(codes.to_vec())) as ArrayRef),
            (FIRST_CREATED, timestamp_array(&created)),
            ("headline", Arc::new(StringArray::from(headlines.to_vec())) as ArrayRef),
            ("urgency", Arc::new(Int8Array::from(vec![1; codes.len()])) as ArrayRef),
            (NEWS_ID, Arc::new(Int32Array::from_iter_values(1..=n)) as ArrayRef),
        ])
        .unwrap()
    }

    fn headlines(frame: &Frame) -> Vec<String> {
        let column = frame.column("headline").unwrap();
        (0..frame.height())
            .map(|i| column.str_at(i).unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_two_day_scenario_early_market_snapshot() {
        let market = market(&["A", "A"], vec![ts(2010, 1, 2, 7), ts(2010, 1, 3, 7)]);
        let news = news(&["{'A'}"], vec![ts(2010, 1, 2, 8)], &["alpha"]);

        let mut linker = MarketNewsLinker::new(settings());
        let out = linker.link_and_aggregate(&market, &news).unwrap();

        assert_eq!(out.height(), 2);
        assert_eq!(headlines(&out), vec!["", "alpha"]);
        assert_eq!(linker.stage(), LinkStage::Init);
    }

    #[test]
    fn test_two_day_scenario_late_market_snapshot() {
        let market = market(&["A", "A"], vec![ts(2010, 1, 2, 22), ts(2010, 1, 3, 22)]);
        let news = news(&["{'A'}"], vec![ts(2010, 1, 2, 8)], &["alpha"]);

        let mut linker = MarketNewsLinker::new(settings());
        let out = linker.link_and_aggregate(&market, &news).unwrap();

        assert_eq!(out.height(), 2);
        assert_eq!(headlines(&out), vec!["alpha", "alpha"]);
    }

    #[test]
    fn test_same_day_requires_strictly_later_market_time() {
        let market = market(&["A"], vec![ts(2010, 1, 2, 8)]);
        let news = news(&["{'A'}"], vec![ts(2010, 1, 2, 8)], &["tie"]);

        let mut linker = MarketNewsLinker::new(settings());
        linker.link(&market, &news).unwrap();
        assert_eq!(linker.stats().same_day, 0);
        assert_eq!(linker.stats().unmatched, 1);

        let out = linker.create_new_market_frame().unwrap();
        assert_eq!(headlines(&out), vec![""]);
        assert_eq!(linker.stage(), LinkStage::Done);
    }

    #[test]
    fn test_unmatched_code_survives_left_join() {
        let market = market(&["A", "Z"], vec![ts(2010, 1, 4, 22), ts(2010, 1, 4, 22)]);
        let news = news(
            &["{'A', 'B'}", "{'A'}"],
            vec![ts(2010, 1, 4, 9), ts(2010, 1, 4, 10)],
            &["first", "second"],
        );

        let mut linker = MarketNewsLinker::new(settings());
        let out = linker.link_and_aggregate(&market, &news).unwrap();

        assert_eq!(out.height(), 2);
        assert_eq!(headlines(&out), vec!["first, second", ""]);
        assert_eq!(out.column("urgency").unwrap().f64_at(1), Some(0.0));
        assert!(!out.contains(NEWS_ID));
        assert!(!out.contains(FIRST_CREATED));
    }

    #[test]
    fn test_zero_matches_is_not_an_error() {
        let market = market(&["A"], vec![ts(2010, 1, 4, 22)]);
        let news = news(&["{'Q'}"], vec![ts(2010, 1, 4, 9)], &["other"]);

        let mut linker = MarketNewsLinker::new(settings());
        let out = linker.link_and_aggregate(&market, &news).unwrap();
        assert_eq!(out.height(), 1);
        assert_eq!(headlines(&out), vec![""]);
    }

    #[test]
    fn test_column_collision_is_fatal() {
        let market = market(&["A"], vec![ts(2010, 1, 4, 22)]);
        let mut news = news(&["{'A'}"], vec![ts(2010, 1, 4, 9)], &["x"]);
        news.push_column(Column::new("close", Arc::new(Float32Array::from(vec![1.0]))).unwrap())
            .unwrap();

        let mut linker = MarketNewsLinker::new(settings());
        assert!(matches!(
            linker.link(&market, &news),
            Err(LinkError::ColumnCollision(cols)) if cols == vec!["close".to_string()]
        ));
    }

    #[test]
    fn test_duplicate_market_id_is_fatal() {
        let mut market = market(&["A", "B"], vec![ts(2010, 1, 4, 22), ts(2010, 1, 4, 22)]);
        market
            .set_column(Column::new(MARKET_ID, Arc::new(Int32Array::from(vec![1, 1]))).unwrap())
            .unwrap();
        let news = news(&["{'A'}"], vec![ts(2010, 1, 4, 9)], &["x"]);

        let mut linker = MarketNewsLinker::new(settings());
        assert!(matches!(
            linker.link_and_aggregate(&market, &news),
            Err(LinkError::Id(IdError::Duplicate { value: 1, .. }))
        ));
        assert_eq!(linker.stage(), LinkStage::Init);
    }

    #[test]
    fn test_missing_news_id_is_fatal() {
        let market = market(&["A"], vec![ts(2010, 1, 4, 22)]);
        let mut news = news(&["{'A'}", "{'A'}"], vec![ts(2010, 1, 4, 9), ts(2010, 1, 4, 10)], &["x", "y"]);
        news.set_column(Column::new(NEWS_ID, Arc::new(Int32Array::from(vec![Some(1), None]))).unwrap())
            .unwrap();

        let mut linker = MarketNewsLinker::new(settings());
        assert!(matches!(
            linker.link(&market, &news),
            Err(LinkError::Id(IdError::Missing { null_count: 1, .. }))
        ));
    }

    #[test]
    fn test_aggregate_before_link_is_rejected() {
        let mut linker = MarketNewsLinker::new(settings());
        assert!(matches!(
            linker.create_new_market_frame(),
            Err(LinkError::InvalidStage { .. })
        ));
    }

    #[test]
    fn test_fallback_outside_window_is_not_linked() {
        let market = market(&["A"], vec![ts(2010, 1, 10, 22)]);
        let news = news(&["{'A'}"], vec![ts(2010, 1, 5, 9)], &["old"]);

        let mut linker = MarketNewsLinker::new(settings());
        let out = linker.link_and_aggregate(&market, &news).unwrap();
        assert_eq!(headlines(&out), vec![""]);
    }
}
