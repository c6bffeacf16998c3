//! Prior trading-day alignment between market dates and news dates

use chrono::{Duration, NaiveDate};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

pub struct DateAligner {
    max_day_diff: u32,
}

impl DateAligner {
    pub fn new(max_day_diff: u32) -> Self {
        Self { max_day_diff }
    }

    /// Map each market date to the latest news date in `[date - max_day_diff, date - 1]`
    ///
    /// Market dates without any news date in that window are absent from the
    /// result. A window of zero days yields an empty map.
    pub fn align<M, N>(&self, market_dates: M, news_dates: N) -> BTreeMap<NaiveDate, NaiveDate>
    where
        M: IntoIterator<Item = NaiveDate>,
        N: IntoIterator<Item = NaiveDate>,
    {
        if self.max_day_diff == 0 {
            return BTreeMap::new();
        }

        let news_index: BTreeSet<NaiveDate> = news_dates.into_iter().collect();
        let window = Duration::days(i64::from(self.max_day_diff));

        let aligned: BTreeMap<NaiveDate, NaiveDate> = market_dates
            .into_iter()
            .filter_map(|date| {
                let latest = date - Duration::days(1);
                let earliest = date - window;
                news_index
                    .range(earliest..=latest)
                    .next_back()
                    .map(|prev| (date, *prev))
            })
            .collect();

        debug!(
            "aligned {} market dates onto {} news dates",
            aligned.len(),
            news_index.len()
        );
        aligned
    }
}
