//! Rolling market/news history for the prediction-day path
//!
//! Each prediction day brings a fresh market and news frame. With a positive
//! retention the buffer keeps the rows of the last `max_store_days` days so
//! that lag features can see past observations; the rows of the new day
//! start at `predict_start_id`.

use crate::frame::{Frame, FrameError};
use crate::ids::assign_ids;
use crate::schema::{FIRST_CREATED, MARKET_ID, NEWS_ID, TIME};
use chrono::{DateTime, Duration, Utc};
use log::debug;

/// History handed to one prediction day
#[derive(Debug, Clone)]
pub struct StreamingContext {
    pub market: Frame,
    pub news: Frame,
    /// Id of the first market row belonging to the new day
    pub predict_start_id: i32,
}

pub struct StreamingContextBuffer {
    max_store_days: u32,
    market: Option<Frame>,
    news: Option<Frame>,
}

fn keep_since(frame: &Frame, column: &str, cutoff: DateTime<Utc>) -> Result<Frame, FrameError> {
    let mask: Vec<bool> = frame
        .column(column)?
        .timestamps()?
        .iter()
        .map(|t| t.map_or(false, |t| t >= cutoff))
        .collect();
    frame.filter_rows(&mask)
}

impl StreamingContextBuffer {
    pub fn new(max_store_days: u32) -> Self {
        Self {
            max_store_days,
            market: None,
            news: None,
        }
    }

    /// Market rows currently held (including the latest day)
    pub fn market_rows(&self) -> usize {
        self.market.as_ref().map_or(0, Frame::height)
    }

    /// Add a new day and return fresh-id copies of the retained history
    pub fn advance(
        &mut self,
        new_market: Frame,
        new_news: Frame,
    ) -> Result<StreamingContext, FrameError> {
        let predict_start_id = match (self.market.take(), self.news.take()) {
            (Some(market), Some(news)) if self.max_store_days > 0 => {
                let max_time = new_market
                    .column(TIME)?
                    .timestamps()?
                    .iter()
                    .flatten()
                    .max()
                    .copied();

                let (market, news) = match max_time {
                    Some(max_time) => {
                        let cutoff = max_time - Duration::days(i64::from(self.max_store_days));
                        (
                            keep_since(&market, TIME, cutoff)?,
                            keep_since(&news, FIRST_CREATED, cutoff)?,
                        )
                    }
                    None => (market, news),
                };

                let retained = market.height();
                debug!(
                    "retained {} market rows and {} news rows of history",
                    retained,
                    news.height()
                );
                self.market = Some(market.vstack(new_market)?);
                self.news = Some(news.vstack(new_news)?);
                retained as i32 + 1
            }
            _ => {
                self.market = Some(new_market);
                self.news = Some(new_news);
                1
            }
        };

        let mut market = self.market.clone().unwrap_or_default();
        let mut news = self.news.clone().unwrap_or_default();
        assign_ids(&mut market, MARKET_ID)?;
        assign_ids(&mut news, NEWS_ID)?;

        Ok(StreamingContext {
            market,
            news,
            predict_start_id,
        })
    }
}
