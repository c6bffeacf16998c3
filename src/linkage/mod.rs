//! Market/news linkage and temporal aggregation
//!
//! Joins market observations to the news records that mention their asset,
//! either on the same day (news created strictly before the observation) or
//! on the nearest prior news day, then reduces the fan-out back to one row
//! per market observation.
//!
//! # Architecture
//!
//! ```text
//! market frame + news frame
//!     ↓
//! AssetCodeResolver (market code ∈ parsed news code set)
//!     ↓
//! DateAligner (market date → latest news date within max_day_diff)
//!     ↓
//! MarketNewsLinker (same-day pairs + prior-day fallback, left join)
//!     ↓
//! AggregationEngine (per-column reductions, dtype restoration)
//!     ↓
//! one row per market id
//! ```

pub mod aggregate;
pub mod asset_codes;
pub mod dates;
pub mod linker;

pub use aggregate::{AggregationEngine, Reduction};
pub use asset_codes::{AssetCodeLink, AssetCodeResolver, CodeLinks};
pub use dates::DateAligner;
pub use linker::{LinkSettings, LinkStage, MarketNewsLinker};

use crate::frame::FrameError;
use crate::ids::IdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error("news columns collide with market columns: {0:?}")]
    ColumnCollision(Vec<String>),

    #[error("linker is in stage {actual:?}, expected {expected:?}")]
    InvalidStage {
        expected: LinkStage,
        actual: LinkStage,
    },
}
