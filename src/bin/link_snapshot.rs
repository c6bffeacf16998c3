//! link_snapshot - run preparation and linkage only, then write the snapshot
//!
//! Useful for inspecting what the linker produces without training a model.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin link_snapshot -- --backend csv
//! ```
//!
//! Reads the same NEWSFLOW_* variables as the main binary; only the training
//! paths, the linkage settings and NEWSFLOW_SNAPSHOT_PATH are used.

use newsflow::config::{BackendType, Settings};
use newsflow::loader::{load_market, load_news};
use newsflow::runner::prepare_training;
use newsflow::snapshot::SnapshotWriter;
use newsflow::timing::measure;
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    let backend = BackendType::parse_from_args(&args)?;
    let settings = Settings::from_env()?;

    log::info!("🔗 Starting link_snapshot");
    log::info!("   Output: {}", settings.snapshot_path.display());

    let market = measure("load market", || load_market(&settings.market_path))?;
    let news = measure("load news", || load_news(&settings.news_path))?;
    let prepared = prepare_training(&settings, market, news)?;

    if let Some(linker) = &prepared.linker {
        let stats = linker.stats();
        log::info!(
            "   Pairs: {} same-day, {} fallback, {} unmatched",
            stats.same_day,
            stats.fallback,
            stats.unmatched
        );
    }

    let mut writer = SnapshotWriter::new(backend, settings.snapshot_path.clone())?;
    let rows = writer.write_frame(&prepared.frame)?;
    log::info!("✅ {} rows written ({})", rows, writer.backend_type());
    Ok(())
}
