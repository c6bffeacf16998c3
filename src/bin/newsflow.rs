//! newsflow - train on the static market/news files, then replay prediction days
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin newsflow -- --backend sqlite
//! ```
//!
//! ## Environment Variables
//!
//! - NEWSFLOW_MODEL_TYPE - lgb/gbm or mlp (default: lgb)
//! - NEWSFLOW_MARKET_PATH / NEWSFLOW_NEWS_PATH - training CSVs
//! - NEWSFLOW_PREDICT_MARKET_PATH / NEWSFLOW_PREDICT_NEWS_PATH - prediction-day CSVs (optional)
//! - NEWSFLOW_SNAPSHOT_PATH - post-linkage snapshot, CSV file or SQLite db per --backend
//! - NEWSFLOW_CHECKPOINT_PATH - model checkpoint (default: newsflow.model)
//! - NEWSFLOW_SUBMISSION_PATH - prediction output (default: submission.csv)
//! - RUST_LOG - Logging level (optional, default: info)

use newsflow::config::{BackendType, Settings};
use newsflow::loader::PredictionDays;
use newsflow::runner;
use newsflow::snapshot::{write_submission, SnapshotWriter};
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

    log::info!("🚀 Starting newsflow");
    log::info!("   Model: {}", settings.model_type);
    log::info!("   Market: {}", settings.market_path.display());
    log::info!("   News: {}", settings.news_path.display());
    log::info!("   Use news: {}", settings.use_news);
    log::info!("   Max day diff: {}", settings.max_day_diff);
    log::info!("   History days: {}", settings.max_shift_date);

    let mut snapshot = SnapshotWriter::new(backend, settings.snapshot_path.clone())?;
    log::info!("📊 Snapshot backend: {}", snapshot.backend_type());

    let mut trained = measure("training", || runner::train(&settings, Some(&mut snapshot)))?;

    let (market_path, news_path) = match (&settings.predict_market_path, &settings.predict_news_path) {
        (Some(market), Some(news)) => (market, news),
        _ => {
            log::info!("⏭️  No prediction files configured, skipping prediction");
            return Ok(());
        }
    };

    let days = PredictionDays::load(market_path, news_path)?;
    let templates = measure("prediction", || trained.predict_all(days))?;
    write_submission(&settings.submission_path, &templates)?;

    log::info!("✅ Done");
    Ok(())
}
