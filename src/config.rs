//! Runtime settings loaded from environment variables
//!
//! Settings are parsed once at startup into an immutable [`Settings`] value and
//! handed to each stage. Malformed values abort setup with a [`ConfigError`].

use crate::schema::CONCATENABLE_FEATURES;
use chrono::NaiveDate;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown model type: {0} (expected lgb, gbm or mlp)")]
    UnknownModelType(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("Malformed column list in {var}: {value}")]
    MalformedColumnList { var: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Gbm,
    Mlp,
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lgb" | "gbm" => Ok(ModelKind::Gbm),
            "mlp" => Ok(ModelKind::Mlp),
            other => Err(ConfigError::UnknownModelType(other.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Gbm => f.write_str("gbm"),
            ModelKind::Mlp => f.write_str("mlp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleType {
    Standard,
    MinMax,
}

/// Snapshot storage selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Csv,
    Sqlite,
}

impl BackendType {
    /// Read `--backend csv|sqlite` from the argument list, defaulting to CSV
    ///
    /// A missing or unknown value after `--backend` is a setup error.
    pub fn parse_from_args(args: &[String]) -> Result<BackendType, ConfigError> {
        let idx = match args.iter().position(|x| x == "--backend") {
            Some(idx) => idx,
            None => return Ok(BackendType::Csv),
        };
        match args.get(idx + 1).map(|s| s.as_str()) {
            Some("csv") => Ok(BackendType::Csv),
            Some("sqlite") => Ok(BackendType::Sqlite),
            other => Err(invalid("--backend", other.unwrap_or(""))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_type: ModelKind,
    pub market_path: PathBuf,
    pub news_path: PathBuf,
    pub predict_market_path: Option<PathBuf>,
    pub predict_news_path: Option<PathBuf>,
    /// Rows before this date are dropped; `None` keeps everything
    pub since: Option<NaiveDate>,
    pub use_news: bool,
    pub max_day_diff: u32,
    /// History retention for the prediction-day path; > 0 enables lag features
    pub max_shift_date: u32,
    pub scale_type: ScaleType,
    pub scale: bool,
    pub remove_news_features: Vec<String>,
    pub concat_features: Vec<String>,
    pub lag_workers: usize,
    pub snapshot_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub submission_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_type: ModelKind::Gbm,
            market_path: PathBuf::from("data/test/marketdata_sample.csv"),
            news_path: PathBuf::from("data/test/news_sample.csv"),
            predict_market_path: None,
            predict_news_path: None,
            since: NaiveDate::from_ymd_opt(2010, 1, 1),
            use_news: true,
            max_day_diff: 3,
            max_shift_date: 0,
            scale_type: ScaleType::Standard,
            scale: true,
            remove_news_features: Vec::new(),
            concat_features: CONCATENABLE_FEATURES.iter().map(|s| s.to_string()).collect(),
            lag_workers: 2,
            snapshot_path: PathBuf::from("feature_df.csv"),
            checkpoint_path: PathBuf::from("newsflow.model"),
            submission_path: PathBuf::from("submission.csv"),
        }
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_number<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(var, value))
}

fn parse_flag(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(var, value)),
    }
}

/// Comma separated column names; blank input is an empty list
fn parse_column_list(var: &str, value: &str) -> Result<Vec<String>, ConfigError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    let names: Vec<String> = value.split(',').map(|s| s.trim().to_string()).collect();
    if names.iter().any(|n| n.is_empty() || n.contains(char::is_whitespace)) {
        return Err(ConfigError::MalformedColumnList {
            var: var.to_string(),
            value: value.to_string(),
        });
    }
    Ok(names)
}

impl Settings {
    /// Load settings from the process environment
    ///
    /// Environment variables (all optional):
    /// - `NEWSFLOW_MODEL_TYPE` (default: lgb)
    /// - `NEWSFLOW_MARKET_PATH`, `NEWSFLOW_NEWS_PATH` (training CSVs)
    /// - `NEWSFLOW_PREDICT_MARKET_PATH`, `NEWSFLOW_PREDICT_NEWS_PATH`
    /// - `NEWSFLOW_SINCE` (default: 2010-01-01, `none` disables)
    /// - `NEWSFLOW_USE_NEWS` (default: true)
    /// - `NEWSFLOW_MAX_DAY_DIFF` (default: 3)
    /// - `NEWSFLOW_MAX_SHIFT_DATE` (default: 0)
    /// - `NEWSFLOW_SCALE_TYPE` (default: standard)
    /// - `NEWSFLOW_SCALE` (default: true)
    /// - `NEWSFLOW_REMOVE_NEWS_FEATURES` (default: empty)
    /// - `NEWSFLOW_CONCAT_FEATURES` (default: subjects,audiences,headline,provider,headlineTag)
    /// - `NEWSFLOW_LAG_WORKERS` (default: 2)
    /// - `NEWSFLOW_SNAPSHOT_PATH`, `NEWSFLOW_CHECKPOINT_PATH`, `NEWSFLOW_SUBMISSION_PATH`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(v) = lookup("NEWSFLOW_MODEL_TYPE") {
            settings.model_type = v.parse()?;
        }
        if let Some(v) = lookup("NEWSFLOW_MARKET_PATH") {
            settings.market_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("NEWSFLOW_NEWS_PATH") {
            settings.news_path = PathBuf::from(v);
        }
        settings.predict_market_path = lookup("NEWSFLOW_PREDICT_MARKET_PATH").map(PathBuf::from);
        settings.predict_news_path = lookup("NEWSFLOW_PREDICT_NEWS_PATH").map(PathBuf::from);

        if let Some(v) = lookup("NEWSFLOW_SINCE") {
            settings.since = match v.trim().to_lowercase().as_str() {
                "" | "none" => None,
                s => Some(
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .map_err(|_| invalid("NEWSFLOW_SINCE", &v))?,
                ),
            };
        }
        if let Some(v) = lookup("NEWSFLOW_USE_NEWS") {
            settings.use_news = parse_flag("NEWSFLOW_USE_NEWS", &v)?;
        }
        if let Some(v) = lookup("NEWSFLOW_MAX_DAY_DIFF") {
            settings.max_day_diff = parse_number("NEWSFLOW_MAX_DAY_DIFF", &v)?;
        }
        if let Some(v) = lookup("NEWSFLOW_MAX_SHIFT_DATE") {
            settings.max_shift_date = parse_number("NEWSFLOW_MAX_SHIFT_DATE", &v)?;
        }
        if let Some(v) = lookup("NEWSFLOW_SCALE_TYPE") {
            settings.scale_type = match v.trim().to_lowercase().as_str() {
                "standard" => ScaleType::Standard,
                "minmax" => ScaleType::MinMax,
                _ => return Err(invalid("NEWSFLOW_SCALE_TYPE", &v)),
            };
        }
        if let Some(v) = lookup("NEWSFLOW_SCALE") {
            settings.scale = parse_flag("NEWSFLOW_SCALE", &v)?;
        }
        if let Some(v) = lookup("NEWSFLOW_REMOVE_NEWS_FEATURES") {
            settings.remove_news_features =
                parse_column_list("NEWSFLOW_REMOVE_NEWS_FEATURES", &v)?;
        }
        if let Some(v) = lookup("NEWSFLOW_CONCAT_FEATURES") {
            settings.concat_features = parse_column_list("NEWSFLOW_CONCAT_FEATURES", &v)?;
        }
        if let Some(v) = lookup("NEWSFLOW_LAG_WORKERS") {
            settings.lag_workers = parse_number("NEWSFLOW_LAG_WORKERS", &v)?;
            if settings.lag_workers == 0 {
                return Err(invalid("NEWSFLOW_LAG_WORKERS", &v));
            }
        }
        if let Some(v) = lookup("NEWSFLOW_SNAPSHOT_PATH") {
            settings.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("NEWSFLOW_CHECKPOINT_PATH") {
            settings.checkpoint_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("NEWSFLOW_SUBMISSION_PATH") {
            settings.submission_path = PathBuf::from(v);
        }

        Ok(settings)
    }

    /// Whether the prediction-day path keeps history and builds lag features
    pub fn uses_history(&self) -> bool {
        self.max_shift_date > 0
    }
}
