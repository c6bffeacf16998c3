//! Training and prediction-day orchestration
//!
//! `train` runs every stage once over the static files and keeps the fitted
//! pieces (preprocessors, linker settings, feature pipeline, classifier) in a
//! [`TrainedPipeline`]. `predict_all` then replays those pieces over the
//! prediction days, one [`StreamingContext`] per day.

use crate::config::Settings;
use crate::features::{BinaryMatrix, FeaturePipeline, Features};
use crate::frame::Frame;
use crate::ids::{assign_ids, validate_ids};
use crate::linkage::{LinkSettings, MarketNewsLinker};
use crate::loader::{load_market, load_news, PredictionDay, PredictionTemplate};
use crate::model::{self, to_confidence, Classifier};
use crate::prep::{
    add_confidence, compress_dtypes, filter_since, log_empty_strings, remove_unnecessary_columns,
    remove_unnecessary_columns_train, to_category,
};
use crate::preprocess::Preprocessor;
use crate::schema::{CONFIDENCE, FIRST_CREATED, HEADLINE_TAG, MARKET_ID, NEWS_ID, TIME};
use crate::snapshot::SnapshotWriter;
use crate::streaming::{StreamingContext, StreamingContextBuffer};
use crate::timing::measure;
use crate::NewsflowError;
use log::{debug, info};

/// Training frames after preparation and linkage, before feature extraction
pub struct PreparedTraining {
    /// One row per market id (market columns only when news is disabled)
    pub frame: Frame,
    pub features: Features,
    pub market_preprocess: Preprocessor,
    pub news_preprocess: Preprocessor,
    pub linker: Option<MarketNewsLinker>,
}

/// Prepare, preprocess and link the training frames
pub fn prepare_training(
    settings: &Settings,
    mut market: Frame,
    mut news: Frame,
) -> Result<PreparedTraining, NewsflowError> {
    if let Some(since) = settings.since {
        market = filter_since(&market, TIME, since)?;
        news = filter_since(&news, FIRST_CREATED, since)?;
    }
    compress_dtypes(&mut market)?;
    compress_dtypes(&mut news)?;
    assign_ids(&mut market, MARKET_ID)?;
    assign_ids(&mut news, NEWS_ID)?;
    add_confidence(&mut market)?;
    log_empty_strings(&news);

    let mut market_preprocess = Preprocessor::market(settings.scale_type);
    market_preprocess.fit_transform(&mut market)?;
    let mut news_preprocess = Preprocessor::news(settings.scale_type);
    news_preprocess.fit_transform(&mut news)?;
    to_category(&mut news, HEADLINE_TAG)?;

    let features = Features::fit(&news)?;
    remove_unnecessary_columns_train(&mut market, &mut news);
    debug!("market shape: {:?}, news shape: {:?}", market.shape(), news.shape());

    let (frame, linker) = if settings.use_news {
        let mut linker = MarketNewsLinker::new(LinkSettings::from_settings(settings));
        let frame = linker.link_and_aggregate(&market, &news)?;
        (frame, Some(linker))
    } else {
        info!("⏭️  news linkage disabled, training on market features only");
        validate_ids(&market, MARKET_ID)?;
        (market, None)
    };

    Ok(PreparedTraining {
        frame,
        features,
        market_preprocess,
        news_preprocess,
        linker,
    })
}

/// Everything fitted during training, replayed on each prediction day
pub struct TrainedPipeline {
    settings: Settings,
    market_preprocess: Preprocessor,
    news_preprocess: Preprocessor,
    linker: Option<MarketNewsLinker>,
    pipeline: FeaturePipeline,
    news_feature_names: Vec<String>,
    /// Columns of the training feature frame (label excluded), in order
    frame_columns: Vec<String>,
    model: Box<dyn Classifier>,
}

/// Load the configured training files and fit the configured model
pub fn train(
    settings: &Settings,
    snapshot: Option<&mut SnapshotWriter>,
) -> Result<TrainedPipeline, NewsflowError> {
    let market = measure("load market", || load_market(&settings.market_path))?;
    let news = measure("load news", || load_news(&settings.news_path))?;
    train_with_model(settings, market, news, model::build(settings.model_type), snapshot)
}

/// Fit `model` on already loaded training frames
pub fn train_with_model(
    settings: &Settings,
    market: Frame,
    news: Frame,
    mut model: Box<dyn Classifier>,
    snapshot: Option<&mut SnapshotWriter>,
) -> Result<TrainedPipeline, NewsflowError> {
    let PreparedTraining {
        frame,
        features,
        market_preprocess,
        news_preprocess,
        linker,
    } = measure("prepare training", || prepare_training(settings, market, news))?;

    if let Some(writer) = snapshot {
        writer.write_frame(&frame)?;
    }

    let extracted = measure("post_merge_feature_extraction", || {
        features.post_merge_feature_extraction(settings, frame)
    })?;
    let frame_columns: Vec<String> = extracted
        .frame
        .column_names()
        .into_iter()
        .filter(|name| name != CONFIDENCE)
        .collect();

    info!("🚀 training {} model", model.name());
    measure("train", || {
        model::create_dataset_and_train(
            model.as_mut(),
            &extracted.frame,
            &extracted.news,
            &extracted.news_feature_names,
        )
    })?;
    model.save(&settings.checkpoint_path)?;
    info!("✅ model saved to {}", settings.checkpoint_path.display());

    Ok(TrainedPipeline {
        settings: settings.clone(),
        market_preprocess,
        news_preprocess,
        linker,
        pipeline: extracted.pipeline,
        news_feature_names: extracted.news_feature_names,
        frame_columns,
        model,
    })
}

impl TrainedPipeline {
    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }

    pub fn news_feature_names(&self) -> &[String] {
        &self.news_feature_names
    }

    pub fn frame_columns(&self) -> &[String] {
        &self.frame_columns
    }

    /// Replay the fitted stages over one context, up to the feature matrix
    fn features_for(
        &mut self,
        mut market: Frame,
        mut news: Frame,
    ) -> Result<(Frame, BinaryMatrix), NewsflowError> {
        compress_dtypes(&mut market)?;
        compress_dtypes(&mut news)?;
        remove_unnecessary_columns(&mut market, &mut news);
        self.market_preprocess.transform(&mut market)?;
        self.news_preprocess.transform(&mut news)?;
        to_category(&mut news, HEADLINE_TAG)?;

        let frame = match self.linker.as_mut() {
            Some(linker) => linker.link_and_aggregate(&market, &news)?,
            None => market,
        };
        let (frame, side) = self.pipeline.transform(frame)?;
        let columns: Vec<&str> = self.frame_columns.iter().map(String::as_str).collect();
        Ok((frame.select(&columns)?, side))
    }

    /// Fill `template` with confidences for the rows of the newest day
    pub fn make_predictions(
        &mut self,
        context: StreamingContext,
        template: &mut PredictionTemplate,
    ) -> Result<(), NewsflowError> {
        let StreamingContext {
            market,
            news,
            predict_start_id,
        } = context;
        let (frame, side) = self.features_for(market, news)?;
        let design = model::to_x(&frame, &side, &self.news_feature_names)?;
        let probs = self.model.predict_proba(&design.x)?;

        let confidence: Vec<f32> = design
            .ids
            .iter()
            .zip(probs.iter())
            .filter(|(id, _)| **id >= predict_start_id)
            .map(|(_, p)| to_confidence(*p))
            .collect();
        if confidence.len() != template.len() {
            return Err(NewsflowError::PredictionMismatch {
                date: template.date,
                expected: template.len(),
                actual: confidence.len(),
            });
        }
        template.confidence = confidence;
        Ok(())
    }

    /// Predict every day in order, carrying history between days
    pub fn predict_all<I>(&mut self, days: I) -> Result<Vec<PredictionTemplate>, NewsflowError>
    where
        I: IntoIterator<Item = PredictionDay>,
    {
        let mut buffer = StreamingContextBuffer::new(self.settings.max_shift_date);
        let mut templates = Vec::new();
        for day in days {
            let PredictionDay {
                market,
                news,
                mut template,
            } = day;
            let context = buffer.advance(market, news)?;
            debug!(
                "{}: {} context rows, predicting from id {}",
                template.date,
                context.market.height(),
                context.predict_start_id
            );
            measure(&format!("predict {}", template.date), || {
                self.make_predictions(context, &mut template)
            })?;
            templates.push(template);
        }
        info!("✅ predicted {} days", templates.len());
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendType;
    use crate::frame::timestamp_array;
    use crate::loader::PredictionDays;
    use arrow::array::{ArrayRef, DictionaryArray, Float64Array, StringArray};
    use arrow::datatypes::Int32Type;
    use std::sync::Arc;
    use crate::model::{GbmParams, GradientBoostedTrees};
    use crate::schema::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::{tempdir, TempDir};

    const ASSETS: [&str; 2] = ["A.N", "B.N"];

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2010, 1, 4, 22, 0, 0).unwrap()
    }

    fn text(values: Vec<String>) -> ArrayRef {
        Arc::new(StringArray::from(values))
    }

    fn categories(values: Vec<String>) -> ArrayRef {
        Arc::new(values.iter().map(String::as_str).collect::<DictionaryArray<Int32Type>>())
    }

    fn floats(values: Vec<f64>) -> ArrayRef {
        Arc::new(Float64Array::from(values))
    }

    /// Two assets per day; asset A rises, asset B falls
    fn market(first_day: i64, days: i64) -> Frame {
        let mut times = Vec::new();
        let mut codes = Vec::new();
        let mut close = Vec::new();
        let mut ret = Vec::new();
        let mut target = Vec::new();
        for d in first_day..first_day + days {
            for (k, code) in ASSETS.iter().enumerate() {
                times.push(Some(start() + Duration::days(d)));
                codes.push(code.to_string());
                let sign = if k == 0 { 1.0 } else { -1.0 };
                close.push(10.0 + sign * d as f64);
                ret.push(sign * 0.01 * (d + 1) as f64);
                target.push(sign * 0.02);
            }
        }
        let names = codes.iter().map(|c| format!("{} Inc", c)).collect();
        Frame::try_from_iter([
            (TIME, timestamp_array(&times)),
            (ASSET_CODE, categories(codes)),
            (ASSET_NAME, categories(names)),
            ("close", floats(close.clone())),
            ("open", floats(close)),
            ("returnsClosePrevRaw10", floats(ret.clone())),
            ("returnsClosePrevMktres10", floats(ret)),
            (TARGET_RETURN, floats(target)),
            (UNIVERSE, floats(vec![1.0; (days as usize) * 2])),
        ])
        .unwrap()
    }

    /// One morning story per asset per day
    fn news(first_day: i64, days: i64) -> Frame {
        let mut created = Vec::new();
        let mut codes = Vec::new();
        let mut headlines = Vec::new();
        let mut sentiment = Vec::new();
        for d in first_day..first_day + days {
            for (k, code) in ASSETS.iter().enumerate() {
                created.push(Some(start() + Duration::days(d) - Duration::hours(10)));
                codes.push(format!("{{'{}'}}", code));
                headlines.push(if k == 0 { "shares rally on profit" } else { "shares slump on loss" }.to_string());
                sentiment.push(if k == 0 { 0.9 } else { 0.1 });
            }
        }
        let n = created.len();
        let repeat = |value: &str| vec![value.to_string(); n];
        Frame::try_from_iter([
            (TIME, timestamp_array(&created)),
            (SOURCE_TIMESTAMP, timestamp_array(&created)),
            (FIRST_CREATED, timestamp_array(&created)),
            (SOURCE_ID, text(repeat("s"))),
            (HEADLINE, text(headlines)),
            (ASSET_CODES, categories(codes)),
            (ASSET_NAME, categories(repeat("x"))),
            (AUDIENCES, text(repeat("{'O', 'U'}"))),
            (SUBJECTS, text(repeat("{'US', 'ENER'}"))),
            (PROVIDER, categories(repeat("RTRS"))),
            (HEADLINE_TAG, text(repeat(""))),
            ("sentimentPositive", floats(sentiment)),
        ])
        .unwrap()
    }

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            since: None,
            lag_workers: 1,
            checkpoint_path: dir.path().join("model.json"),
            ..Settings::default()
        }
    }

    fn small_gbm() -> Box<dyn Classifier> {
        Box::new(GradientBoostedTrees::new(GbmParams {
            num_iterations: 5,
            num_leaves: 4,
            min_data_in_leaf: 1,
            ..GbmParams::default()
        }))
    }

    fn assert_filled(templates: &[PredictionTemplate], days: usize) {
        assert_eq!(templates.len(), days);
        for template in templates {
            assert_eq!(template.asset_codes, ASSETS.to_vec());
            assert_eq!(template.confidence.len(), ASSETS.len());
            assert!(template.confidence.iter().all(|c| (-1.0..=1.0).contains(c)));
        }
    }

    #[test]
    fn test_prepare_links_one_row_per_market_id() {
        let dir = tempdir().unwrap();
        let prepared = prepare_training(&settings(&dir), market(0, 5), news(0, 5)).unwrap();

        assert_eq!(prepared.frame.height(), 10);
        assert!(prepared.frame.contains("sentimentPositive"));
        assert!(prepared.frame.contains(CONFIDENCE));
        assert!(!prepared.frame.contains(TARGET_RETURN));
        assert!(!prepared.frame.contains(ASSET_NAME));
        assert!(prepared.linker.is_some());
        assert!(prepared.market_preprocess.is_fitted());
    }

    #[test]
    fn test_train_then_predict_fills_templates() {
        let dir = tempdir().unwrap();
        let settings = settings(&dir);
        let snapshot_path = dir.path().join("feature_df.csv");
        let mut snapshot = SnapshotWriter::new(BackendType::Csv, &snapshot_path).unwrap();

        let mut trained =
            train_with_model(&settings, market(0, 10), news(0, 10), small_gbm(), Some(&mut snapshot))
                .unwrap();
        assert!(settings.checkpoint_path.exists());
        assert!(snapshot_path.exists());
        assert!(!trained.frame_columns().iter().any(|c| c == CONFIDENCE));
        assert!(!trained.news_feature_names().is_empty());

        let days = PredictionDays::from_frames(market(10, 3), news(10, 3)).unwrap();
        let templates = trained.predict_all(days).unwrap();
        assert_filled(&templates, 3);
    }

    #[test]
    fn test_history_retention_predicts_only_the_new_day() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            max_shift_date: 5,
            ..settings(&dir)
        };
        let mut trained =
            train_with_model(&settings, market(0, 20), news(0, 20), small_gbm(), None).unwrap();
        assert!(trained.frame_columns().iter().any(|c| c.contains("lag")));

        let days = PredictionDays::from_frames(market(20, 4), news(20, 4)).unwrap();
        let templates = trained.predict_all(days).unwrap();
        assert_filled(&templates, 4);
    }

    #[test]
    fn test_market_only_training() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            use_news: false,
            ..settings(&dir)
        };
        let mut trained =
            train_with_model(&settings, market(0, 10), news(0, 10), small_gbm(), None).unwrap();
        assert!(trained.news_feature_names().is_empty());
        assert!(!trained.frame_columns().iter().any(|c| c == "sentimentPositive"));

        let days = PredictionDays::from_frames(market(10, 2), news(10, 2)).unwrap();
        assert_filled(&trained.predict_all(days).unwrap(), 2);
    }

    #[test]
    fn test_template_mismatch_is_an_error() {
        let dir = tempdir().unwrap();
        let mut trained =
            train_with_model(&settings(&dir), market(0, 10), news(0, 10), small_gbm(), None).unwrap();

        let mut day = PredictionDays::from_frames(market(10, 1), news(10, 1))
            .unwrap()
            .next()
            .unwrap();
        day.template.asset_codes.push("C.N".into());
        let context = StreamingContextBuffer::new(0).advance(day.market, day.news).unwrap();
        assert!(matches!(
            trained.make_predictions(context, &mut day.template),
            Err(NewsflowError::PredictionMismatch { expected: 3, actual: 2, .. })
        ));
    }
}
