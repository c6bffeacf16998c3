//! Integration tests for market/news linkage from CSV input
//!
//! The files follow the on-disk layout of the training data: a leading unnamed
//! index column in the market file, set-literal code lists in the news file.

#[cfg(test)]
mod linkage_integration_tests {
    use newsflow::config::{BackendType, Settings};
    use newsflow::frame::{DType, Frame};
    use newsflow::linkage::linker::LinkStats;
    use newsflow::loader::{load_market, load_news};
    use newsflow::runner::prepare_training;
    use newsflow::schema::{ASSET_CODE, HEADLINE, MARKET_ID};
    use newsflow::snapshot::{SnapshotWriter, SNAPSHOT_TABLE};
    use rusqlite::Connection;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const MARKET_HEADER: &str = ",time,assetCode,assetName,volume,close,open,returnsClosePrevRaw10,returnsClosePrevMktres10,returnsOpenNextMktres10,universe";

    const NEWS: &str = "time,sourceTimestamp,firstCreated,sourceId,headline,urgency,provider,subjects,audiences,headlineTag,marketCommentary,assetCodes,assetName,relevance,sentimentPositive
2010-01-02 08:00:00+00:00,2010-01-02 08:00:00+00:00,2010-01-02 08:00:00+00:00,s1,A beats estimates,3,RTRS,\"{'ENER', 'US'}\",\"{'O'}\",,False,\"{'A'}\",A Inc,1.0,0.8
";

    fn market_csv(first_day_hour: u32) -> String {
        format!(
            "{}
0,2010-01-02 {:02}:00:00+00:00,A,A Inc,100,10.0,9.5,0.01,0.02,0.03,1.0
1,2010-01-03 07:00:00+00:00,A,A Inc,120,10.5,10.0,0.02,,-0.01,1.0
2,2010-01-03 07:00:00+00:00,Z,Z Inc,50,3.0,3.1,-0.01,0.0,0.02,1.0
",
            MARKET_HEADER, first_day_hour
        )
    }

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn link(first_day_hour: u32) -> (Frame, Option<LinkStats>) {
        let dir = TempDir::new().unwrap();
        let market = load_market(&write(&dir, "market.csv", &market_csv(first_day_hour))).unwrap();
        let news = load_news(&write(&dir, "news.csv", NEWS)).unwrap();
        let settings = Settings {
            since: None,
            ..Settings::default()
        };
        let prepared = prepare_training(&settings, market, news).unwrap();
        let stats = prepared.linker.as_ref().map(|l| l.stats());
        (prepared.frame, stats)
    }

    fn headlines(frame: &Frame) -> Vec<String> {
        frame
            .column(HEADLINE)
            .unwrap()
            .strs()
            .unwrap()
            .into_iter()
            .map(|h| h.unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_news_before_market_open_reaches_next_day_only() {
        // Test: market snapshot at 07:00 precedes the 08:00 story, so only the
        // next day picks it up through the prior-day fallback
        let (frame, stats) = link(7);

        assert_eq!(frame.height(), 3);
        assert_eq!(
            frame.column(MARKET_ID).unwrap().i32s().unwrap(),
            &[Some(1), Some(2), Some(3)]
        );
        assert_eq!(headlines(&frame), vec!["", "A beats estimates", ""]);

        let stats = stats.unwrap();
        assert_eq!(stats.same_day, 0);
        assert_eq!(stats.fallback, 1);
        assert_eq!(stats.unmatched, 2);
    }

    #[test]
    fn test_news_before_market_close_reaches_both_days() {
        // Test: a 22:00 snapshot comes after the story, so the first day links
        // it same-day and the second day still gets it as fallback
        let (frame, stats) = link(22);

        assert_eq!(frame.height(), 3);
        assert_eq!(
            headlines(&frame),
            vec!["A beats estimates", "A beats estimates", ""]
        );
        assert_eq!(stats.unwrap().same_day, 1);
    }

    #[test]
    fn test_unmentioned_asset_keeps_its_row_with_neutral_news() {
        let (frame, _) = link(7);

        let codes = frame.column(ASSET_CODE).unwrap().strs().unwrap();
        assert_eq!(codes[2], Some("Z"));
        let sentiment = frame.column("sentimentPositive").unwrap().f64s().unwrap();
        assert_eq!(sentiment[2], Some(0.0));
    }

    #[test]
    fn test_aggregated_dtypes_are_restored() {
        let (frame, _) = link(7);

        assert_eq!(frame.column("marketCommentary").unwrap().dtype(), DType::Float16);
        assert_eq!(frame.column("sentimentPositive").unwrap().dtype(), DType::Float32);
        assert_eq!(frame.column("close").unwrap().dtype(), DType::Float32);
        assert_eq!(frame.column(MARKET_ID).unwrap().dtype(), DType::Int32);
    }

    #[test]
    fn test_snapshot_to_sqlite() {
        let (frame, _) = link(7);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.db");

        let mut writer = SnapshotWriter::new(BackendType::Sqlite, path.clone()).unwrap();
        assert_eq!(writer.write_frame(&frame).unwrap(), 3);

        let conn = Connection::open(&path).unwrap();
        let headline: String = conn
            .query_row(
                &format!("SELECT headline FROM {} WHERE id = 2", SNAPSHOT_TABLE),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(headline, "A beats estimates");
    }
}
