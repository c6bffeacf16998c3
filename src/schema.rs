//! Column names of the market and news data sets

use crate::frame::DType;

pub const MARKET_ID: &str = "id";
pub const NEWS_ID: &str = "news_id";

pub const TIME: &str = "time";
pub const ASSET_CODE: &str = "assetCode";
pub const ASSET_NAME: &str = "assetName";
pub const UNIVERSE: &str = "universe";
pub const TARGET_RETURN: &str = "returnsOpenNextMktres10";
pub const CONFIDENCE: &str = "confidence";

pub const ASSET_CODES: &str = "assetCodes";
pub const FIRST_CREATED: &str = "firstCreated";
pub const SOURCE_ID: &str = "sourceId";
pub const SOURCE_TIMESTAMP: &str = "sourceTimestamp";
pub const HEADLINE: &str = "headline";
pub const SUBJECTS: &str = "subjects";
pub const AUDIENCES: &str = "audiences";
pub const PROVIDER: &str = "provider";
pub const HEADLINE_TAG: &str = "headlineTag";
pub const MARKET_COMMENTARY: &str = "marketCommentary";

pub const MARKET_RETURN_COLUMNS: [&str; 11] = [
    "volume",
    "close",
    "open",
    "returnsClosePrevRaw1",
    "returnsOpenPrevRaw1",
    "returnsClosePrevMktres1",
    "returnsOpenPrevMktres1",
    "returnsClosePrevRaw10",
    "returnsOpenPrevRaw10",
    "returnsClosePrevMktres10",
    "returnsOpenPrevMktres10",
];

pub const NEWS_NUMERIC_COLUMNS: [&str; 23] = [
    "urgency",
    "takeSequence",
    "bodySize",
    "companyCount",
    "sentenceCount",
    "wordCount",
    "firstMentionSentence",
    "relevance",
    "sentimentClass",
    "sentimentNegative",
    "sentimentNeutral",
    "sentimentPositive",
    "sentimentWordCount",
    "noveltyCount12H",
    "noveltyCount24H",
    "noveltyCount3D",
    "noveltyCount5D",
    "noveltyCount7D",
    "volumeCounts12H",
    "volumeCounts24H",
    "volumeCounts3D",
    "volumeCounts5D",
    "volumeCounts7D",
];

/// Default news fields joined into one string per market observation
pub const CONCATENABLE_FEATURES: [&str; 5] = [SUBJECTS, AUDIENCES, HEADLINE, PROVIDER, HEADLINE_TAG];

/// Dtype of a known market column as read from disk
pub fn market_dtype(name: &str) -> DType {
    match name {
        TIME => DType::Timestamp,
        ASSET_CODE | ASSET_NAME => DType::Categorical,
        MARKET_ID => DType::Int64,
        _ => DType::Float64,
    }
}

/// Dtype of a known news column as read from disk; unknown columns are text
pub fn news_dtype(name: &str) -> DType {
    match name {
        TIME | SOURCE_TIMESTAMP | FIRST_CREATED => DType::Timestamp,
        MARKET_COMMENTARY => DType::Bool,
        "urgency" | "takeSequence" | "bodySize" | "companyCount" | "sentenceCount"
        | "wordCount" | "firstMentionSentence" | "sentimentClass" | "sentimentWordCount"
        | "noveltyCount12H" | "noveltyCount24H" | "noveltyCount3D" | "noveltyCount5D"
        | "noveltyCount7D" | "volumeCounts12H" | "volumeCounts24H" | "volumeCounts3D"
        | "volumeCounts5D" | "volumeCounts7D" => DType::Int64,
        "relevance" | "sentimentNegative" | "sentimentNeutral" | "sentimentPositive" => {
            DType::Float64
        }
        PROVIDER | ASSET_CODES | ASSET_NAME => DType::Categorical,
        _ => DType::Utf8,
    }
}
