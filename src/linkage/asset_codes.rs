//! Many-to-many link between single market asset codes and news code sets

use log::info;
use std::collections::{HashMap, HashSet};

/// One (raw news code set, market code) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetCodeLink {
    pub news_asset_codes: String,
    pub market_asset_code: String,
}

/// Links grouped by market code, each list in first-appearance order of the news values
#[derive(Debug, Default)]
pub struct CodeLinks {
    by_market_code: HashMap<String, Vec<String>>,
}

impl CodeLinks {
    /// Raw news values whose code set contains `market_code`
    pub fn news_values_for(&self, market_code: &str) -> &[String] {
        self.by_market_code
            .get(market_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_market_code.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn links(&self) -> Vec<AssetCodeLink> {
        self.by_market_code
            .iter()
            .flat_map(|(market, values)| {
                values.iter().map(move |raw| AssetCodeLink {
                    news_asset_codes: raw.clone(),
                    market_asset_code: market.clone(),
                })
            })
            .collect()
    }
}

pub struct AssetCodeResolver;

impl AssetCodeResolver {
    /// Split a serialized code set like `{'GOOG.O', 'GOOGa.DE'}` into atomic codes
    pub fn parse_codes(raw: &str) -> Vec<String> {
        let stripped: String = raw.chars().filter(|c| !matches!(c, '{' | '}' | '\'')).collect();
        stripped
            .split(", ")
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Build links for every distinct market code against every distinct raw news value
    ///
    /// Market codes that appear in no news code set produce no link; their rows
    /// later survive the left join with null news fields.
    pub fn resolve<'a, M, N>(market_codes: M, news_values: N) -> CodeLinks
    where
        M: IntoIterator<Item = &'a str>,
        N: IntoIterator<Item = &'a str>,
    {
        let mut seen_raw = HashSet::new();
        let mut inverted: HashMap<String, Vec<String>> = HashMap::new();
        let mut news_patterns = 0usize;

        for raw in news_values {
            if !seen_raw.insert(raw) {
                continue;
            }
            news_patterns += 1;
            let mut codes = Self::parse_codes(raw);
            codes.sort();
            codes.dedup();
            for code in codes {
                inverted.entry(code).or_default().push(raw.to_string());
            }
        }

        let market_codes: HashSet<&str> = market_codes.into_iter().collect();
        let by_market_code: HashMap<String, Vec<String>> = market_codes
            .iter()
            .filter_map(|code| {
                inverted
                    .get(*code)
                    .map(|values| (code.to_string(), values.clone()))
            })
            .collect();

        let links = CodeLinks { by_market_code };
        info!(
            "🔗 assetCodes patterns: {} in market, {} in news, {} links",
            market_codes.len(),
            news_patterns,
            links.len()
        );
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes() {
        assert_eq!(
            AssetCodeResolver::parse_codes("{'GOOG.O', 'GOOGa.DE'}"),
            vec!["GOOG.O", "GOOGa.DE"]
        );
        assert_eq!(AssetCodeResolver::parse_codes("{'A'}"), vec!["A"]);
        assert!(AssetCodeResolver::parse_codes("{}").is_empty());
    }

    #[test]
    fn test_every_containing_value_is_linked() {
        let news = ["{'A.N', 'B.N'}", "{'B.N'}", "{'C.N'}", "{'A.N', 'B.N'}"];
        let links = AssetCodeResolver::resolve(["A.N", "B.N", "Z.N"], news);

        assert_eq!(links.news_values_for("A.N"), &["{'A.N', 'B.N'}".to_string()]);
        assert_eq!(
            links.news_values_for("B.N"),
            &["{'A.N', 'B.N'}".to_string(), "{'B.N'}".to_string()]
        );
        assert!(links.news_values_for("Z.N").is_empty());
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn test_links_reference_raw_values() {
        let links = AssetCodeResolver::resolve(["A"], ["{'A'}"]);
        let all = links.links();
        assert_eq!(
            all,
            vec![AssetCodeLink {
                news_asset_codes: "{'A'}".to_string(),
                market_asset_code: "A".to_string(),
            }]
        );
    }

    #[test]
    fn test_no_news_means_no_links() {
        let links = AssetCodeResolver::resolve(["A"], std::iter::empty());
        assert!(links.is_empty());
    }
}
