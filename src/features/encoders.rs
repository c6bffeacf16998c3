//! Fitted text encoders for the concatenated news fields
//!
//! - [`MultiLabelBinarizer`]: one column per known label of a set-valued field
//!   (audiences, provider, headlineTag)
//! - [`CountVectorizer`]: binary bag of words over the most frequent terms
//!   (headline, subjects)

use super::matrix::BinaryMatrix;
use crate::linkage::AssetCodeResolver;
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref TOKEN_PATTERN: Regex = Regex::new(r"\b\w\w+\b").expect("valid token pattern");
    static ref ENGLISH_STOP_WORDS: HashSet<&'static str> = [
        "a", "about", "above", "across", "after", "afterwards", "again", "against", "all",
        "almost", "alone", "along", "already", "also", "although", "always", "am", "among",
        "amongst", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
        "anywhere", "are", "around", "as", "at", "back", "be", "became", "because", "become",
        "becomes", "becoming", "been", "before", "beforehand", "behind", "being", "below",
        "beside", "besides", "between", "beyond", "both", "but", "by", "can", "cannot", "could",
        "did", "do", "does", "doing", "done", "down", "due", "during", "each", "either", "else",
        "elsewhere", "enough", "etc", "even", "ever", "every", "everyone", "everything",
        "everywhere", "except", "few", "for", "former", "formerly", "from", "further", "had",
        "has", "have", "he", "hence", "her", "here", "hereafter", "hereby", "herein", "hers",
        "herself", "him", "himself", "his", "how", "however", "ie", "if", "in", "indeed", "into",
        "is", "it", "its", "itself", "just", "last", "latter", "least", "less", "ltd", "many",
        "may", "me", "meanwhile", "might", "more", "moreover", "most", "mostly", "much", "must",
        "my", "myself", "namely", "neither", "never", "nevertheless", "next", "no", "nobody",
        "none", "nor", "not", "nothing", "now", "nowhere", "of", "off", "often", "on", "once",
        "one", "only", "onto", "or", "other", "others", "otherwise", "our", "ours", "ourselves",
        "out", "over", "own", "per", "perhaps", "please", "rather", "same", "seem", "seemed",
        "seeming", "seems", "several", "she", "should", "since", "so", "some", "somehow",
        "someone", "something", "sometime", "sometimes", "somewhere", "still", "such", "than",
        "that", "the", "their", "them", "themselves", "then", "thence", "there", "thereafter",
        "thereby", "therefore", "therein", "thereupon", "these", "they", "this", "those",
        "though", "through", "throughout", "thru", "thus", "to", "together", "too", "toward",
        "towards", "under", "until", "up", "upon", "us", "very", "via", "was", "we", "well",
        "were", "what", "whatever", "when", "whence", "whenever", "where", "whereafter",
        "whereas", "whereby", "wherein", "whereupon", "wherever", "whether", "which", "while",
        "who", "whoever", "whole", "whom", "whose", "why", "will", "with", "within", "without",
        "would", "yet", "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect();
}

/// Parse a set-valued cell; joined cells (`"{'A'}, {'B'}"`) yield every label
pub fn parse_labels(raw: &str) -> Vec<String> {
    AssetCodeResolver::parse_codes(raw)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiLabelBinarizer {
    classes: Vec<String>,
    index: HashMap<String, u32>,
}

impl MultiLabelBinarizer {
    /// Fit on an iterator of labels; classes are sorted
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: Vec<String> = labels
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i as u32))
            .collect();
        Self { classes, index }
    }

    /// Fit on raw set-valued cells, flattening every parsed label
    pub fn fit_flattened<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let encoder = Self::fit(cells.into_iter().flat_map(parse_labels));
        info!("flat category size: {}", encoder.classes.len());
        encoder
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Unknown labels are ignored
    pub fn transform(&self, cells: &[Option<&str>]) -> BinaryMatrix {
        let rows = cells
            .iter()
            .map(|cell| {
                cell.map(parse_labels)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|label| self.index.get(label).copied())
                    .collect()
            })
            .collect();
        BinaryMatrix::new(self.classes.len(), rows)
    }
}

/// Binary bag of words with a bounded vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct CountVectorizer {
    max_features: usize,
    stop_words: bool,
    vocabulary: HashMap<String, u32>,
}

impl CountVectorizer {
    pub fn new(max_features: usize, stop_words: bool) -> Self {
        Self {
            max_features,
            stop_words,
            vocabulary: HashMap::new(),
        }
    }

    /// Lowercase, strip accents, split into word tokens of two or more characters
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let folded: String = text
            .to_lowercase()
            .nfkd()
            .filter(|c| !is_combining_mark(*c))
            .collect();
        TOKEN_PATTERN
            .find_iter(&folded)
            .map(|m| m.as_str())
            .filter(|t| !self.stop_words || !ENGLISH_STOP_WORDS.contains(t))
            .map(str::to_string)
            .collect()
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.vocabulary.contains_key(term)
    }

    /// Keep the `max_features` terms with the highest document frequency
    ///
    /// Ties are broken alphabetically; columns follow alphabetical term order.
    pub fn fit(&mut self, documents: &[Option<&str>]) {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in documents.iter().flatten() {
            let terms: HashSet<String> = self.tokenize(doc).into_iter().collect();
            for term in terms {
                *doc_freq.entry(term).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = doc_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_features);

        let mut terms: Vec<String> = ranked.into_iter().map(|(t, _)| t).collect();
        terms.sort();
        self.vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i as u32))
            .collect();
    }

    pub fn transform(&self, documents: &[Option<&str>]) -> BinaryMatrix {
        let rows = documents
            .iter()
            .map(|doc| {
                doc.map(|d| {
                    self.tokenize(d)
                        .iter()
                        .filter_map(|t| self.vocabulary.get(t).copied())
                        .collect()
                })
                .unwrap_or_default()
            })
            .collect();
        BinaryMatrix::new(self.vocabulary.len(), rows)
    }

    pub fn fit_transform(&mut self, documents: &[Option<&str>]) -> BinaryMatrix {
        self.fit(documents);
        self.transform(documents)
    }
}
