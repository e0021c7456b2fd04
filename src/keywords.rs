//! Keyword extraction and lexical overlap scoring.
//!
//! Keywords give each chunk a cheap lexical index alongside its embedding:
//! the hybrid ranker combines the cosine score with a normalized overlap
//! between the query's tokens and the chunk's extracted keyword set.

use std::collections::{HashMap, HashSet};

/// Default maximum number of keywords extracted per chunk.
pub const DEFAULT_MAX_KEYWORDS: usize = 10;

/// Tokens shorter than this never become keywords.
const MIN_KEYWORD_LEN: usize = 3;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "its", "new", "now", "old", "see",
    "two", "way", "who", "did", "per", "via", "with", "from", "this", "that", "have", "been",
    "were", "they", "them", "then", "than", "each", "will", "would", "there", "their", "what",
    "when", "where", "which", "while", "about", "into", "over", "under", "also", "such", "only",
    "other", "some", "these", "those", "upon", "very",
];

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Extract up to `max_keywords` index keywords from text.
///
/// Tokens are lowercased, stopword-filtered, and ranked by frequency with
/// first-occurrence order breaking ties, so extraction is deterministic.
///
/// # Examples
///
/// ```
/// use docmem::keywords::extract_keywords;
///
/// let kws = extract_keywords("Salary slip for March. Net salary: 2100.", 5);
/// assert_eq!(kws[0], "salary");
/// assert!(kws.contains(&"march".to_string()));
/// ```
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();

    for token in tokenize(text) {
        if token.len() < MIN_KEYWORD_LEN || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        if !counts.contains_key(&token) {
            first_seen.push(token.clone());
        }
        *counts.entry(token).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = first_seen
        .into_iter()
        .enumerate()
        .map(|(order, token)| {
            let count = counts[&token];
            (token, count, order)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(max_keywords)
        .map(|(token, ..)| token)
        .collect()
}

/// Normalized lexical overlap between a query and a keyword set, in [0, 1].
///
/// Measures the fraction of distinct query tokens present in the document's
/// keywords. An empty query or empty keyword set scores 0 (missing signal,
/// not an error).
pub fn keyword_score(query: &str, keywords: &[String]) -> f32 {
    let query_tokens: HashSet<String> = tokenize(query)
        .into_iter()
        .filter(|t| t.len() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(&t.as_str()))
        .collect();
    if query_tokens.is_empty() || keywords.is_empty() {
        return 0.0;
    }

    let keyword_set: HashSet<&str> = keywords.iter().map(String::as_str).collect();
    let matched = query_tokens
        .iter()
        .filter(|t| keyword_set.contains(t.as_str()))
        .count();

    matched as f32 / query_tokens.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(
            tokenize("Net-salary: 2,100.50 (March)"),
            vec!["net", "salary", "2", "100", "50", "march"]
        );
    }

    #[test]
    fn extraction_ranks_by_frequency() {
        let kws = extract_keywords(
            "pension pension pension salary salary employer",
            3,
        );
        assert_eq!(kws, vec!["pension", "salary", "employer"]);
    }

    #[test]
    fn extraction_filters_stopwords_and_short_tokens() {
        let kws = extract_keywords("the and for a an salary of march", 10);
        assert_eq!(kws, vec!["salary", "march"]);
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "gross salary net salary deductions pension employer march period";
        assert_eq!(extract_keywords(text, 5), extract_keywords(text, 5));
    }

    #[test]
    fn extraction_respects_limit() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        assert_eq!(extract_keywords(text, 3).len(), 3);
    }

    #[test]
    fn score_full_overlap_is_one() {
        let keywords = vec!["salary".to_string(), "march".to_string()];
        let score = keyword_score("salary march", &keywords);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn score_partial_overlap() {
        let keywords = vec!["salary".to_string(), "pension".to_string()];
        let score = keyword_score("salary slip march", &keywords);
        // 1 of 3 query tokens matched.
        assert!((score - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn score_no_overlap_is_zero() {
        let keywords = vec!["pension".to_string()];
        assert_eq!(keyword_score("invoice total", &keywords), 0.0);
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(keyword_score("", &["salary".to_string()]), 0.0);
        assert_eq!(keyword_score("salary", &[]), 0.0);
    }

    #[test]
    fn score_ignores_stopwords_in_query() {
        let keywords = vec!["salary".to_string()];
        let score = keyword_score("the salary for them", &keywords);
        assert!((score - 1.0).abs() < 1e-6);
    }
}
