//! Convergence scoring between two successive answers.
//!
//! The default scorer is ROUGE-L F1: longest-common-subsequence overlap
//! of normalised, stemmed word tokens. The exact-match scorer is kept as
//! the degraded mode, where two answers either agree (`1.0`) or do not
//! (`0.0`) ignoring case.

use std::sync::LazyLock;

use rust_stemmers::{Algorithm, Stemmer};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Snowball English (Porter2). Scores from runs that stemmed with classic
/// Porter can differ on free-text answers: Porter2 maps `dying` to `die`
/// and `skies` to `sky`, where Porter gives `dy` and `ski`. Category codes
/// tokenize the same either way.
static STEMMER: LazyLock<Stemmer> = LazyLock::new(|| Stemmer::create(Algorithm::English));

/// Similarity function used to decide whether an iterative loop has settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceScorer {
    /// ROUGE-L F-measure over stemmed word tokens.
    #[default]
    RougeL,
    /// Case-insensitive equality: `1.0` or `0.0`.
    ExactMatch,
}

impl ConvergenceScorer {
    /// Score `current` against `previous`, in `[0.0, 1.0]`.
    pub fn score(&self, previous: &str, current: &str) -> f64 {
        match self {
            ConvergenceScorer::RougeL => rouge_l_f1(previous, current, true),
            ConvergenceScorer::ExactMatch => exact_match(previous, current),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConvergenceScorer::RougeL => "rouge_l",
            ConvergenceScorer::ExactMatch => "exact_match",
        }
    }
}

/// Case-insensitive equality as a score.
pub fn exact_match(a: &str, b: &str) -> f64 {
    if a.to_lowercase() == b.to_lowercase() {
        1.0
    } else {
        0.0
    }
}

/// ROUGE-L F1 of `current` (prediction) against `previous` (reference).
///
/// Either side tokenising to nothing scores `0.0`, including two empty
/// strings.
pub fn rouge_l_f1(previous: &str, current: &str, stemming: bool) -> f64 {
    let reference = tokenize(previous, stemming);
    let prediction = tokenize(current, stemming);
    if reference.is_empty() || prediction.is_empty() {
        return 0.0;
    }

    let lcs = lcs_len(&reference, &prediction) as f64;
    let precision = lcs / prediction.len() as f64;
    let recall = lcs / reference.len() as f64;
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// Lowercase, split on anything outside `[a-z0-9]`, and optionally stem.
pub fn tokenize(text: &str, stemming: bool) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|t| !t.is_empty())
        .map(|t| {
            if stemming && t.len() > 3 {
                STEMMER.stem(t).into_owned()
            } else {
                t.to_string()
            }
        })
        .collect()
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    // Single rolling row of the classic DP table.
    let mut row = vec![0usize; b.len() + 1];
    for x in a {
        let mut diag = 0;
        for (j, y) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if x == y {
                diag + 1
            } else {
                above.max(row[j])
            };
            diag = above;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_codes_score_one() {
        let s = ConvergenceScorer::default();
        assert!(approx(s.score("CAT3", "CAT3"), 1.0));
        assert!(approx(s.score("cat3", "CAT3"), 1.0));
    }

    #[test]
    fn different_codes_score_zero() {
        let s = ConvergenceScorer::default();
        assert!(approx(s.score("CAT1", "CAT12"), 0.0));
    }

    #[test]
    fn empty_side_scores_zero() {
        let s = ConvergenceScorer::default();
        assert!(approx(s.score("", "CAT1"), 0.0));
        assert!(approx(s.score("", ""), 0.0));
        assert!(approx(s.score("***", "CAT1"), 0.0));
    }

    #[test]
    fn partial_overlap_is_f1() {
        // reference: [cat2, malwar] vs prediction: [cat2] -> P=1, R=0.5
        let got = rouge_l_f1("CAT2 malware", "CAT2", true);
        assert!(approx(got, 2.0 / 3.0), "got {got}");
    }

    #[test]
    fn subsequence_not_substring() {
        // LCS of [a, b, c, d] and [a, c, d] is 3.
        let got = rouge_l_f1("a b c d", "a c d", false);
        let p = 1.0;
        let r = 0.75;
        assert!(approx(got, 2.0 * p * r / (p + r)));
    }

    #[test]
    fn stemming_merges_inflections() {
        assert!(approx(rouge_l_f1("attacking servers", "attacked server", true), 1.0));
        assert!(rouge_l_f1("attacking servers", "attacked server", false) < 1.0);
    }

    #[test]
    fn stemmer_is_porter2() {
        assert_eq!(tokenize("dying skies", true), vec!["die", "sky"]);
        assert_eq!(tokenize("CAT12 scanning", true), vec!["cat12", "scan"]);
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("CAT5 (likely)", false), vec!["cat5", "likely"]);
        assert_eq!(tokenize("  ", false), Vec::<String>::new());
    }

    #[test]
    fn exact_match_fallback() {
        let s = ConvergenceScorer::ExactMatch;
        assert!(approx(s.score("Unknown", "UNKNOWN"), 1.0));
        assert!(approx(s.score("CAT1", "CAT1 "), 0.0));
        assert!(approx(s.score("", ""), 1.0));
    }

    #[test]
    fn scorer_deserializes_from_config() {
        let s: ConvergenceScorer = serde_json::from_str(r#""exact_match""#).unwrap();
        assert_eq!(s, ConvergenceScorer::ExactMatch);
        let s: ConvergenceScorer = serde_json::from_str(r#""rouge_l""#).unwrap();
        assert_eq!(s, ConvergenceScorer::RougeL);
    }
}
