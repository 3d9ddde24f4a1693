//! Turn free-text model output into a `{category, explanation}` pair.
//!
//! Extraction is best-effort and strictly ordered:
//!
//! 1. A JSON object with string `Category` and `Explanation` keys is taken
//!    verbatim (trimmed), with no category normalisation.
//! 2. Otherwise the **last** `Category: … Explanation: …` block in the text
//!    wins. Loops often produce several drafts in one reply and the final
//!    one is authoritative.
//! 3. Asterisks and newlines are stripped from both captures, and the
//!    category capture is canonicalised to `CAT<N>` when it mentions a
//!    code between 1 and 12.
//! 4. If nothing matches, the lowercase `unknown` sentinel is returned.
//!
//! The single-call techniques use [`extract_with_fallback`], which scans
//! the reply line by line when the ordered pass yields the sentinel.
//!
//! Every function here is pure. Techniques call [`extract`] several times
//! per incident, and their convergence logic depends on a given response
//! always extracting the same way.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Sentinel returned when no classification block is present.
pub const UNKNOWN_SENTINEL: &str = "unknown";

/// Default of the line scan in [`extract_with_fallback`].
const SCAN_UNKNOWN: &str = "Unknown";

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)(?:\*\*Category:\*\*|Category:)\s*(.*?)\s*(?:\*\*Explanation:\*\*|Explanation:)\s*([^\n]*)",
    )
    .expect("valid regex")
});

static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bCAT([1-9]|1[0-2])\b").expect("valid regex")
});

/// A category/explanation pair pulled out of a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub category: String,
    pub explanation: String,
}

impl Extraction {
    pub fn new(category: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            explanation: explanation.into(),
        }
    }

    /// The sentinel pair used when nothing could be extracted.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_SENTINEL, UNKNOWN_SENTINEL)
    }

    /// Whether the category is any case variant of "unknown".
    pub fn is_unknown(&self) -> bool {
        self.category.eq_ignore_ascii_case(UNKNOWN_SENTINEL)
    }
}

/// Extract a category and explanation from a model response.
pub fn extract(text: &str) -> Extraction {
    if let Some(pair) = extract_json(text) {
        return pair;
    }

    let Some(caps) = BLOCK_RE.captures_iter(text).last() else {
        return Extraction::unknown();
    };

    let category = clean(caps.get(1).map_or("", |m| m.as_str()));
    let explanation = clean(caps.get(2).map_or("", |m| m.as_str()));

    Extraction {
        category: canonical_category(&category),
        explanation,
    }
}

/// [`extract`], falling back to a line scan when either field comes back
/// as the sentinel.
///
/// The scan keeps the last non-empty value after the first `:` on lines
/// starting with `CAT`/`CATEGORY` or `EXPLANATION`/`JUSTIFICATION`
/// (case-insensitive). A category without an explanation keeps the whole
/// trimmed reply as its explanation.
pub fn extract_with_fallback(text: &str) -> Extraction {
    let primary = extract(text);
    if primary.category == UNKNOWN_SENTINEL || primary.explanation == UNKNOWN_SENTINEL {
        return scan_lines(text);
    }
    primary
}

fn scan_lines(text: &str) -> Extraction {
    let mut category = SCAN_UNKNOWN;
    let mut explanation = None;

    for line in text.trim().lines().map(str::trim) {
        let Some((_, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let upper = line.to_uppercase();
        if upper.starts_with("CAT") {
            category = value;
        } else if upper.starts_with("EXPLANATION") || upper.starts_with("JUSTIFICATION") {
            explanation = Some(value);
        }
    }

    let explanation = match explanation {
        Some(e) => e.to_string(),
        None if category != SCAN_UNKNOWN => text.trim().to_string(),
        None => SCAN_UNKNOWN.to_string(),
    };
    Extraction {
        category: canonical_category(category),
        explanation,
    }
}

/// Canonicalise a category capture.
///
/// Returns `CAT<N>` for the first whole-word `CAT1`..`CAT12` (matched
/// case-insensitively), or the input unchanged. `CAT13` and other
/// out-of-range codes are deliberately left raw.
pub fn canonical_category(raw: &str) -> String {
    let upper = raw.to_uppercase();
    match CODE_RE.captures(&upper).and_then(|c| c.get(1)) {
        Some(n) => format!("CAT{}", n.as_str()),
        None => raw.to_string(),
    }
}

fn extract_json(text: &str) -> Option<Extraction> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;
    let category = obj.get("Category")?.as_str()?;
    let explanation = obj.get("Explanation")?.as_str()?;
    Some(Extraction::new(category.trim(), explanation.trim()))
}

fn clean(capture: &str) -> String {
    capture.replace(['*', '\n'], "").trim().to_string()
}
