//! Deterministic keyword-driven back-end for dry runs and tests.

/// Picks a canned classification by looking for keywords in the prompt.
///
/// Rules are checked in order, so a prompt mentioning both a login and
/// malware is classified as account compromise.
#[derive(Debug, Clone, Default)]
pub struct MockModel;

const ACCOUNT_COMPROMISE: &str = "Category: CAT1\nExplanation: Account compromise attempt \
                                  detected based on suspicious login patterns";
const MALWARE: &str = "Category: CAT2\nExplanation: Malware infection detected based on \
                       system scanning results";
const DATA_LEAK: &str = "Category: CAT4\nExplanation: Potential data leak detected through \
                         unusual access patterns";
const INTRUSION: &str = "Category: CAT12\nExplanation: Intrusion attempt detected - requires \
                         further investigation";

impl MockModel {
    pub fn respond(&self, prompt: &str) -> &'static str {
        let lower = prompt.to_lowercase();
        if lower.contains("login") || lower.contains("suspicious") {
            ACCOUNT_COMPROMISE
        } else if lower.contains("malware") {
            MALWARE
        } else if lower.contains("data") && lower.contains("access") {
            DATA_LEAK
        } else {
            INTRUSION
        }
    }
}
