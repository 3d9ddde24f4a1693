//! The closed set of NIST-style incident categories.
//!
//! Each [`Category`] carries a display name, a one-line description, a few
//! worked examples (used in the category-definition prompt block) and an
//! ordered list of lowercase keyword phrases. The keywords drive the
//! masking sub-prompts of progressive rectification and the hypothesis
//! phrasing of hypothesis testing.

use std::fmt;

/// Static description of one category.
#[derive(Debug)]
pub struct CategoryInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub examples: &'static str,
    pub keywords: &'static [&'static str],
}

/// One of the twelve incident classes, or the `UNKNOWN` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Cat1,
    Cat2,
    Cat3,
    Cat4,
    Cat5,
    Cat6,
    Cat7,
    Cat8,
    Cat9,
    Cat10,
    Cat11,
    Cat12,
    Unknown,
}

impl Category {
    /// The twelve classifiable categories in numeric order.
    pub const ALL: [Category; 12] = [
        Category::Cat1,
        Category::Cat2,
        Category::Cat3,
        Category::Cat4,
        Category::Cat5,
        Category::Cat6,
        Category::Cat7,
        Category::Cat8,
        Category::Cat9,
        Category::Cat10,
        Category::Cat11,
        Category::Cat12,
    ];

    fn index(self) -> usize {
        match self {
            Category::Cat1 => 0,
            Category::Cat2 => 1,
            Category::Cat3 => 2,
            Category::Cat4 => 3,
            Category::Cat5 => 4,
            Category::Cat6 => 5,
            Category::Cat7 => 6,
            Category::Cat8 => 7,
            Category::Cat9 => 8,
            Category::Cat10 => 9,
            Category::Cat11 => 10,
            Category::Cat12 => 11,
            Category::Unknown => 12,
        }
    }

    pub fn info(self) -> &'static CategoryInfo {
        &TABLE[self.index()]
    }

    /// Canonical code, e.g. `"CAT7"` or `"UNKNOWN"`.
    pub fn code(self) -> &'static str {
        self.info().code
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn description(self) -> &'static str {
        self.info().description
    }

    pub fn examples(self) -> &'static str {
        self.info().examples
    }

    pub fn keywords(self) -> &'static [&'static str] {
        self.info().keywords
    }

    /// Parse a category code. Surrounding whitespace and case are ignored;
    /// anything other than an exact code returns `None`.
    pub fn parse(label: &str) -> Option<Category> {
        let code = label.trim().to_uppercase();
        Category::ALL
            .into_iter()
            .chain(std::iter::once(Category::Unknown))
            .find(|category| category.code() == code)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Keyword phrases for an extracted category label.
///
/// Labels that are not a known code (free-form text leaked by extraction)
/// have no keywords.
pub fn keywords_for(label: &str) -> &'static [&'static str] {
    Category::parse(label)
        .map(Category::keywords)
        .unwrap_or_default()
}

/// The category-definition block appended to every classification prompt
/// when category definitions are enabled.
pub fn definitions_block() -> String {
    let mut block = String::from("\n        \n        NIST Categories Available for Classification:\n");
    for category in Category::ALL {
        block.push_str(&format!(
            "        - {}: {} – {}.\n            Examples: {}.\n",
            category.code(),
            category.name(),
            category.description(),
            category.examples(),
        ));
    }
    block.push_str(
        "\n        Your task:\
         \n        - Classify the incident below using the most appropriate category code (CAT1 to CAT12).\
         \n        - Justify based on the explanation of the selected category.\
         \n        ",
    );
    block
}

static TABLE: [CategoryInfo; 13] = [
    CategoryInfo {
        code: "CAT1",
        name: "Account Compromise",
        description: "unauthorized access to user or administrator accounts",
        examples: "credential phishing, SSH brute force, OAuth token theft",
        keywords: &[
            "phishing",
            "brute force",
            "unauthorized access",
            "compromised password",
            "credential theft",
            "account compromise",
            "token",
            "oauth",
            "ssh",
            "suspicious login",
        ],
    },
    CategoryInfo {
        code: "CAT2",
        name: "Malware",
        description: "infection by malicious code",
        examples: "ransomware, Trojan horse, macro virus",
        keywords: &[
            "malware",
            "ransomware",
            "trojan",
            "virus",
            "spyware",
            "rootkit",
            "infection",
            "malicious code",
        ],
    },
    CategoryInfo {
        code: "CAT3",
        name: "Denial of Service Attack",
        description: "making systems unavailable",
        examples: "volumetric DoS or DDoS (UDP flood, SYN flood, HTTP, HTTPS), attack on publicly \
                   available APIs or websites, botnet Mirai attacking an institution's server",
        keywords: &[
            "ddos",
            "dos",
            "denial of service",
            "flood",
            "syn flood",
            "udp flood",
            "botnet",
            "api outage",
            "site down",
        ],
    },
    CategoryInfo {
        code: "CAT4",
        name: "Data Leak",
        description: "unauthorized disclosure of sensitive data",
        examples: "database theft, leaked credentials",
        keywords: &[
            "data leak",
            "exposed data",
            "leaked credentials",
            "sensitive information",
            "data exfiltration",
            "unauthorized disclosure",
        ],
    },
    CategoryInfo {
        code: "CAT5",
        name: "Vulnerability Exploitation",
        description: "using technical flaws for attacks",
        examples: "exploitation of critical CVE, remote code execution (RCE), SQL injection in web \
                   applications",
        keywords: &[
            "exploit",
            "vulnerability",
            "cve",
            "remote execution",
            "sql injection",
            "injection",
            "rce",
            "security flaw",
        ],
    },
    CategoryInfo {
        code: "CAT6",
        name: "Insider Abuse",
        description: "malicious actions by internal users",
        examples: "copying confidential data, sabotage",
        keywords: &[
            "insider",
            "internal abuse",
            "employee",
            "internal leak",
            "sabotage",
            "intentional action",
            "staff",
        ],
    },
    CategoryInfo {
        code: "CAT7",
        name: "Social Engineering",
        description: "deception to gain access or data",
        examples: "phishing, vishing, CEO fraud",
        keywords: &[
            "social engineering",
            "phishing",
            "vishing",
            "fraud",
            "deception",
            "spoofing",
            "manipulation",
            "scam",
            "ceo fraud",
        ],
    },
    CategoryInfo {
        code: "CAT8",
        name: "Physical Incident",
        description: "impact due to unauthorized physical access",
        examples: "laptop theft, data center break-in",
        keywords: &[
            "physical access",
            "equipment theft",
            "burglary",
            "unauthorized entry",
            "broken door",
            "physical breach",
        ],
    },
    CategoryInfo {
        code: "CAT9",
        name: "Unauthorized Modification",
        description: "improper changes to systems or data",
        examples: "defacement, record manipulation",
        keywords: &[
            "modification",
            "defacement",
            "unauthorized change",
            "erased",
            "altered record",
            "tampering",
        ],
    },
    CategoryInfo {
        code: "CAT10",
        name: "Misuse of Resources",
        description: "unauthorized use for other purposes",
        examples: "cryptocurrency mining, malware distribution",
        keywords: &[
            "misuse",
            "resource abuse",
            "crypto mining",
            "compromised server",
            "malware hosting",
            "unauthorized use",
        ],
    },
    CategoryInfo {
        code: "CAT11",
        name: "Third-Party Issues",
        description: "security failures by suppliers",
        examples: "SaaS breach, supply chain attack",
        keywords: &[
            "third party",
            "supplier",
            "partner",
            "vendor",
            "supply chain",
            "external breach",
            "saas issue",
        ],
    },
    CategoryInfo {
        code: "CAT12",
        name: "Intrusion Attempt",
        description: "unconfirmed attacks",
        examples: "network scans, brute force, blocked exploits",
        keywords: &[
            "intrusion attempt",
            "scan",
            "reconnaissance",
            "probing",
            "port scan",
            "blocked exploit",
            "failed attempt",
        ],
    },
    CategoryInfo {
        code: "UNKNOWN",
        name: "Unknown/Unclassified",
        description: "incidents that cannot be classified",
        examples: "unspecified security event, unclear incident type",
        keywords: &[
            "unknown",
            "unspecified",
            "not categorized",
            "no category",
            "undefined",
            "other",
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_numeric_order() {
        let codes: Vec<&str> = Category::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes.first(), Some(&"CAT1"));
        assert_eq!(codes.last(), Some(&"CAT12"));
        for (i, code) in codes.iter().enumerate() {
            assert_eq!(*code, format!("CAT{}", i + 1));
        }
    }

    #[test]
    fn parse_is_case_and_whitespace_insensitive() {
        assert_eq!(Category::parse(" cat7 "), Some(Category::Cat7));
        assert_eq!(Category::parse("unknown"), Some(Category::Unknown));
        assert_eq!(Category::parse("CAT13"), None);
        assert_eq!(Category::parse("CAT1 maybe"), None);
    }

    #[test]
    fn keywords_for_unknown_label_is_empty() {
        assert!(keywords_for("ransomware attack").is_empty());
        assert_eq!(keywords_for("cat2").first(), Some(&"malware"));
        assert_eq!(keywords_for("Unknown").len(), 6);
    }

    #[test]
    fn every_category_has_keywords() {
        for category in Category::ALL {
            assert!(!category.keywords().is_empty(), "{category} has no keywords");
        }
    }

    #[test]
    fn definitions_block_lists_every_category() {
        let block = definitions_block();
        for category in Category::ALL {
            assert!(block.contains(&format!("- {}: {}", category.code(), category.name())));
        }
        assert!(block.contains("CAT1 to CAT12"));
        assert!(block.starts_with("\n        \n        NIST Categories Available for Classification:\n"));
        assert!(block.contains(
            "\n        - CAT4: Data Leak – unauthorized disclosure of sensitive data.\
             \n            Examples: database theft, leaked credentials.\n"
        ));
        assert!(block.ends_with("selected category.\n        "));
    }
}
