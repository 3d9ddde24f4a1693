//! Free Prompt: one direct call whose sections are switched on and off
//! by the technique parameters.

use super::{ClassificationRecord, TechniqueContext, TechniqueParams};
use crate::classify::extract_with_fallback;

const INTRO: &str = "You are a cybersecurity expert specializing in incident classification.\
    \nYour task is to analyze security incidents and categorize them according to NIST guidelines.";

const CATEGORIES: &str = "NIST SECURITY INCIDENT CATEGORIES:\
    \n\
    \n• CAT1: Account Compromise – Unauthorized access to user or administrator accounts\
    \n  Examples: credential phishing, SSH brute force, OAuth token theft\
    \n\
    \n• CAT2: Malware – Infection by malicious code\
    \n  Examples: ransomware, Trojan horse, macro virus\
    \n\
    \n• CAT3: Denial of Service Attack – Making systems unavailable\
    \n  Examples: volumetric DoS/DDoS (UDP flood, SYN flood), HTTP/HTTPS attacks\
    \n\
    \n• CAT4: Data Leak – Unauthorized disclosure of sensitive data\
    \n  Examples: database theft, leaked credentials\
    \n\
    \n• CAT5: Vulnerability Exploitation – Using technical flaws for attacks\
    \n  Examples: CVE exploitation, RCE, SQL injection, exposed services\
    \n\
    \n• CAT6: Insider Abuse – Malicious actions by internal users\
    \n  Examples: copying confidential data, sabotage\
    \n\
    \n• CAT7: Social Engineering – Deception to gain access or data\
    \n  Examples: phishing, vishing, CEO fraud\
    \n\
    \n• CAT8: Physical Incident – Impact due to unauthorized physical access\
    \n  Examples: laptop theft, data center break-in\
    \n\
    \n• CAT9: Unauthorized Modification – Improper changes to systems or data\
    \n  Examples: defacement, record manipulation\
    \n\
    \n• CAT10: Misuse of Resources – Unauthorized use for other purposes\
    \n  Examples: cryptocurrency mining, malware distribution\
    \n\
    \n• CAT11: Third-Party Issues – Security failures by suppliers\
    \n  Examples: SaaS breach, supply chain attack\
    \n\
    \n• CAT12: Intrusion Attempt – Unconfirmed attacks\
    \n  Examples: network scans, brute force attempts, blocked exploits";

const EXAMPLES: &str = "CLASSIFICATION EXAMPLES:\
    \n\
    \nExample 1:\
    \nIncident: \"Multiple failed SSH login attempts detected from external IP 192.168.1.100\"\
    \nCategory: CAT12\
    \nExplanation: Network scanning and brute force attempts represent intrusion attempts that were blocked/detected but not successful.\
    \n\
    \nExample 2:\
    \nIncident: \"Ransomware detected on workstation, files encrypted with .crypto extension\"\
    \nCategory: CAT2\
    \nExplanation: Clear malware infection with ransomware, representing malicious code that has successfully infected the system.\
    \n\
    \nExample 3:\
    \nIncident: \"Employee accessed and downloaded customer database without authorization\"\
    \nCategory: CAT6\
    \nExplanation: Internal user performing unauthorized actions, representing insider abuse of access privileges.";

const STRUCTURED_OUTPUT: &str = "REQUIRED OUTPUT FORMAT:\
    \nCategory: [CAT1-CAT12 or Unknown]\
    \nExplanation: [Detailed justification for the chosen category]\
    \n\
    \nIf the incident cannot be clearly classified, use:\
    \nCategory: Unknown\
    \nExplanation: Insufficient information or incident doesn't match standard categories";

const LOOSE_OUTPUT: &str = "Provide your classification and reasoning.";

/// Substring triggers and the hint each one adds.
const HINTS: [(&[&str], &str); 5] = [
    (
        &["failed", "login", "attempt", "brute", "password"],
        "• Consider if this is an intrusion attempt (CAT12) or successful compromise (CAT1)",
    ),
    (
        &["malware", "virus", "ransomware", "trojan"],
        "• This appears to involve malicious software (CAT2)",
    ),
    (
        &["ddos", "dos", "flood", "unavailable"],
        "• Consider denial of service attack classification (CAT3)",
    ),
    (
        &["data", "leak", "disclosure", "breach"],
        "• Evaluate if this is unauthorized data disclosure (CAT4)",
    ),
    (
        &["exploit", "vulnerability", "cve", "injection"],
        "• This may involve vulnerability exploitation (CAT5)",
    ),
];

/// `ANALYSIS HINTS:` followed by every hint whose trigger appears in the
/// lowercased incident info, or the empty string.
fn context_hints(incident_info: &str) -> String {
    let lower = incident_info.to_lowercase();
    let hints: Vec<&str> = HINTS
        .iter()
        .filter(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, hint)| *hint)
        .collect();
    if hints.is_empty() {
        return String::new();
    }
    format!("ANALYSIS HINTS:\n{}", hints.join("\n"))
}

/// Sections left out still contribute their blank separator lines.
pub(super) fn free_prompt(incident_info: &str, params: &TechniqueParams) -> String {
    let examples = if params.use_examples.unwrap_or(true) {
        EXAMPLES
    } else {
        ""
    };
    let hints = if params.use_context_hints.unwrap_or(false) {
        context_hints(incident_info)
    } else {
        String::new()
    };
    let output = if params.use_structured_output.unwrap_or(true) {
        STRUCTURED_OUTPUT
    } else {
        LOOSE_OUTPUT
    };
    format!(
        "{INTRO}\n\n{CATEGORIES}\n\n{examples}\n\n{hints}\n\n\
         INCIDENT TO CLASSIFY:\n{incident_info}\n\n{output}"
    )
    .trim()
    .to_string()
}

pub(super) async fn run(ctx: &TechniqueContext<'_>) -> Result<ClassificationRecord, String> {
    let prompt = free_prompt(ctx.incident_info(), ctx.params());
    let got = extract_with_fallback(&ctx.ask(&prompt).await?);
    Ok(ctx.record(got.category, got.explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::Technique;
    use crate::technique::testing::{Scripted, reply};

    #[test]
    fn defaults_include_examples_and_structured_output() {
        let prompt = free_prompt("description: ransomware on host", &TechniqueParams::default());
        assert!(prompt.starts_with(
            "You are a cybersecurity expert specializing in incident classification.\n\
             Your task is to analyze"
        ));
        assert!(prompt.contains("guidelines.\n\nNIST SECURITY INCIDENT CATEGORIES:\n\n• CAT1:"));
        assert!(prompt.contains("blocked exploits\n\nCLASSIFICATION EXAMPLES:\n\nExample 1:"));
        assert!(prompt.contains(
            "insider abuse of access privileges.\n\n\n\n\
             INCIDENT TO CLASSIFY:\ndescription: ransomware on host\n\nREQUIRED OUTPUT FORMAT:"
        ));
        assert!(prompt.ends_with("doesn't match standard categories"));
        assert!(!prompt.contains("ANALYSIS HINTS"));
    }

    #[test]
    fn disabled_sections_leave_their_separators() {
        let params = TechniqueParams {
            use_examples: Some(false),
            use_structured_output: Some(false),
            ..Default::default()
        };
        let prompt = free_prompt("title: x", &params);
        assert!(!prompt.contains("CLASSIFICATION EXAMPLES"));
        assert!(prompt.contains(
            "blocked exploits\n\n\n\n\n\nINCIDENT TO CLASSIFY:\ntitle: x\n\n\
             Provide your classification and reasoning."
        ));
        assert!(prompt.ends_with("reasoning."));
    }

    #[test]
    fn hints_follow_keywords_in_table_order() {
        assert_eq!(context_hints("Scheduled maintenance"), "");
        assert_eq!(
            context_hints("Exploit of CVE-2024-1 after a failed LOGIN"),
            "ANALYSIS HINTS:\n\
             • Consider if this is an intrusion attempt (CAT12) or successful compromise (CAT1)\n\
             • This may involve vulnerability exploitation (CAT5)"
        );

        let params = TechniqueParams {
            use_context_hints: Some(true),
            ..Default::default()
        };
        let prompt = free_prompt("title: trojan dropper", &params);
        assert!(prompt.contains(
            "privileges.\n\nANALYSIS HINTS:\n• This appears to involve malicious software (CAT2)\n\n\
             INCIDENT TO CLASSIFY:"
        ));
    }

    #[tokio::test]
    async fn one_call_with_configured_sections() {
        let model = Scripted::new(&[&reply("CAT6")]);
        let params = TechniqueParams {
            use_examples: Some(false),
            temperature: Some(0.1),
            ..Default::default()
        };
        let ctx = TechniqueContext::new(&model, Technique::FreePrompt, "INC-3", "owner: staff")
            .with_params(&params);
        let records = Technique::FreePrompt.execute(&ctx, "ignored").await.unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(records[0].category, "CAT6");
        assert_eq!(records[0].iteration, None);
        assert!(!model.prompt(0).contains("Example 1:"));
        assert!(model.prompt(0).contains("INCIDENT TO CLASSIFY:\nowner: staff\n"));
    }
}
