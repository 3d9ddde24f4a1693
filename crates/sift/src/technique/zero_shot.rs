//! Zero Shot: one direct call with the category table and no examples.

use super::{ClassificationRecord, TechniqueContext};
use crate::classify::extract_with_fallback;

/// Everything before the incident info.
const HEAD: &str = "You are a cybersecurity expert.\
    \n\
    \nYour task:\
    \nClassify the following incident description into one of the predefined NIST categories (CAT1–CAT12),\
    \nand provide a concise justification for your choice.\
    \n\
    \n---\
    \n\
    \n### NIST Categories for Classification\
    \n\
    \n- **CAT1: Account Compromise** – unauthorized access to user or administrator accounts.  \
    \n  Examples: credential phishing, SSH brute force, OAuth token theft.  \
    \n  Search terms: [\"phishing\", \"brute force\", \"unauthorized access\", \"compromised password\", \"credential theft\", \"account compromise\", \"token\", \"oauth\", \"ssh\", \"suspicious login\"]\
    \n\
    \n- **CAT2: Malware** – infection by malicious code.  \
    \n  Examples: ransomware, Trojan horse, macro virus.  \
    \n  Search terms: [\"malware\", \"ransomware\", \"trojan\", \"virus\", \"spyware\", \"rootkit\", \"infection\", \"malicious code\"]\
    \n\
    \n- **CAT3: Denial of Service Attack** – making systems unavailable.  \
    \n  Examples: volumetric DoS or DDoS (UDP flood, SYN flood, HTTP/HTTPS flood), attacks on APIs or websites, Mirai botnet.  \
    \n  Search terms: [\"ddos\", \"dos\", \"denial of service\", \"flood\", \"syn flood\", \"udp flood\", \"botnet\", \"api outage\", \"site down\"]\
    \n\
    \n- **CAT4: Data Leak** – unauthorized disclosure of sensitive data.  \
    \n  Examples: database theft, leaked credentials.  \
    \n  Search terms: [\"data leak\", \"exposed data\", \"leaked credentials\", \"sensitive information\", \"data exfiltration\", \"unauthorized disclosure\"]\
    \n\
    \n- **CAT5: Vulnerability Exploitation** – using technical flaws for attacks.  \
    \n  Examples: exploitation of CVE, RCE, SQL injection, or insecure service exposure (e.g., NTP monlist, DNS ANY, open Memcached).  \
    \n  Search terms: [\"exploit\", \"vulnerability\", \"cve\", \"remote execution\", \"sql injection\", \"injection\", \"rce\", \"security flaw\"]\
    \n\
    \n- **CAT6: Insider Abuse** – malicious or negligent actions by internal users.  \
    \n  Examples: copying confidential data, sabotage, misuse of access.  \
    \n  Search terms: [\"insider\", \"internal abuse\", \"employee\", \"internal leak\", \"sabotage\", \"intentional action\", \"staff\"]\
    \n\
    \n- **CAT7: Social Engineering** – deception to gain access or data.  \
    \n  Examples: phishing, vishing, CEO fraud, pretexting.  \
    \n  Search terms: [\"social engineering\", \"phishing\", \"vishing\", \"fraud\", \"deception\", \"spoofing\", \"manipulation\", \"scam\", \"ceo fraud\"]\
    \n\
    \n- **CAT8: Physical Incident** – unauthorized physical access or impact.  \
    \n  Examples: equipment theft, data center break-in.  \
    \n  Search terms: [\"physical access\", \"equipment theft\", \"burglary\", \"unauthorized entry\", \"broken door\", \"physical breach\"]\
    \n\
    \n- **CAT9: Unauthorized Modification** – improper changes to systems or data.  \
    \n  Examples: website defacement, alteration of records or logs.  \
    \n  Search terms: [\"modification\", \"defacement\", \"unauthorized change\", \"erased\", \"altered record\", \"tampering\"]\
    \n\
    \n- **CAT10: Misuse of Resources** – using systems for non-authorized purposes.  \
    \n  Examples: cryptocurrency mining, spam campaigns, malware hosting.  \
    \n  Search terms: [\"misuse\", \"resource abuse\", \"crypto mining\", \"compromised server\", \"malware hosting\", \"unauthorized use\"]\
    \n\
    \n- **CAT11: Third-Party Issues** – security incidents from suppliers or service providers.  \
    \n  Examples: SaaS breach, supply-chain compromise.  \
    \n  Search terms: [\"third party\", \"supplier\", \"partner\", \"vendor\", \"supply chain\", \"external breach\", \"saas issue\"]\
    \n\
    \n- **CAT12: Intrusion Attempt** – unconfirmed or prevented attacks.  \
    \n  Examples: network scans, brute force attempts, blocked exploit attempts.  \
    \n  Search terms: [\"intrusion attempt\", \"scan\", \"reconnaissance\", \"probing\", \"port scan\", \"blocked exploit\", \"failed attempt\"]\
    \n\
    \n---\
    \n\
    \n### Input:\
    \nIncident Description:\
    \n";

/// Everything after the incident info.
const TAIL: &str = "\
    \n\
    \n---\
    \n\
    \n### Output format:\
    \nCategory: [CAT number, e.g., CAT5]  \
    \nExplanation: [Concise justification linking the description to the chosen category]\
    \n\
    \nIf classification is not possible, return:\
    \nCategory: Unknown  \
    \nExplanation: Unknown";

pub(super) fn zero_shot_prompt(incident_info: &str) -> String {
    format!("{HEAD}{incident_info}{TAIL}")
}

pub(super) async fn run(ctx: &TechniqueContext<'_>) -> Result<ClassificationRecord, String> {
    let response = ctx.ask(&zero_shot_prompt(ctx.incident_info())).await?;
    let got = extract_with_fallback(&response);
    Ok(ctx.record(got.category, got.explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::Technique;
    use crate::technique::testing::{Scripted, reply};

    fn ctx(model: &Scripted) -> TechniqueContext<'_> {
        TechniqueContext::new(model, Technique::ZeroShot, "INC-7", "title: Port scan")
    }

    #[tokio::test]
    async fn one_call_without_loop_fields() {
        let model = Scripted::new(&[&reply("cat12")]);
        let record = run(&ctx(&model)).await.unwrap();
        assert_eq!(model.calls(), 1);
        assert_eq!(record.category, "CAT12");
        assert_eq!(record.explanation, "looks like cat12");
        assert_eq!(record.rouge, None);
        assert_eq!(record.iteration, None);
        assert_eq!(record.id, "INC-7");
    }

    #[tokio::test]
    async fn rendered_prompt_is_replaced_by_the_fixed_layout() {
        let model = Scripted::new(&[&reply("CAT12")]);
        let records = Technique::ZeroShot
            .execute(&ctx(&model), "rendered incident prompt")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let sent = model.prompt(0);
        assert!(!sent.contains("rendered incident prompt"));
        assert!(sent.starts_with("You are a cybersecurity expert.\n\nYour task:\n"));
        assert!(sent.contains(
            "- **CAT8: Physical Incident** – unauthorized physical access or impact.  \n  \
             Examples: equipment theft, data center break-in.  \n"
        ));
        assert!(sent.contains("### Input:\nIncident Description:\ntitle: Port scan\n\n---\n"));
        assert!(sent.ends_with("Category: Unknown  \nExplanation: Unknown"));
    }

    #[tokio::test]
    async fn loose_reply_is_scanned_line_by_line() {
        let model = Scripted::new(&["After review.\nCAT: cat5\nJustification: open Memcached"]);
        let record = run(&ctx(&model)).await.unwrap();
        assert_eq!(record.category, "CAT5");
        assert_eq!(record.explanation, "open Memcached");
    }
}
