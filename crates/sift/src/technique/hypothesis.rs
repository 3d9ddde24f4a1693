//! Hypothesis Testing: walk CAT1..CAT12 and ask the model to argue for
//! and against each one. The first category the model confirms wins.

use super::{ClassificationRecord, TechniqueContext};
use crate::classify::Category;

/// Explanation recorded when no hypothesis is confirmed.
pub const NOTHING_CONFIRMED: &str = "No category was confirmed by hypothesis testing";

fn hypothesis_prompt(prompt: &str, category: Category) -> String {
    let code = category.code();
    let keywords = category.keywords().join(", ");
    format!(
        "\n            Security Incident Analysis System - HTP\
         \n\
         \n            Incident Description:\
         \n            \"{prompt}\"\
         \n\
         \n            Instructions:\
         \n            For NIST category Considered tha Category: {code} and keyword: {keywords} perform the following steps:\
         \n\
         \n            1. True Hypothesis:\
         \n               - Assume the incident belongs to this category. Justify based on the description and keywords.\
         \n               - Indicate whether the hypothesis is SUPPORTED or NOT SUPPORTED.\
         \n\
         \n            2. False Hypothesis:\
         \n               - Assume the incident does NOT belong to this category. Justify based on the lack of evidence.\
         \n               - Indicate whether the hypothesis is SUPPORTED or NOT SUPPORTED.\
         \n            \
         \n            Return the hypotheses in the following format:\
         \n                True Hypothesis:[SUPPORTED/NOT SUPPORTED] \
         \n                False Hypothesis:[SUPPORTED/NOT SUPPORTED]\
         \n            \
         \n            Final Classification Decision:\
         \n              - If the True Hypothesis is SUPPORTED and the False Hypothesis is NOT SUPPORTED, return:\
         \n                Category: same {code}\
         \n                Explanation: [Justification for the chosen same considered {code}]\
         \n              - Otherwise, return \"UNKNOWN\" as the final classification.\
         \n                Category: UNKNOWN\
         \n                Explanation: UNKNOWN    \
         \n            "
    )
}

pub(super) async fn run(
    ctx: &TechniqueContext<'_>,
    prompt: &str,
) -> Result<ClassificationRecord, String> {
    let tested = Category::ALL.len().min(ctx.max_iter() as usize);

    for (i, category) in Category::ALL.into_iter().take(tested).enumerate() {
        let iteration = i as u32 + 1;
        let answer = ctx
            .ask_extract(&hypothesis_prompt(prompt, category))
            .await?;
        let score = ctx.score(iteration, &answer.category, category.code());
        if ctx.converged(iteration, score) {
            return Ok(ctx
                .record(answer.category, answer.explanation)
                .with_tested_category(category.code())
                .with_rouge(score)
                .with_iteration(iteration));
        }
    }

    ctx.ceiling_reached();
    Ok(ctx
        .record("UNKNOWN", NOTHING_CONFIRMED)
        .with_tested_category("ALL")
        .with_rouge(0.0)
        .with_iteration(tested as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::testing::{Scripted, reply};
    use crate::technique::{Technique, TechniqueParams};

    fn ctx<'a>(model: &'a Scripted, max_iter: Option<u32>) -> TechniqueContext<'a> {
        TechniqueContext::new(model, Technique::HypothesisTesting, "INC-5", "").with_params(
            &TechniqueParams {
                max_iter,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn first_confirmed_hypothesis_wins() {
        let model = Scripted::new(&[
            "Category: UNKNOWN\nExplanation: UNKNOWN",
            "Category: UNKNOWN\nExplanation: UNKNOWN",
            "True Hypothesis: SUPPORTED\nFalse Hypothesis: NOT SUPPORTED\n\
             Category: same CAT3\nExplanation: SYN flood from a botnet",
        ]);
        let record = run(&ctx(&model, None), "syn flood").await.unwrap();

        assert_eq!(model.calls(), 3);
        assert_eq!(record.category, "CAT3");
        assert_eq!(record.explanation, "SYN flood from a botnet");
        assert_eq!(record.tested_category.as_deref(), Some("CAT3"));
        assert_eq!(record.iteration, Some(3));
        assert!(model.prompt(2).contains(
            "Considered tha Category: CAT3 and keyword: ddos, dos, denial of service,"
        ));
    }

    #[test]
    fn prompt_keeps_legacy_layout() {
        let p = hypothesis_prompt("x", Category::Cat2);
        assert!(p.starts_with(
            "\n            Security Incident Analysis System - HTP\n\n            \
             Incident Description:\n            \"x\"\n"
        ));
        assert!(p.contains("For NIST category Considered tha Category: CAT2 and keyword: malware,"));
        assert!(p.contains("\n                True Hypothesis:[SUPPORTED/NOT SUPPORTED] \n"));
        assert!(p.contains("\n                Category: same CAT2\n"));
        assert!(p.ends_with("Explanation: UNKNOWN    \n            "));
    }

    #[tokio::test]
    async fn nothing_confirmed_after_twelve() {
        let model = Scripted::new(&[]);
        let record = run(&ctx(&model, None), "???").await.unwrap();

        assert_eq!(model.calls(), 12);
        assert_eq!(record.category, "UNKNOWN");
        assert_eq!(record.explanation, NOTHING_CONFIRMED);
        assert_eq!(record.tested_category.as_deref(), Some("ALL"));
        assert_eq!(record.rouge, Some(0.0));
        assert_eq!(record.iteration, Some(12));
    }

    #[tokio::test]
    async fn ceiling_caps_tested_categories() {
        let model = Scripted::new(&[&reply("CAT1")]);
        let record = run(&ctx(&model, Some(1)), "phish").await.unwrap();
        assert_eq!(record.category, "CAT1");

        let model = Scripted::answering("CAT9");
        let record = run(&ctx(&model, Some(3)), "phish").await.unwrap();
        assert_eq!(model.calls(), 3);
        assert_eq!(record.category, "UNKNOWN");
        assert_eq!(record.iteration, Some(3));

        let model = Scripted::new(&[]);
        let record = run(&ctx(&model, Some(40)), "phish").await.unwrap();
        assert_eq!(model.calls(), 12);
        assert_eq!(record.iteration, Some(12));
    }
}
