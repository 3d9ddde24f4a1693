//! Progressive Rectification: check an answer by masking the keywords of
//! its category and asking the model to recover them; when the answer
//! shifts, re-ask with every rejected category excluded.

use super::{ClassificationRecord, OUTPUT_FORMAT, TechniqueContext};
use crate::classify::keywords_for;

const OUTPUT_BLOCK: &str = "OUTPUT:\n\
Category: [NIST code]\n\
Explanation: [Justification for the chosen category]";

fn mask_prompt(prompt: &str, keyword: &str) -> String {
    format!(
        "\n{prompt}\nReplace all occurrences of the word '{keyword}' with 'X' in a given text. \n\
         Ensure that the substitution preserves the original context and sentence structure.\n"
    )
}

fn validation_prompt(masked: &str, keyword: &str, hypothesis: &str) -> String {
    format!(
        "{masked}\nIncident (masked): {keyword}\nHypothesis: {hypothesis}\n\
         Question: What is the value of X in the Incident? (If not applicable, respond 'Unknown')\n\
         \n{OUTPUT_BLOCK}\n"
    )
}

fn rectify_prompt(prompt: &str, rejected: &[String]) -> String {
    format!(
        "\nIncident: {prompt}\nThe answer is probably not: {}\n\
         Let's think step by step to reclassify.\n\n{OUTPUT_BLOCK}\n",
        rejected.join(", ")
    )
}

pub(super) async fn run(
    ctx: &TechniqueContext<'_>,
    prompt: &str,
) -> Result<ClassificationRecord, String> {
    let initial = ctx
        .ask_extract(&format!("{prompt} {OUTPUT_FORMAT}"))
        .await?;
    let mut current = initial.category.clone();
    // Accumulates over the whole run so rectification never re-suggests an
    // answer it already rejected.
    let mut rejected: Vec<String> = Vec::new();

    let max_iter = ctx.max_iter();
    for attempt in 0..max_iter {
        let iteration = attempt + 1;
        for keyword in keywords_for(&current) {
            let previous = current.clone();
            let masked = ctx.ask(&mask_prompt(prompt, keyword)).await?;
            current = ctx
                .ask_extract(&validation_prompt(&masked, keyword, &current))
                .await?
                .category;

            let quality = ctx.score(iteration, &previous, &current);
            if ctx.converged(iteration, quality) {
                return Ok(ctx
                    .record(current, initial.explanation)
                    .with_quality(quality)
                    .with_iteration(iteration));
            }

            if !rejected.contains(&current) {
                rejected.push(current.clone());
            }
            current = ctx
                .ask_extract(&rectify_prompt(prompt, &rejected))
                .await?
                .category;
        }
    }

    ctx.ceiling_reached();
    Ok(ctx
        .record(current, initial.explanation)
        .with_quality(0.0)
        .with_iteration(max_iter))
}
