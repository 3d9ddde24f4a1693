//! Self Hint: the model writes its own plan, then refines its answer
//! against that plan and its previous category.

use super::{ClassificationRecord, OUTPUT_FORMAT, TechniqueContext};

/// Plan-and-solve instruction used for the planning calls.
pub const PLAN_INSTRUCTION: &str = "Let's first understand the problem and devise a plan to \
solve the problem. Then, let's carry out the plan and solve the problem step by step.";

pub(super) async fn run(
    ctx: &TechniqueContext<'_>,
    prompt: &str,
) -> Result<ClassificationRecord, String> {
    let planning = format!("{prompt} {PLAN_INSTRUCTION}");
    // The plan is free text and is passed through verbatim.
    let mut plan = ctx.ask(&planning).await?;
    let first = ctx
        .ask_extract(&format!("{planning} {OUTPUT_FORMAT}"))
        .await?;

    let max_iter = ctx.max_iter();
    if max_iter == 0 {
        return Ok(ctx
            .record(first.category, first.explanation)
            .with_rouge(0.0)
            .with_iteration(0));
    }

    let mut previous = first.category;
    let mut iteration = 0;
    loop {
        iteration += 1;
        let reflection =
            format!("{prompt} {plan} The category is: {previous} {OUTPUT_FORMAT}");
        let current = ctx.ask_extract(&reflection).await?;
        let score = ctx.score(iteration, &previous, &current.category);

        let converged = ctx.converged(iteration, score);
        if converged || iteration == max_iter {
            if !converged {
                ctx.ceiling_reached();
            }
            return Ok(ctx
                .record(current.category, current.explanation)
                .with_rouge(score)
                .with_iteration(iteration));
        }

        previous = current.category;
        plan = ctx
            .ask(&format!(
                "{prompt} {PLAN_INSTRUCTION} The category is: {previous}"
            ))
            .await?;
    }
}
