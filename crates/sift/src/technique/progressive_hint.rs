//! Progressive Hint: feed the previous answer back as a hint.

use super::{ClassificationRecord, OUTPUT_FORMAT, TechniqueContext};
use crate::classify::extract;

pub(super) async fn run(
    ctx: &TechniqueContext<'_>,
    prompt: &str,
) -> Result<ClassificationRecord, String> {
    let full_prompt = format!("{prompt} {OUTPUT_FORMAT}");
    let mut last = extract(&ctx.ask(&full_prompt).await?);

    let max_hints = ctx.max_iter();
    if max_hints == 0 {
        return Ok(ctx
            .record(last.category, last.explanation)
            .with_rouge(0.0)
            .with_iteration(0));
    }

    let mut iteration = 0;
    loop {
        iteration += 1;
        let hint = format!("Hint: The category is near: {} {full_prompt}", last.category);
        let current = extract(&ctx.ask(&hint).await?);
        let score = ctx.score(iteration, &last.category, &current.category);

        let converged = ctx.converged(iteration, score);
        if converged || iteration == max_hints {
            if !converged {
                ctx.ceiling_reached();
            }
            return Ok(ctx
                .record(current.category, current.explanation)
                .with_rouge(score)
                .with_iteration(iteration));
        }
        last = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::Technique;
    use crate::technique::TechniqueParams;
    use crate::technique::testing::{Scripted, reply};

    fn ctx<'a>(model: &'a Scripted, max_hints: u32) -> TechniqueContext<'a> {
        TechniqueContext::new(model, Technique::ProgressiveHint, "INC-1", "desc: x").with_params(
            &TechniqueParams {
                max_iter: Some(max_hints),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn zero_hints_makes_one_call() {
        let model = Scripted::new(&[&reply("CAT4")]);
        let record = run(&ctx(&model, 0), "incident").await.unwrap();
        assert_eq!(model.calls(), 1);
        assert_eq!(record.category, "CAT4");
        assert_eq!(record.rouge, Some(0.0));
        assert_eq!(record.iteration, Some(0));
        assert!(model.prompt(0).starts_with("incident If classification"));
    }

    #[tokio::test]
    async fn stops_when_hint_is_confirmed() {
        let model = Scripted::new(&[&reply("CAT1"), &reply("CAT2"), &reply("CAT2")]);
        let record = run(&ctx(&model, 4), "incident").await.unwrap();
        assert_eq!(model.calls(), 3);
        assert_eq!(record.category, "CAT2");
        assert_eq!(record.iteration, Some(2));
        assert_eq!(record.rouge, Some(1.0));
        assert!(model.prompt(1).starts_with("Hint: The category is near: CAT1 incident"));
        assert!(model.prompt(2).starts_with("Hint: The category is near: CAT2 incident"));
    }

    #[tokio::test]
    async fn ceiling_emits_last_answer() {
        let model = Scripted::new(&[&reply("CAT1"), &reply("CAT2"), &reply("CAT3")]);
        let record = run(&ctx(&model, 2), "incident").await.unwrap();
        assert_eq!(model.calls(), 3);
        assert_eq!(record.category, "CAT3");
        assert_eq!(record.iteration, Some(2));
        assert_eq!(record.rouge, Some(0.0));
        assert_eq!(record.id, "INC-1");
        assert_eq!(record.incident_info, "desc: x");
    }
}
