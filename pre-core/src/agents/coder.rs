//! Coder agent: produces a full candidate program per round, justifying
//! every changed region against a plan step index (the incremental-coder
//! discipline).

use std::sync::Arc;

use regex::Regex;

use crate::agents::call_and_parse;
use crate::artifact::{CodeArtifact, DiffJustification};
use crate::plan::{Plan, StepIndex};
use crate::llm::{AgentRole, Llm, LlmCompletion};
use crate::Result;

fn build_prompt(plan: &Plan, previous: Option<&CodeArtifact>) -> String {
    let steps = plan
        .steps()
        .iter()
        .map(|s| format!("{}. {} — {}", s.index, s.title, s.description))
        .collect::<Vec<_>>()
        .join("\n");

    let previous_block = match previous {
        Some(artifact) => format!(
            "\nPrevious candidate program (round {}):\n```\n{}\n```",
            artifact.round, artifact.source
        ),
        None => String::new(),
    };

    format!(
        "Plan steps:\n{steps}\n{previous_block}\n\n\
         Write one complete Python program implementing all pending steps. \
         Preserve working code from the previous program unless a step requires changing it.\n\
         Respond with:\n\
         CODE:\n```\n<full program>\n```\n\
         then one JUSTIFY line per changed region:\n\
         JUSTIFY: <step index> | <line start> | <line end> | <reason>",
    )
}

fn parse(round: u32, text: &str) -> Option<CodeArtifact> {
    let code_re = Regex::new(r"(?s)CODE:\s*```(?:\w*\n)?(.*?)```").ok()?;
    let source = code_re.captures(text)?.get(1)?.as_str().trim_end().to_string();
    if source.is_empty() {
        return None;
    }

    let justify_re = Regex::new(r"^JUSTIFY:\s*(\d+)\s*\|\s*(\d+)\s*\|\s*(\d+)\s*\|\s*(.+)$").ok()?;
    let mut artifact = CodeArtifact::new(round, source);
    for line in text.lines() {
        let line = line.trim();
        if let Some(captures) = justify_re.captures(line) {
            let step_index: u32 = captures[1].parse().ok()?;
            let line_start: u32 = captures[2].parse().ok()?;
            let line_end: u32 = captures[3].parse().ok()?;
            artifact = artifact.with_justification(DiffJustification {
                step_index: StepIndex(step_index),
                reason: captures[4].to_string(),
                line_start,
                line_end,
            });
        }
    }
    Some(artifact)
}

/// Run the Coder once, retrying at a bumped temperature on parse failure.
pub async fn run(
    llm: &Arc<dyn Llm>,
    round: u32,
    plan: &Plan,
    previous: Option<&CodeArtifact>,
    temperature: f64,
    retry_bump: f64,
) -> Result<(CodeArtifact, LlmCompletion)> {
    let prompt = build_prompt(plan, previous);
    call_and_parse(
        llm.as_ref(),
        AgentRole::Coder,
        round,
        &prompt,
        temperature,
        retry_bump,
        2048,
        |text| parse(round, text),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_block_and_justifications() {
        let text = "CODE:\n```python\nimport pandas as pd\nprint(1)\n```\n\
                     JUSTIFY: 1 | 1 | 2 | load and print";
        let artifact = parse(1, text).unwrap();
        assert_eq!(artifact.source, "import pandas as pd\nprint(1)");
        assert_eq!(artifact.justifications.len(), 1);
        assert_eq!(artifact.justifications[0].step_index, StepIndex(1));
    }

    #[test]
    fn missing_code_block_fails_to_parse() {
        assert!(parse(1, "JUSTIFY: 1 | 1 | 2 | nothing here").is_none());
    }

    #[test]
    fn empty_code_block_fails_to_parse() {
        assert!(parse(1, "CODE:\n```\n```").is_none());
    }
}
