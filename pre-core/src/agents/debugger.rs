//! Debugger agent: diagnoses an execution failure and proposes a patched
//! program. Invoked at most `debugger_budget_per_round` times per round.

use std::sync::Arc;

use regex::Regex;

use crate::agents::call_and_parse;
use crate::artifact::CodeArtifact;
use crate::llm::{AgentRole, ExecutionOutcome, Llm, LlmCompletion};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DebuggerOutput {
    pub diagnosis: String,
    pub patched_source: String,
}

fn build_prompt(source: &str, execution: &ExecutionOutcome) -> String {
    format!(
        "The following program failed:\n```\n{source}\n```\n\n\
         stderr:\n{}\nexit code: {}\n\n\
         Respond with:\n\
         DIAGNOSIS: <one sentence root cause>\n\
         PATCHED:\n```\n<full corrected program>\n```",
        execution.stderr, execution.exit_code,
    )
}

fn parse(text: &str) -> Option<DebuggerOutput> {
    let diagnosis_re = Regex::new(r"DIAGNOSIS:\s*(.+)").ok()?;
    let diagnosis = diagnosis_re.captures(text)?.get(1)?.as_str().trim().to_string();

    let patched_re = Regex::new(r"(?s)PATCHED:\s*```(?:\w*\n)?(.*?)```").ok()?;
    let patched_source = patched_re.captures(text)?.get(1)?.as_str().trim_end().to_string();
    if patched_source.is_empty() {
        return None;
    }

    Some(DebuggerOutput {
        diagnosis,
        patched_source,
    })
}

/// Run the Debugger once, retrying at a bumped temperature on parse failure.
/// Returns a [`CodeArtifact`] derived from `failed.round` at the next round
/// number.
pub async fn run(
    llm: &Arc<dyn Llm>,
    round: u32,
    failed: &CodeArtifact,
    execution: &ExecutionOutcome,
    temperature: f64,
    retry_bump: f64,
) -> Result<(CodeArtifact, String, LlmCompletion)> {
    let prompt = build_prompt(&failed.source, execution);
    let (output, completion) = call_and_parse(
        llm.as_ref(),
        AgentRole::Debugger,
        round,
        &prompt,
        temperature,
        retry_bump,
        2048,
        parse,
    )
    .await?;

    let artifact = CodeArtifact::new(round, output.patched_source).derived_from(failed.round);
    Ok((artifact, output.diagnosis, completion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_diagnosis_and_patched_code() {
        let text = "DIAGNOSIS: missing import\nPATCHED:\n```python\nimport pandas as pd\n```";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.diagnosis, "missing import");
        assert_eq!(parsed.patched_source, "import pandas as pd");
    }

    #[test]
    fn missing_patched_block_fails_to_parse() {
        assert!(parse("DIAGNOSIS: missing import").is_none());
    }
}
