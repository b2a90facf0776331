//! Verifier agent: judges a round's execution outcome against the question,
//! feeding the Critic & Memory Gate and the Router.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agents::call_and_parse;
use crate::llm::{AgentRole, ExecutionOutcome, Llm, LlmCompletion};
use crate::Result;

/// Whether the Verifier judged the round's stdout a sufficient answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifierVerdict {
    Sufficient,
    Insufficient,
}

/// Why an `Insufficient` verdict was reached — the Router uses this to pick
/// between `add_step` (a step is missing entirely) and `fix_step_N` (an
/// existing step produced the wrong thing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonTag {
    /// The plan never produced the value the question needs.
    MissingStep,
    /// A step ran but computed the wrong value.
    WrongValue,
    /// Output doesn't match the format the question or corpus schema implies.
    FormatViolation,
    /// The program raised or the Executor reported a runtime error.
    RuntimeError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifierOutput {
    pub verdict: VerifierVerdict,
    /// Set exactly when `verdict` is `Insufficient`.
    pub reason_tag: Option<ReasonTag>,
    pub rationale: String,
}

impl VerifierOutput {
    pub fn is_sufficient(&self) -> bool {
        self.verdict == VerifierVerdict::Sufficient
    }
}

fn build_prompt(question: &str, execution: &ExecutionOutcome) -> String {
    format!(
        "Question: {question}\n\nProgram stdout:\n{}\n\nProgram stderr:\n{}\nExit code: {}\n\n\
         Decide whether stdout sufficiently answers the question.\n\
         Respond with:\n\
         VERDICT: SUFFICIENT or INSUFFICIENT\n\
         REASON: missing_step, wrong_value, format_violation, or runtime_error (omit if SUFFICIENT)\n\
         RATIONALE: <one sentence>",
        execution.stdout, execution.stderr, execution.exit_code,
    )
}

fn parse(text: &str) -> Option<VerifierOutput> {
    let verdict_re = Regex::new(r"(?i)VERDICT:\s*(SUFFICIENT|INSUFFICIENT)").ok()?;
    let verdict_str = verdict_re.captures(text)?.get(1)?.as_str().to_uppercase();
    let verdict = match verdict_str.as_str() {
        "SUFFICIENT" => VerifierVerdict::Sufficient,
        "INSUFFICIENT" => VerifierVerdict::Insufficient,
        _ => return None,
    };

    let reason_tag = match verdict {
        VerifierVerdict::Sufficient => None,
        VerifierVerdict::Insufficient => {
            let reason_re = Regex::new(
                r"(?i)REASON:\s*(missing_step|wrong_value|format_violation|runtime_error)",
            )
            .ok()?;
            let tag = reason_re
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_lowercase());
            let tag = match tag.as_deref() {
                Some("missing_step") => ReasonTag::MissingStep,
                Some("wrong_value") => ReasonTag::WrongValue,
                Some("format_violation") => ReasonTag::FormatViolation,
                Some("runtime_error") => ReasonTag::RuntimeError,
                // An insufficient verdict with no recognized reason tag is
                // malformed output, not a valid (if impoverished) response.
                _ => return None,
            };
            Some(tag)
        }
    };

    let rationale_re = Regex::new(r"RATIONALE:\s*(.+)").ok()?;
    let rationale = rationale_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    Some(VerifierOutput {
        verdict,
        reason_tag,
        rationale,
    })
}

/// Run the Verifier once, retrying at a bumped temperature on parse failure.
pub async fn run(
    llm: &Arc<dyn Llm>,
    round: u32,
    question: &str,
    execution: &ExecutionOutcome,
    temperature: f64,
    retry_bump: f64,
) -> Result<(VerifierOutput, LlmCompletion)> {
    let prompt = build_prompt(question, execution);
    call_and_parse(
        llm.as_ref(),
        AgentRole::Verifier,
        round,
        &prompt,
        temperature,
        retry_bump,
        256,
        parse,
    )
    .await
}
