//! Router agent: decides how the plan evolves after a round's verdict —
//! continue, extend the plan, backtrack a specific step, finalize, or abort.

use std::sync::Arc;

use regex::Regex;

use crate::agents::call_and_parse;
use crate::agents::verifier::ReasonTag;
use crate::belief::CriticVerdict;
use crate::plan::{Plan, StepIndex};
use crate::llm::{AgentRole, Llm, LlmCompletion};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RouterDecision {
    /// Proceed to the next pending step with no plan change.
    Continue,
    /// Append a new step (title, description, tools).
    AddStep {
        title: String,
        description: String,
        declared_tools: Vec<String>,
    },
    /// Replace the step at `index` (title, description, tools).
    FixStep {
        index: StepIndex,
        title: String,
        description: String,
        declared_tools: Vec<String>,
    },
    /// The plan is complete; hand off to the Finalizer.
    Finalize,
    /// The Router gave up on this task.
    Abort { reason: String },
}

fn build_prompt(
    plan: &Plan,
    verdict: CriticVerdict,
    reason_tag: Option<ReasonTag>,
    rationale: &str,
    large_unjustified_diff: bool,
) -> String {
    let steps = plan
        .current_steps()
        .iter()
        .map(|s| format!("{}. [{:?}] {}", s.index, s.status, s.title))
        .collect::<Vec<_>>()
        .join("\n");

    let diff_warning = if large_unjustified_diff {
        "\nWarning: the Coder changed more of the program than it justified against a plan step. \
         Consider FIX_STEP on the step that should have owned that change."
    } else {
        ""
    };

    let reason_line = match reason_tag {
        Some(tag) => format!(
            "\nVerifier reason: {tag:?}. Use FIX_STEP when the reason is WrongValue or \
             FormatViolation and a specific step is at fault; use ADD_STEP when the reason is \
             MissingStep; escalate toward ABORT on repeated RuntimeError."
        ),
        None => String::new(),
    };

    format!(
        "Plan so far:\n{steps}\nLast critic verdict: {verdict:?}\nRationale: {rationale}{reason_line}{diff_warning}\n\n\
         Choose exactly one action and respond with a single line:\n\
         CONTINUE\n\
         ADD_STEP: <title> | <description> | <comma-separated tools>\n\
         FIX_STEP: <index> | <title> | <description> | <comma-separated tools>\n\
         FINALIZE\n\
         ABORT: <reason>",
    )
}

fn parse(text: &str) -> Option<RouterDecision> {
    let line = text.lines().find(|l| !l.trim().is_empty())?.trim();

    if line.eq_ignore_ascii_case("CONTINUE") {
        return Some(RouterDecision::Continue);
    }
    if line.eq_ignore_ascii_case("FINALIZE") {
        return Some(RouterDecision::Finalize);
    }
    if let Some(reason) = line.strip_prefix("ABORT:") {
        return Some(RouterDecision::Abort {
            reason: reason.trim().to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("ADD_STEP:") {
        let re = Regex::new(r"^\s*(.+?)\s*\|\s*(.+?)\s*\|\s*(.*)$").ok()?;
        let captures = re.captures(rest)?;
        return Some(RouterDecision::AddStep {
            title: captures[1].to_string(),
            description: captures[2].to_string(),
            declared_tools: split_tools(&captures[3]),
        });
    }
    if let Some(rest) = line.strip_prefix("FIX_STEP:") {
        let re = Regex::new(r"^\s*(\d+)\s*\|\s*(.+?)\s*\|\s*(.+?)\s*\|\s*(.*)$").ok()?;
        let captures = re.captures(rest)?;
        let index: u32 = captures[1].parse().ok()?;
        return Some(RouterDecision::FixStep {
            index: StepIndex(index),
            title: captures[2].to_string(),
            description: captures[3].to_string(),
            declared_tools: split_tools(&captures[4]),
        });
    }
    None
}

fn split_tools(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Run the Router once, retrying at a bumped temperature on parse failure.
pub async fn run(
    llm: &Arc<dyn Llm>,
    round: u32,
    plan: &Plan,
    verdict: CriticVerdict,
    reason_tag: Option<ReasonTag>,
    rationale: &str,
    large_unjustified_diff: bool,
    temperature: f64,
    retry_bump: f64,
) -> Result<(RouterDecision, LlmCompletion)> {
    let prompt = build_prompt(plan, verdict, reason_tag, rationale, large_unjustified_diff);
    call_and_parse(
        llm.as_ref(),
        AgentRole::Router,
        round,
        &prompt,
        temperature,
        retry_bump,
        256,
        parse,
    )
    .await
}
