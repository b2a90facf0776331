//! Planner agent: turns the Analyzer's reading into an ordered plan, or
//! (on later rounds) proposes an `add_step` extension to the existing plan.

use std::sync::Arc;

use regex::Regex;

use crate::agents::analyzer::AnalyzerOutput;
use crate::agents::call_and_parse;
use crate::bundle::ContextBundle;
use crate::llm::{AgentRole, Llm, LlmCompletion};
use crate::plan::Plan;
use crate::Result;

/// One step as proposed by the Planner, before it is assigned a stable index
/// by [`Plan::add_step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedStep {
    pub title: String,
    pub description: String,
    pub declared_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOutput {
    pub steps: Vec<ProposedStep>,
}

fn build_prompt(bundle: &ContextBundle, analysis: &AnalyzerOutput, plan_so_far: &Plan) -> String {
    let files = analysis.relevant_files.join(", ");
    let existing = if plan_so_far.is_empty() {
        "none yet".to_string()
    } else {
        plan_so_far
            .steps()
            .iter()
            .map(|s| format!("{}. {}", s.index, s.title))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Question: {q}\nRelevant files: {files}\nExisting plan:\n{existing}\n\n\
         Propose the remaining steps needed to answer the question. Respond with\n\
         one line per step in the form:\n\
         STEP: <title> | <description> | <comma-separated tools>",
        q = bundle.question,
    )
}

fn parse(text: &str) -> Option<PlannerOutput> {
    let re = Regex::new(r"^STEP:\s*(.+?)\s*\|\s*(.+?)\s*\|\s*(.*)$").ok()?;
    let mut steps = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let captures = re.captures(line)?;
        let tools = captures[3]
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        steps.push(ProposedStep {
            title: captures[1].to_string(),
            description: captures[2].to_string(),
            declared_tools: tools,
        });
    }
    if steps.is_empty() {
        None
    } else {
        Some(PlannerOutput { steps })
    }
}

/// Run the Planner once, retrying at a bumped temperature on parse failure.
pub async fn run(
    llm: &Arc<dyn Llm>,
    round: u32,
    bundle: &ContextBundle,
    analysis: &AnalyzerOutput,
    plan_so_far: &Plan,
    temperature: f64,
    retry_bump: f64,
) -> Result<(PlannerOutput, LlmCompletion)> {
    let prompt = build_prompt(bundle, analysis, plan_so_far);
    call_and_parse(
        llm.as_ref(),
        AgentRole::Planner,
        round,
        &prompt,
        temperature,
        retry_bump,
        768,
        parse,
    )
    .await
}
