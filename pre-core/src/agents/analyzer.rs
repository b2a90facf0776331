//! Analyzer agent: reads the question and context bundle and proposes which
//! files and entities are relevant before planning starts.

use std::sync::Arc;

use crate::agents::call_and_parse;
use crate::bundle::ContextBundle;
use crate::llm::{AgentRole, Llm, LlmCompletion};
use crate::Result;

/// The Analyzer's structured reading of the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerOutput {
    pub relevant_files: Vec<String>,
    pub key_entities: Vec<String>,
    pub clarifications: Vec<String>,
}

fn build_prompt(bundle: &ContextBundle) -> String {
    let files = bundle.file_names().join(", ");
    format!(
        "Question: {q}\nAvailable files: {files}\n\n\
         Respond with exactly these three lines:\n\
         FILES: comma-separated relevant file names\n\
         ENTITIES: comma-separated key entities mentioned in the question\n\
         CLARIFICATIONS: comma-separated ambiguities worth flagging, or NONE",
        q = bundle.question,
    )
}

fn parse_csv_field(text: &str, label: &str) -> Option<Vec<String>> {
    let line = text.lines().find(|l| l.trim_start().starts_with(label))?;
    let value = line.splitn(2, ':').nth(1)?.trim();
    if value.eq_ignore_ascii_case("none") || value.is_empty() {
        return Some(Vec::new());
    }
    Some(value.split(',').map(|s| s.trim().to_string()).collect())
}

fn parse(text: &str) -> Option<AnalyzerOutput> {
    Some(AnalyzerOutput {
        relevant_files: parse_csv_field(text, "FILES")?,
        key_entities: parse_csv_field(text, "ENTITIES")?,
        clarifications: parse_csv_field(text, "CLARIFICATIONS")?,
    })
}

/// Run the Analyzer once, retrying at a bumped temperature on parse failure.
pub async fn run(
    llm: &Arc<dyn Llm>,
    round: u32,
    bundle: &ContextBundle,
    temperature: f64,
    retry_bump: f64,
) -> Result<(AnalyzerOutput, LlmCompletion)> {
    let prompt = build_prompt(bundle);
    call_and_parse(
        llm.as_ref(),
        AgentRole::Analyzer,
        round,
        &prompt,
        temperature,
        retry_bump,
        512,
        parse,
    )
    .await
}
