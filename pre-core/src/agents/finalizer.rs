//! Finalizer agent: renders the accepted execution output into the answer
//! format the question demands, retrying with emphasis on the format hints
//! if its first attempt violates them.

use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::agents::call_and_parse;
use crate::bundle::FormatHints;
use crate::llm::{AgentRole, ExecutionOutcome, Llm, LlmCompletion};
use crate::Result;

fn build_prompt(question: &str, execution: &ExecutionOutcome, hints: &FormatHints, emphasize: bool) -> String {
    let mut requirements = Vec::new();
    if hints.as_list {
        requirements.push("Render the answer as a list, e.g. \"[a, b]\".".to_string());
    }
    if let Some(places) = hints.decimal_places {
        requirements.push(format!("Round numeric answers to exactly {places} decimal place(s)."));
    }
    let requirements = if requirements.is_empty() {
        "No special formatting is required.".to_string()
    } else {
        requirements.join(" ")
    };
    let emphasis = if emphasize {
        "\nYour previous answer violated the required format. Follow it exactly this time."
    } else {
        ""
    };

    format!(
        "Question: {question}\nProgram stdout:\n{}\n\nFormat requirements: {requirements}{emphasis}\n\n\
         Respond with exactly:\n\
         ANSWER: <final answer>",
        execution.stdout,
    )
}

fn parse(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)ANSWER:\s*(.+)").ok()?;
    let answer = re.captures(text)?.get(1)?.as_str().trim().to_string();
    if answer.is_empty() {
        None
    } else {
        Some(answer)
    }
}

fn violates_format(answer: &str, hints: &FormatHints) -> bool {
    if hints.as_list && !(answer.starts_with('[') && answer.ends_with(']')) {
        return true;
    }
    if let Some(places) = hints.decimal_places {
        if let Some(dot) = answer.rfind('.') {
            let decimals = answer.len() - dot - 1;
            if decimals as u32 != places {
                return true;
            }
        }
    }
    false
}

/// Run the Finalizer. If the first accepted answer violates the question's
/// format hints, retries once with the format requirement emphasized; if the
/// retry still violates them, falls back to `"Not Applicable"` rather than
/// returning an invalid string.
pub async fn run(
    llm: &Arc<dyn Llm>,
    round: u32,
    question: &str,
    execution: &ExecutionOutcome,
    hints: &FormatHints,
    temperature: f64,
    retry_bump: f64,
) -> Result<(String, LlmCompletion)> {
    let prompt = build_prompt(question, execution, hints, false);
    let (answer, completion) = call_and_parse(
        llm.as_ref(),
        AgentRole::Finalizer,
        round,
        &prompt,
        temperature,
        retry_bump,
        512,
        parse,
    )
    .await?;

    if !violates_format(&answer, hints) {
        return Ok((answer, completion));
    }

    let emphasized_prompt = build_prompt(question, execution, hints, true);
    let (retry_answer, retry_completion) = call_and_parse(
        llm.as_ref(),
        AgentRole::Finalizer,
        round,
        &emphasized_prompt,
        temperature,
        retry_bump,
        512,
        parse,
    )
    .await?;

    if violates_format(&retry_answer, hints) {
        warn!(
            %retry_answer,
            "finalizer answer still violates format hints after emphasis retry, using fallback"
        );
        return Ok(("Not Applicable".to_string(), retry_completion));
    }

    Ok((retry_answer, retry_completion))
}
