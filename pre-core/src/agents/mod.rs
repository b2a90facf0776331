//! The seven agent roles driven by the control loop, each a thin wrapper
//! around [`crate::llm::Llm`] that builds a role-specific prompt, parses the
//! completion into a structured output, and retries exactly once at a
//! bumped temperature if parsing fails.

pub mod analyzer;
pub mod coder;
pub mod debugger;
pub mod finalizer;
pub mod planner;
pub mod router;
pub mod verifier;

use crate::llm::{AgentRole, Llm, LlmCompletion};
use crate::{Error, Result};

/// Call `llm.generate` for `role`, parse the result with `parse`, and on
/// parse failure retry exactly once at `temperature + retry_bump`. Returns
/// [`Error::AgentParse`] if the retry also fails to parse.
pub(crate) async fn call_and_parse<T>(
    llm: &dyn Llm,
    role: AgentRole,
    round: u32,
    prompt: &str,
    temperature: f64,
    retry_bump: f64,
    max_tokens: u32,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<(T, LlmCompletion)> {
    let completion = llm.generate(role, prompt, temperature, max_tokens).await?;
    if let Some(parsed) = parse(&completion.text) {
        return Ok((parsed, completion));
    }

    let retry_completion = llm
        .generate(role, prompt, temperature + retry_bump, max_tokens)
        .await?;
    match parse(&retry_completion.text) {
        Some(parsed) => Ok((parsed, retry_completion)),
        None => Err(Error::agent_parse(
            role.to_string(),
            round,
            "completion did not match the expected output format after one retry",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Llm for FlakyLlm {
        async fn generate(
            &self,
            _role: AgentRole,
            _prompt: &str,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<LlmCompletion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = if call == 0 { "garbage" } else { "42" };
            Ok(LlmCompletion::new(text, Default::default()))
        }
    }

    #[tokio::test]
    async fn retries_once_on_parse_failure_then_succeeds() {
        let llm = FlakyLlm {
            calls: AtomicU32::new(0),
        };
        let (value, _) = call_and_parse(
            &llm,
            AgentRole::Planner,
            1,
            "prompt",
            0.2,
            0.1,
            256,
            |text| text.parse::<u32>().ok(),
        )
        .await
        .unwrap();
        assert_eq!(value, 42);
    }

    struct AlwaysGarbageLlm;

    #[async_trait]
    impl Llm for AlwaysGarbageLlm {
        async fn generate(
            &self,
            _role: AgentRole,
            _prompt: &str,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<LlmCompletion> {
            Ok(LlmCompletion::new("garbage", Default::default()))
        }
    }

    #[tokio::test]
    async fn gives_up_after_one_retry() {
        let llm = AlwaysGarbageLlm;
        let result = call_and_parse(
            &llm,
            AgentRole::Planner,
            1,
            "prompt",
            0.2,
            0.1,
            256,
            |text| text.parse::<u32>().ok(),
        )
        .await;
        assert!(matches!(result, Err(Error::AgentParse { .. })));
    }
}
