//! The Plan-Retrieve-Execute control loop: the entry point [`solve`] drives
//! the Analyzer, Planner, Coder, Executor, Verifier, Critic & Memory Gate,
//! Router, Debugger, and Finalizer through rounds until one of the stopping
//! causes fires.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::agents::router::RouterDecision;
use crate::agents::{analyzer, coder, debugger, finalizer, planner, router, verifier};
use crate::artifact::CodeArtifact;
use crate::belief::{expected_information_gain_bits, update_belief, CriticVerdict};
use crate::config::Config;
use crate::critic::{CriticConfig, CriticGate, CriticSignals};
use crate::llm::{Corpus, ExecutionOutcome, Executor, Llm};
use crate::plan::{FixOutcome, Plan};
use crate::preprocessors::build_context_bundle;
use crate::snapshot::{FinalRecord, RoundSnapshot, StopCause, TokenUsage, TokenUsageByRole, Trajectories};
use crate::temperature::{TemperatureController, TemperatureTrack};
use crate::{Error, Result};

/// Output-plausibility heuristic independent of the Verifier's own verdict:
/// a failed run is implausible outright, an empty stdout is weak evidence
/// either way, and a suspiciously large dump reads more like a raw data spill
/// than a distilled answer.
fn output_plausibility(execution: &ExecutionOutcome) -> f64 {
    if !execution.is_success() {
        return 0.0;
    }
    let trimmed = execution.stdout.trim();
    if trimmed.is_empty() {
        0.2
    } else if trimmed.len() > 2000 {
        0.6
    } else {
        1.0
    }
}

/// Whether this round's stdout agrees with the most recently admitted
/// round's stdout — the fourth Critic signal, independent of what the
/// Verifier said about either round individually.
fn agrees_with_prior_approved(trajectories: &Trajectories, execution: &ExecutionOutcome) -> bool {
    trajectories
        .rounds
        .iter()
        .rev()
        .find(|r| r.gate_decision.admitted)
        .is_some_and(|prior| {
            prior.execution.is_success() && execution.is_success() && prior.execution.stdout == execution.stdout
        })
}

/// Number of consecutive identical execution error signatures that trips the
/// `RepeatedErrors` stop cause.
const REPEATED_ERROR_RUN: u32 = 3;

/// Timeout the Executor is given per run.
const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Starting backoff between retries while the executor reports
/// `executor_busy`. Doubled after every stalled attempt, which is what
/// "halves event-firing cadence" (`spec.md` §5) amounts to in a loop driven
/// by request/response rather than a fixed clock tick.
const STALL_BASE_DELAY: Duration = Duration::from_millis(50);

/// Bound on consecutive `executor_busy` retries before giving up and
/// surfacing an `ExecutorTimeout`.
const MAX_STALL_ATTEMPTS: u32 = 5;

/// Uncovered-line threshold past which a round's diff is flagged to the
/// Router as `large_unjustified_diff` rather than silently accepted.
const LARGE_UNJUSTIFIED_DIFF_THRESHOLD: u32 = 5;

/// Unwrap an in-round agent call, converting a surviving `AgentParse` or
/// `AgentTimeout` (i.e. one that outlived its retry) into a `router_abort`
/// break out of the enclosing `'rounds` loop rather than a hard failure —
/// `spec.md` §7 treats these as loop-internal, not pre-loop, errors.
macro_rules! try_agent_or_abort {
    ($label:lifetime, $stop_cause:ident, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(Error::AgentParse { .. }) | Err(Error::AgentTimeout { .. }) => {
                $stop_cause = Some(StopCause::RouterAbort);
                break $label;
            }
            Err(other) => return Err(other),
        }
    };
}

/// Run the executor, backing off while it reports `executor_busy` rather
/// than retrying at full cadence within the same round. Returns the first
/// non-busy outcome together with whether any stall occurred.
async fn execute_with_backpressure(
    executor: &Arc<dyn Executor>,
    code: &str,
    timeout: Duration,
) -> Result<(ExecutionOutcome, bool)> {
    let mut delay = STALL_BASE_DELAY;
    let mut stalled = false;

    for attempt in 0..=MAX_STALL_ATTEMPTS {
        let execution = executor.run(code, timeout).await?;
        if !execution.busy {
            return Ok((execution, stalled));
        }
        if attempt == MAX_STALL_ATTEMPTS {
            return Err(Error::ExecutorTimeout {
                duration_ms: timeout.as_millis() as u64,
            });
        }
        stalled = true;
        debug!(attempt, delay_ms = delay.as_millis() as u64, "executor busy, halving event-firing cadence");
        tokio::time::sleep(delay).await;
        delay *= 2;
    }

    unreachable!("loop above always returns or errors by the last attempt")
}

/// Run the full control loop for one task and return its [`FinalRecord`]
/// together with the recorded [`Trajectories`].
pub async fn solve(
    question: &str,
    data_directory: impl Into<std::path::PathBuf>,
    corpus: &dyn Corpus,
    llm: Arc<dyn Llm>,
    executor: Arc<dyn Executor>,
    config: Config,
) -> Result<(FinalRecord, Trajectories)> {
    config.validate()?;

    let bundle = build_context_bundle(question, data_directory, corpus)?;
    let mut tokens_by_role = TokenUsageByRole::default();

    let mut temperature = TemperatureController::new(
        config.base_temperature_code,
        config.base_temperature_agent,
        config.temperature_step,
        config.max_temperature,
    );
    let retry_bump = config.temperature_step;

    let (analysis, analyzer_completion) = analyzer::run(
        &llm,
        0,
        &bundle,
        temperature.current(TemperatureTrack::Agent),
        retry_bump,
    )
    .await?;
    tokens_by_role.record(crate::llm::AgentRole::Analyzer, analyzer_completion.tokens);

    let mut plan = Plan::new();
    let (planner_output, planner_completion) = planner::run(
        &llm,
        0,
        &bundle,
        &analysis,
        &plan,
        temperature.current(TemperatureTrack::Agent),
        retry_bump,
    )
    .await?;
    tokens_by_role.record(crate::llm::AgentRole::Planner, planner_completion.tokens);
    for step in planner_output.steps {
        plan.add_step(step.title, step.description, step.declared_tools);
    }

    let mut critic_gate = CriticGate::new(CriticConfig {
        accept_threshold: config.critic_accept_threshold,
        prior_alpha: 0.15,
        prior_beta: 0.15,
    });

    let mut trajectories = Trajectories::new(0.5);

    // max_events = 0 means the round budget is exhausted before the loop can
    // admit a single event: skip straight to the Finalizer on the Coder's
    // initial artifact, firing no events and recording no rounds. The belief
    // trajectory stays a single entry equal to the prior.
    if config.max_events == 0 {
        let (artifact, coder_completion) = coder::run(
            &llm,
            0,
            &plan,
            None,
            temperature.current(TemperatureTrack::Code),
            retry_bump,
        )
        .await?;
        tokens_by_role.record(crate::llm::AgentRole::Coder, coder_completion.tokens);

        let (execution, _stalled) =
            execute_with_backpressure(&executor, &artifact.source, EXECUTION_TIMEOUT).await?;

        let (final_answer, finalizer_completion) = finalizer::run(
            &llm,
            0,
            &bundle.question,
            &execution,
            &bundle.format_hints,
            temperature.current(TemperatureTrack::Agent),
            retry_bump,
        )
        .await?;
        tokens_by_role.record(crate::llm::AgentRole::Finalizer, finalizer_completion.tokens);

        let record = FinalRecord {
            question: bundle.question.clone(),
            final_answer,
            stop_cause: StopCause::MaxEventsReached,
            rounds_used: 0,
            events_fired: 0,
            backtracks: plan.total_backtracks(),
            final_belief: trajectories.belief.current(),
            tokens_by_role,
        };
        return Ok((record, trajectories));
    }

    let mut previous_artifact: Option<CodeArtifact> = None;
    let mut last_execution: Option<ExecutionOutcome> = None;
    let mut events_fired: u32 = 0;
    let mut stop_cause: Option<StopCause> = None;

    'rounds: for round in 1..=config.max_rounds {
        let (mut artifact, coder_completion) = try_agent_or_abort!(
            'rounds,
            stop_cause,
            coder::run(
                &llm,
                round,
                &plan,
                previous_artifact.as_ref(),
                temperature.current(TemperatureTrack::Code),
                retry_bump,
            )
            .await
        );
        tokens_by_role.record(crate::llm::AgentRole::Coder, coder_completion.tokens);

        let (mut execution, mut stalled) =
            execute_with_backpressure(&executor, &artifact.source, EXECUTION_TIMEOUT).await?;
        let mut debugger_used = false;
        let mut original_error = None;

        if !execution.is_success() && config.debugger_budget_per_round > 0 {
            debugger_used = true;
            original_error = execution.error_signature().map(str::to_string);
            let (patched, diagnosis, debugger_completion) = try_agent_or_abort!(
                'rounds,
                stop_cause,
                debugger::run(
                    &llm,
                    round,
                    &artifact,
                    &execution,
                    temperature.current(TemperatureTrack::Code),
                    retry_bump,
                )
                .await
            );
            tokens_by_role.record(crate::llm::AgentRole::Debugger, debugger_completion.tokens);
            debug!(round, %diagnosis, "debugger patched a failing round");
            let (patched_execution, patched_stalled) =
                execute_with_backpressure(&executor, &patched.source, EXECUTION_TIMEOUT).await?;
            execution = patched_execution;
            stalled = stalled || patched_stalled;
            artifact = patched;
        }

        let (verdict_output, verifier_completion) = try_agent_or_abort!(
            'rounds,
            stop_cause,
            verifier::run(
                &llm,
                round,
                &bundle.question,
                &execution,
                temperature.current(TemperatureTrack::Agent),
                retry_bump,
            )
            .await
        );
        tokens_by_role.record(crate::llm::AgentRole::Verifier, verifier_completion.tokens);

        let belief_before = trajectories.belief.current();
        let signals = CriticSignals {
            execution_success: execution.is_success(),
            verifier_sufficient: verdict_output.is_sufficient(),
            output_plausibility: output_plausibility(&execution),
            agrees_with_prior_approved: agrees_with_prior_approved(&trajectories, &execution),
        };
        let gate_decision = critic_gate.evaluate(round, signals);
        let eig_bits = expected_information_gain_bits(belief_before, config.eig_accept_p);
        let belief_after = update_belief(
            belief_before,
            gate_decision.verdict,
            critic_gate.alpha(),
            critic_gate.beta(),
        );
        events_fired += 1;

        let large_unjustified_diff =
            previous_artifact.is_some() && artifact.has_large_unjustified_diff(LARGE_UNJUSTIFIED_DIFF_THRESHOLD);
        if large_unjustified_diff {
            debug!(round, "coder changed more than it justified against a plan step");
        }

        let snapshot = RoundSnapshot {
            round,
            artifact: artifact.clone(),
            execution: execution.clone(),
            verifier_verdict: verdict_output.verdict,
            gate_decision: gate_decision.clone(),
            belief_before,
            belief_after,
            eig_bits,
            code_temperature: temperature.current(TemperatureTrack::Code),
            agent_temperature: temperature.current(TemperatureTrack::Agent),
            tokens: coder_completion.tokens,
            debugger_used,
            original_error,
            stall: stalled,
            plan_length: plan.active_len(),
            router_decision: None,
        };
        if stalled {
            debug!(round, "round stalled on executor_busy before completing");
        }
        trajectories.push_round(snapshot);
        temperature.report_round(gate_decision.admitted);

        previous_artifact = Some(artifact);
        last_execution = Some(execution);

        if trajectories.trailing_identical_error_run() >= REPEATED_ERROR_RUN {
            warn!(round, "repeated identical execution errors, stopping");
            stop_cause = Some(StopCause::RepeatedErrors);
            break 'rounds;
        }

        if trajectories.last_two_rounds_agree() {
            info!(round, "two consecutive rounds agree, stopping");
            stop_cause = Some(StopCause::PlanSufficientAgreement);
            break 'rounds;
        }

        if belief_after >= config.belief_threshold {
            info!(round, belief_after, "belief crossed threshold");
            stop_cause = Some(StopCause::BeliefThreshold);
            break 'rounds;
        }

        if eig_bits < config.eig_floor {
            info!(round, eig_bits, "expected information gain below threshold");
            stop_cause = Some(StopCause::EigBelowThreshold);
            break 'rounds;
        }

        if events_fired >= config.max_events {
            info!(round, events_fired, "max events reached");
            stop_cause = Some(StopCause::MaxEventsReached);
            break 'rounds;
        }

        let (decision, router_completion) = try_agent_or_abort!(
            'rounds,
            stop_cause,
            router::run(
                &llm,
                round,
                &plan,
                gate_decision.verdict,
                verdict_output.reason_tag,
                &verdict_output.rationale,
                large_unjustified_diff,
                temperature.current(TemperatureTrack::Agent),
                retry_bump,
            )
            .await
        );
        tokens_by_role.record(crate::llm::AgentRole::Router, router_completion.tokens);

        if let Some(last) = trajectories.rounds.last_mut() {
            last.router_decision = Some(decision.clone());
        }

        match decision {
            RouterDecision::Continue => {}
            RouterDecision::Finalize => {
                stop_cause = Some(StopCause::BeliefThreshold);
                break 'rounds;
            }
            RouterDecision::AddStep {
                title,
                description,
                declared_tools,
            } => {
                plan.add_step(title, description, declared_tools);
            }
            RouterDecision::FixStep {
                index,
                title,
                description,
                declared_tools,
            } => {
                let outcome = plan.fix_step(
                    index,
                    title,
                    description,
                    declared_tools,
                    config.max_backtracks_per_step,
                );
                if outcome == FixOutcome::BacktrackExhausted {
                    warn!(round, %index, "backtrack budget exhausted for step, aborting");
                    stop_cause = Some(StopCause::RouterAbort);
                    break 'rounds;
                }
            }
            RouterDecision::Abort { reason } => {
                debug!(round, %reason, "router aborted the task");
                stop_cause = Some(abort_stop_cause(last_execution.as_ref()));
                break 'rounds;
            }
        }
    }

    let stop_cause = stop_cause.unwrap_or(StopCause::MaxRoundsReached);
    let rounds_used = trajectories.rounds.len() as u32;

    let execution = last_execution
        .ok_or_else(|| Error::Internal("loop produced no rounds before finalizing".into()))?;

    let (final_answer, finalizer_completion) = finalizer::run(
        &llm,
        rounds_used,
        &bundle.question,
        &execution,
        &bundle.format_hints,
        temperature.current(TemperatureTrack::Agent),
        retry_bump,
    )
    .await?;
    tokens_by_role.record(crate::llm::AgentRole::Finalizer, finalizer_completion.tokens);

    let record = FinalRecord {
        question: bundle.question.clone(),
        final_answer,
        stop_cause,
        rounds_used,
        events_fired,
        backtracks: plan.total_backtracks(),
        final_belief: trajectories.belief.current(),
        tokens_by_role,
    };

    Ok((record, trajectories))
}

fn abort_stop_cause(_last_execution: Option<&ExecutionOutcome>) -> StopCause {
    StopCause::RouterAbort
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Difficulty;
    use crate::llm::{AgentRole, CorpusDescription, LlmCompletion};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;

    struct StubCorpus;

    impl Corpus for StubCorpus {
        fn describe(&self, path: &Path) -> Result<CorpusDescription> {
            Ok(CorpusDescription {
                file_name: path.to_string_lossy().to_string(),
                byte_size: 10,
                is_tabular: true,
                preview: String::new(),
            })
        }

        fn list_files(&self) -> Result<Vec<String>> {
            Ok(vec!["data.csv".to_string()])
        }

        fn read_to_string(&self, _path: &Path) -> Result<String> {
            Ok("country,amount\nNL,10\n".to_string())
        }
    }

    /// A deterministic stub `Llm` keyed by `(role, round-ish call count)`
    /// that drives a one-round convergent scenario: the Analyzer and Planner
    /// produce a trivial plan, the Coder emits working code, the Verifier
    /// approves with high confidence, and the Router finalizes.
    struct ScriptedLlm {
        calls: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedLlm {
        fn new() -> Self {
            Self {
                calls: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Llm for ScriptedLlm {
        async fn generate(
            &self,
            role: AgentRole,
            _prompt: &str,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<LlmCompletion> {
            let mut calls = self.calls.lock().unwrap();
            *calls.entry(role.to_string()).or_insert(0) += 1;

            let text = match role {
                AgentRole::Analyzer => {
                    "FILES: data.csv\nENTITIES: NL\nCLARIFICATIONS: NONE".to_string()
                }
                AgentRole::Planner => "STEP: load | read data.csv | pandas".to_string(),
                AgentRole::Coder => {
                    "CODE:\n```python\nprint(\"NL\")\n```\nJUSTIFY: 1 | 1 | 1 | load and print"
                        .to_string()
                }
                AgentRole::Verifier => {
                    "VERDICT: SUFFICIENT\nRATIONALE: matches expected country".to_string()
                }
                AgentRole::Router => "FINALIZE".to_string(),
                AgentRole::Debugger => {
                    "DIAGNOSIS: n/a\nPATCHED:\n```python\nprint(\"NL\")\n```".to_string()
                }
                AgentRole::Finalizer => "ANSWER: NL".to_string(),
            };

            Ok(LlmCompletion::new(text, TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
            }))
        }
    }

    struct StubExecutor;

    #[async_trait]
    impl Executor for StubExecutor {
        async fn run(&self, _code: &str, _timeout: Duration) -> Result<ExecutionOutcome> {
            Ok(ExecutionOutcome::success("NL\n"))
        }
    }

    struct AlwaysBusyExecutor;

    #[async_trait]
    impl Executor for AlwaysBusyExecutor {
        async fn run(&self, _code: &str, _timeout: Duration) -> Result<ExecutionOutcome> {
            Ok(ExecutionOutcome::busy())
        }
    }

    #[tokio::test]
    async fn backpressure_retries_until_ready() {
        let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor {
            queue: Mutex::new(VecDeque::from(vec![
                ExecutionOutcome::busy(),
                ExecutionOutcome::busy(),
                ExecutionOutcome::success("ok\n"),
            ])),
        });
        let (execution, stalled) =
            execute_with_backpressure(&executor, "print(1)", EXECUTION_TIMEOUT)
                .await
                .unwrap();
        assert!(stalled);
        assert!(execution.is_success());
    }

    #[tokio::test]
    async fn backpressure_gives_up_after_max_attempts() {
        let executor: Arc<dyn Executor> = Arc::new(AlwaysBusyExecutor);
        let result = execute_with_backpressure(&executor, "print(1)", EXECUTION_TIMEOUT).await;
        assert!(matches!(result, Err(Error::ExecutorTimeout { .. })));
    }

    struct ScriptedExecutor {
        queue: Mutex<VecDeque<ExecutionOutcome>>,
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn run(&self, _code: &str, _timeout: Duration) -> Result<ExecutionOutcome> {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                Ok(queue.front().cloned().unwrap_or_else(|| ExecutionOutcome::success("")))
            }
        }
    }

    #[tokio::test]
    async fn converges_to_belief_converged_within_one_round() {
        let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new());
        let executor: Arc<dyn Executor> = Arc::new(StubExecutor);
        let config = Config::for_difficulty(Difficulty::Easy);

        let (record, trajectories) = solve(
            "Which country had the most transactions?",
            "/data",
            &StubCorpus,
            llm,
            executor,
            config,
        )
        .await
        .unwrap();

        assert_eq!(record.final_answer, "NL");
        assert_eq!(record.rounds_used, 1);
        assert!(matches!(record.stop_cause, StopCause::BeliefThreshold));
        assert_eq!(trajectories.rounds.len(), 1);
    }
}
