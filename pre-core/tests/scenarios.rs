//! End-to-end scenarios driving [`pre_core::solve`] against deterministic
//! stub `Llm`/`Executor` implementations keyed by (role, call count).

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pre_core::{
    AgentRole, Config, ConfigBuilder, CorpusDescription, Corpus, Difficulty, ExecutionOutcome,
    Executor, Llm, LlmCompletion, Result, StopCause, TokenUsage,
};

/// A corpus with a single tabular file, enough for every scenario below.
struct FixtureCorpus;

impl Corpus for FixtureCorpus {
    fn describe(&self, path: &Path) -> Result<CorpusDescription> {
        Ok(CorpusDescription {
            file_name: path.to_string_lossy().to_string(),
            byte_size: 64,
            is_tabular: true,
            preview: String::new(),
        })
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(vec!["payments.csv".to_string()])
    }

    fn read_to_string(&self, _path: &Path) -> Result<String> {
        Ok("issuing_country,amount\nNL,10\nNL,20\nDE,5\n".to_string())
    }
}

/// Queues one scripted response per role, replaying the last entry once a
/// role's queue is exhausted (agent calls beyond the scripted rounds reuse
/// the final answer, matching a converged steady state).
struct ScriptedLlm {
    queues: Mutex<HashMap<AgentRole, VecDeque<String>>>,
}

impl ScriptedLlm {
    fn new(scripts: Vec<(AgentRole, Vec<&str>)>) -> Self {
        let mut queues = HashMap::new();
        for (role, responses) in scripts {
            queues.insert(role, responses.into_iter().map(String::from).collect());
        }
        Self {
            queues: Mutex::new(queues),
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
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(role).or_default();
        let text = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(LlmCompletion::new(
            text,
            TokenUsage {
                prompt_tokens: 20,
                completion_tokens: 20,
            },
        ))
    }
}

/// Queues one scripted execution outcome per call, replaying the last entry
/// once exhausted.
struct ScriptedExecutor {
    queue: Mutex<VecDeque<ExecutionOutcome>>,
}

impl ScriptedExecutor {
    fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            queue: Mutex::new(outcomes.into_iter().collect()),
        }
    }
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

const ANALYZER_OK: &str = "FILES: payments.csv\nENTITIES: NL\nCLARIFICATIONS: NONE";
const PLANNER_OK: &str = "STEP: load | read payments.csv | pandas\n\
                           STEP: count | value_counts on issuing_country | \n\
                           STEP: print | print the top country |";

fn code(stdout_literal: &str) -> String {
    format!("CODE:\n```python\nprint(\"{stdout_literal}\")\n```\nJUSTIFY: 1 | 1 | 1 | load and print")
}

/// Scenario A — easy convergence: one round, sufficient verdict, Router
/// finalizes immediately.
#[tokio::test]
async fn scenario_a_easy_convergence() {
    let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new(vec![
        (AgentRole::Analyzer, vec![ANALYZER_OK]),
        (AgentRole::Planner, vec![PLANNER_OK]),
        (AgentRole::Coder, vec![&code("NL")]),
        (AgentRole::Verifier, vec!["VERDICT: SUFFICIENT\nRATIONALE: matches expected value"]),
        (AgentRole::Router, vec!["FINALIZE"]),
        (AgentRole::Finalizer, vec!["ANSWER: NL"]),
    ]));
    let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor::new(vec![ExecutionOutcome::success("NL\n")]));

    let (record, trajectories) = pre_core::solve(
        "What is the most common issuing_country in payments.csv?",
        "/data",
        &FixtureCorpus,
        llm,
        executor,
        Config::default(),
    )
    .await
    .unwrap();

    assert_eq!(record.final_answer, "NL");
    assert_eq!(record.events_fired, 1);
    assert!(record.rounds_used <= 2);
    assert!(matches!(record.stop_cause, StopCause::BeliefThreshold));
    assert!(trajectories.belief.current() > 0.5);
}

/// Scenario B — recoverable bug: round 1's code fails, the Debugger patches
/// it, and the patched code succeeds within the same round.
#[tokio::test]
async fn scenario_b_recoverable_bug() {
    let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new(vec![
        (AgentRole::Analyzer, vec![ANALYZER_OK]),
        (AgentRole::Planner, vec![PLANNER_OK]),
        (AgentRole::Coder, vec![&code("NL"), &code("NL")]),
        (
            AgentRole::Debugger,
            vec!["DIAGNOSIS: wrong column name\nPATCHED:\n```python\nprint(\"NL\")\n```"],
        ),
        (
            AgentRole::Verifier,
            vec!["VERDICT: SUFFICIENT\nRATIONALE: matches expected value"],
        ),
        (AgentRole::Router, vec!["CONTINUE", "FINALIZE"]),
        (AgentRole::Finalizer, vec!["ANSWER: NL"]),
    ]));
    let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor::new(vec![
        ExecutionOutcome::failure("KeyError: 'issuing_countryy'", 1),
        ExecutionOutcome::success("NL\n"),
        ExecutionOutcome::success("NL\n"),
    ]));

    let (record, trajectories) = pre_core::solve(
        "What is the most common issuing_country in payments.csv?",
        "/data",
        &FixtureCorpus,
        llm,
        executor,
        Config::default(),
    )
    .await
    .unwrap();

    assert_eq!(record.final_answer, "NL");
    assert!(record.rounds_used >= 2);

    let first_round = &trajectories.rounds[0];
    assert!(first_round.debugger_used);
    assert!(first_round.original_error.is_some());
    assert!(first_round.execution.is_success());

    let second_round = &trajectories.rounds[1];
    assert!(!second_round.debugger_used);
    assert!(second_round.execution.is_success());
}

/// Scenario C — backtrack via fix_step_N: round 1 produces the wrong value,
/// the Router issues a `fix_step_2`, and round 2 produces the right value.
#[tokio::test]
async fn scenario_c_backtrack_via_fix_step() {
    let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new(vec![
        (AgentRole::Analyzer, vec![ANALYZER_OK]),
        (AgentRole::Planner, vec![PLANNER_OK]),
        (AgentRole::Coder, vec![&code("DE"), &code("NL")]),
        (
            AgentRole::Verifier,
            vec![
                "VERDICT: INSUFFICIENT\nREASON: wrong_value\nRATIONALE: expected NL not DE",
                "VERDICT: SUFFICIENT\nRATIONALE: matches expected value",
            ],
        ),
        (
            AgentRole::Router,
            vec!["FIX_STEP: 2 | recompute | use issuing_country not acquirer_country |", "FINALIZE"],
        ),
        (AgentRole::Finalizer, vec!["ANSWER: NL"]),
    ]));
    let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor::new(vec![
        ExecutionOutcome::success("DE\n"),
        ExecutionOutcome::success("NL\n"),
    ]));

    let config = ConfigBuilder::for_difficulty(Difficulty::Easy).build();
    let (record, trajectories) = pre_core::solve(
        "What is the most common issuing_country in payments.csv?",
        "/data",
        &FixtureCorpus,
        llm,
        executor,
        config,
    )
    .await
    .unwrap();

    assert_eq!(record.final_answer, "NL");
    assert_eq!(record.backtracks, 1);
    assert_eq!(trajectories.rounds.len(), 2);
    assert_ne!(trajectories.rounds[0].execution.stdout, trajectories.rounds[1].execution.stdout);
}

/// Scenario D — EIG-floor stop: the Verifier repeatedly returns the same
/// unclear, middling score so belief drifts and flattens without crossing
/// the convergence threshold.
#[tokio::test]
async fn scenario_d_eig_floor_stop() {
    let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new(vec![
        (AgentRole::Analyzer, vec![ANALYZER_OK]),
        (AgentRole::Planner, vec![PLANNER_OK]),
        (AgentRole::Coder, vec![&code("NL")]),
        (
            AgentRole::Verifier,
            vec!["VERDICT: INSUFFICIENT\nREASON: format_violation\nRATIONALE: insufficient, unclear evidence"],
        ),
        (AgentRole::Router, vec!["CONTINUE"]),
        (AgentRole::Finalizer, vec!["ANSWER: NL"]),
    ]));
    let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor::new(vec![ExecutionOutcome::success("NL\n")]));

    let config = ConfigBuilder::for_difficulty(Difficulty::Hard)
        .eig_floor(0.2)
        .build();
    let (record, _trajectories) = pre_core::solve(
        "What is the most common issuing_country in payments.csv?",
        "/data",
        &FixtureCorpus,
        llm,
        executor,
        config,
    )
    .await
    .unwrap();

    assert!(matches!(record.stop_cause, StopCause::EigBelowThreshold));
    assert!(record.final_answer == "NL" || record.final_answer == "Not Applicable");
}

/// Scenario E — budget exhaustion: every round is insufficient and
/// `max_events` is small, so the loop stops on the event budget.
#[tokio::test]
async fn scenario_e_budget_exhaustion() {
    let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new(vec![
        (AgentRole::Analyzer, vec![ANALYZER_OK]),
        (AgentRole::Planner, vec![PLANNER_OK]),
        (AgentRole::Coder, vec![&code("NL")]),
        (
            AgentRole::Verifier,
            vec!["VERDICT: INSUFFICIENT\nREASON: missing_step\nRATIONALE: insufficient, cannot confirm"],
        ),
        (AgentRole::Router, vec!["CONTINUE"]),
        (AgentRole::Finalizer, vec!["ANSWER: NL"]),
    ]));
    let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor::new(vec![ExecutionOutcome::success("NL\n")]));

    let config = ConfigBuilder::for_difficulty(Difficulty::Easy)
        .max_events(4)
        .max_rounds(20)
        .eig_floor(0.0)
        .build();
    let (record, trajectories) = pre_core::solve(
        "What is the most common issuing_country in payments.csv?",
        "/data",
        &FixtureCorpus,
        llm,
        executor,
        config,
    )
    .await
    .unwrap();

    assert_eq!(record.events_fired, 4);
    assert!(matches!(record.stop_cause, StopCause::MaxEventsReached));
    assert_eq!(trajectories.belief.belief_trajectory().len(), 5);
}

/// Scenario F — format discipline: the question demands a list, so the
/// Finalizer's bracketed answer must survive regardless of the Coder's
/// print shape.
#[tokio::test]
async fn scenario_f_format_discipline() {
    let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new(vec![
        (AgentRole::Analyzer, vec![ANALYZER_OK]),
        (AgentRole::Planner, vec![PLANNER_OK]),
        (AgentRole::Coder, vec![&code("7")]),
        (AgentRole::Verifier, vec!["VERDICT: SUFFICIENT\nRATIONALE: matches expected id"]),
        (AgentRole::Router, vec!["FINALIZE"]),
        (AgentRole::Finalizer, vec!["ANSWER: [7]"]),
    ]));
    let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor::new(vec![ExecutionOutcome::success("7\n")]));

    let (record, _trajectories) = pre_core::solve(
        "Provide the response in a list: which transaction id is the outlier?",
        "/data",
        &FixtureCorpus,
        llm,
        executor,
        Config::default(),
    )
    .await
    .unwrap();

    assert_eq!(record.final_answer, "[7]");
}

/// Scenario G — executor backpressure: the executor reports `executor_busy`
/// twice before finally running, and the round that absorbed the stall is
/// marked on its snapshot without otherwise changing the outcome.
#[tokio::test]
async fn scenario_g_executor_busy_stalls_then_succeeds() {
    let llm: Arc<dyn Llm> = Arc::new(ScriptedLlm::new(vec![
        (AgentRole::Analyzer, vec![ANALYZER_OK]),
        (AgentRole::Planner, vec![PLANNER_OK]),
        (AgentRole::Coder, vec![&code("NL")]),
        (AgentRole::Verifier, vec!["VERDICT: SUFFICIENT\nRATIONALE: matches expected value"]),
        (AgentRole::Router, vec!["FINALIZE"]),
        (AgentRole::Finalizer, vec!["ANSWER: NL"]),
    ]));
    let executor: Arc<dyn Executor> = Arc::new(ScriptedExecutor::new(vec![
        ExecutionOutcome::busy(),
        ExecutionOutcome::busy(),
        ExecutionOutcome::success("NL\n"),
    ]));

    let (record, trajectories) = pre_core::solve(
        "What is the most common issuing_country in payments.csv?",
        "/data",
        &FixtureCorpus,
        llm,
        executor,
        Config::default(),
    )
    .await
    .unwrap();

    assert_eq!(record.final_answer, "NL");
    assert!(matches!(record.stop_cause, StopCause::BeliefThreshold));
    assert!(trajectories.rounds[0].stall);
    assert!(trajectories.rounds[0].execution.is_success());
}
