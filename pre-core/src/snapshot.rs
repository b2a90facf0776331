//! Per-round snapshots, trajectories, and the final record emitted by the
//! control loop.

use serde::{Deserialize, Serialize};

use crate::agents::router::RouterDecision;
use crate::agents::verifier::VerifierVerdict;
use crate::artifact::CodeArtifact;
use crate::belief::BeliefTrajectory;
use crate::critic::GateDecision;
use crate::llm::{AgentRole, ExecutionOutcome};
use crate::temperature::TemperatureTrack;

/// Token usage for one agent call, accumulated per round and per final
/// record for cost accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Per-agent-role token usage breakdown, accumulated across the whole task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageByRole {
    entries: std::collections::BTreeMap<String, TokenUsage>,
}

impl TokenUsageByRole {
    pub fn record(&mut self, role: AgentRole, usage: TokenUsage) {
        self.entries.entry(role.to_string()).or_default().add(usage);
    }

    pub fn for_role(&self, role: AgentRole) -> TokenUsage {
        self.entries.get(&role.to_string()).copied().unwrap_or_default()
    }

    pub fn total(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for usage in self.entries.values() {
            total.add(*usage);
        }
        total
    }
}

/// An immutable record of one completed loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round: u32,
    pub artifact: CodeArtifact,
    pub execution: ExecutionOutcome,
    pub verifier_verdict: VerifierVerdict,
    pub gate_decision: GateDecision,
    pub belief_before: f64,
    pub belief_after: f64,
    pub eig_bits: f64,
    pub code_temperature: f64,
    pub agent_temperature: f64,
    pub tokens: TokenUsage,
    /// Whether the Debugger ran during this round.
    pub debugger_used: bool,
    /// The Coder's original execution error, if the Debugger had to run.
    pub original_error: Option<String>,
    /// Whether the executor signaled `executor_busy` at least once before
    /// this round's execution finally ran.
    pub stall: bool,
    /// Number of distinct steps in the plan as of this round, before any
    /// `add_step`/`fix_step_N` the Router applies after seeing it.
    pub plan_length: usize,
    /// The Router's decision for this round, if it was reached — `None` when
    /// a stop condition fired before the Router ran.
    pub router_decision: Option<RouterDecision>,
}

/// Why the loop stopped. Exactly one of these is present on every
/// `FinalRecord` (`spec.md` §8 invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    /// Belief crossed `belief_threshold`.
    BeliefThreshold,
    /// Two consecutive rounds produced identical successful outputs with a
    /// sufficient Verifier verdict.
    PlanSufficientAgreement,
    /// EIG fell below `eig_floor`.
    EigBelowThreshold,
    /// `max_events` reached.
    MaxEventsReached,
    /// `max_rounds` reached without convergence.
    MaxRoundsReached,
    /// Three or more consecutive rounds failed with an identical error
    /// signature.
    RepeatedErrors,
    /// The Router gave up: backtrack budget exhausted on a step, an agent
    /// parse error survived its retry, or an agent timeout survived its
    /// retry.
    RouterAbort,
}

/// The trajectories accumulated over a task's lifetime, returned alongside
/// the [`FinalRecord`] for offline analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectories {
    pub belief: BeliefTrajectory,
    pub rounds: Vec<RoundSnapshot>,
}

impl Trajectories {
    pub fn new(initial_belief: f64) -> Self {
        Self {
            belief: BeliefTrajectory::new(initial_belief),
            rounds: Vec::new(),
        }
    }

    pub fn push_round(&mut self, snapshot: RoundSnapshot) {
        self.belief.record_event(snapshot.eig_bits, snapshot.belief_after);
        self.rounds.push(snapshot);
    }

    pub fn last_round(&self) -> Option<&RoundSnapshot> {
        self.rounds.last()
    }

    /// Length of the longest run of trailing rounds sharing the same
    /// execution error signature, used to detect the `RepeatedErrors` stop
    /// cause.
    pub fn trailing_identical_error_run(&self) -> u32 {
        let mut run = 0;
        let mut signature: Option<&str> = None;
        for round in self.rounds.iter().rev() {
            let Some(sig) = round.execution.error_signature() else {
                break;
            };
            match signature {
                None => {
                    signature = Some(sig);
                    run = 1;
                }
                Some(prev) if prev == sig => run += 1,
                Some(_) => break,
            }
        }
        run
    }

    /// True if the last two rounds both succeeded, produced identical
    /// stdout, and were admitted by the Critic & Memory Gate — the
    /// `plan_sufficient_agreement` stop condition.
    pub fn last_two_rounds_agree(&self) -> bool {
        let len = self.rounds.len();
        if len < 2 {
            return false;
        }
        let a = &self.rounds[len - 2];
        let b = &self.rounds[len - 1];
        a.execution.is_success()
            && b.execution.is_success()
            && a.gate_decision.admitted
            && b.gate_decision.admitted
            && a.execution.stdout == b.execution.stdout
    }
}

/// The final, immutable output of one `solve()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRecord {
    pub question: String,
    pub final_answer: String,
    pub stop_cause: StopCause,
    pub rounds_used: u32,
    pub events_fired: u32,
    pub backtracks: u32,
    pub final_belief: f64,
    pub tokens_by_role: TokenUsageByRole,
}
