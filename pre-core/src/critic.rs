//! Critic & Memory Gate.
//!
//! Admits or rejects a round's candidate result and maintains a running,
//! Laplace-smoothed estimate of the critic's own false-accept (`alpha`) and
//! false-reject (`beta`) rates, which the belief engine uses to weigh the
//! next verdict.
//!
//! The Critic does not simply relay the Verifier's verdict: it independently
//! combines execution success, the Verifier's verdict, an output-plausibility
//! heuristic, and agreement with prior admitted rounds into its own score,
//! via a [`CriticScorer`] so the weighting can be swapped without touching
//! the alpha/beta estimation below.

use serde::{Deserialize, Serialize};

use crate::belief::CriticVerdict;

/// The independent signals the Critic combines into a score. The control
/// loop assembles this from the round's execution outcome, the Verifier's
/// output, and the admitted-round history before handing it to
/// [`CriticGate::evaluate`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CriticSignals {
    /// The program ran to completion without a runtime error.
    pub execution_success: bool,
    /// The Verifier judged the output sufficient.
    pub verifier_sufficient: bool,
    /// Heuristic plausibility of the output itself, in `[0, 1]`, independent
    /// of what the Verifier said about it.
    pub output_plausibility: f64,
    /// The output agrees with the most recently admitted round's output.
    pub agrees_with_prior_approved: bool,
}

/// Combines [`CriticSignals`] into a single `[0, 1]` score. The default
/// weighting lives in [`WeightedCriticScorer`]; callers that want different
/// heuristics can implement this trait and hand it to
/// [`CriticGate::with_scorer`] without touching alpha/beta estimation.
pub trait CriticScorer: std::fmt::Debug + Send + Sync {
    fn score(&self, signals: &CriticSignals) -> f64;
}

/// The default [`CriticScorer`]: a weighted sum of the four signals.
/// Execution success and the Verifier's verdict carry most of the weight;
/// output plausibility and agreement with prior admitted rounds nudge the
/// score rather than dominate it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightedCriticScorer {
    pub execution_weight: f64,
    pub verifier_weight: f64,
    pub plausibility_weight: f64,
    pub agreement_weight: f64,
}

impl Default for WeightedCriticScorer {
    fn default() -> Self {
        Self {
            execution_weight: 0.40,
            verifier_weight: 0.35,
            plausibility_weight: 0.15,
            agreement_weight: 0.10,
        }
    }
}

impl CriticScorer for WeightedCriticScorer {
    fn score(&self, signals: &CriticSignals) -> f64 {
        let mut score = 0.0;
        if signals.execution_success {
            score += self.execution_weight;
        }
        if signals.verifier_sufficient {
            score += self.verifier_weight;
        }
        score += self.plausibility_weight * signals.output_plausibility.clamp(0.0, 1.0);
        if signals.agrees_with_prior_approved {
            score += self.agreement_weight;
        }
        score.clamp(0.0, 1.0)
    }
}

/// A [`CriticScorer`] that passes `output_plausibility` through unweighted,
/// ignoring the other three signals. Useful for tests exercising the gate's
/// bookkeeping (admission history, alpha/beta) independent of the scoring
/// formula.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughScorer;

impl CriticScorer for PassthroughScorer {
    fn score(&self, signals: &CriticSignals) -> f64 {
        signals.output_plausibility.clamp(0.0, 1.0)
    }
}

fn default_scorer() -> Box<dyn CriticScorer> {
    Box::new(WeightedCriticScorer::default())
}

/// Laplace smoothing pseudo-count added to both the numerator and the
/// denominator of the alpha/beta estimators, so a critic with zero history
/// starts at a defensible 0.5 rather than an undefined 0/0.
const LAPLACE_PSEUDOCOUNT: f64 = 1.0;

/// Configuration for the memory gate's admission threshold and smoothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CriticConfig {
    /// Score at or above which a round is admitted to memory (`tau_c`).
    pub accept_threshold: f64,
    /// Prior alpha/beta used before any history has accumulated.
    pub prior_alpha: f64,
    pub prior_beta: f64,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.6,
            prior_alpha: 0.15,
            prior_beta: 0.15,
        }
    }
}

/// One scored judgment the Critic made about a round's candidate result,
/// plus the gate's admit/reject decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub round: u32,
    /// Raw critic score in `[0, 1]`.
    pub score: f64,
    pub verdict: CriticVerdict,
    /// Whether this round's candidate was admitted to the working memory
    /// the Finalizer ultimately draws from.
    pub admitted: bool,
}

/// Running counts behind the alpha/beta estimate, updated once ground truth
/// (or a later round's contradicting verdict) resolves whether a past verdict
/// was itself correct. Mirrors the moving-window calibration the memory gate
/// keeps over admitted/rejected history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GateStats {
    /// Approvals later confirmed correct.
    pub true_accepts: u64,
    /// Approvals later found incorrect (false accepts).
    pub false_accepts: u64,
    /// Rejections later confirmed incorrect (false rejects).
    pub false_rejects: u64,
    /// Rejections later confirmed correct (true rejects).
    pub true_rejects: u64,
}

impl GateStats {
    pub fn record_resolution(&mut self, verdict: CriticVerdict, was_correct: bool) {
        match (verdict, was_correct) {
            (CriticVerdict::Approve, true) => self.true_accepts += 1,
            (CriticVerdict::Approve, false) => self.false_accepts += 1,
            (CriticVerdict::Reject, false) => self.false_rejects += 1,
            (CriticVerdict::Reject, true) => self.true_rejects += 1,
        }
    }

    /// Laplace-smoothed false-accept rate: false accepts over all approvals.
    pub fn alpha(&self, prior: f64) -> f64 {
        let approvals = (self.true_accepts + self.false_accepts) as f64;
        if approvals == 0.0 {
            return prior;
        }
        (self.false_accepts as f64 + LAPLACE_PSEUDOCOUNT)
            / (approvals + 2.0 * LAPLACE_PSEUDOCOUNT)
    }

    /// Laplace-smoothed false-reject rate: false rejects over all rejections.
    pub fn beta(&self, prior: f64) -> f64 {
        let rejections = (self.false_rejects + self.true_rejects) as f64;
        if rejections == 0.0 {
            return prior;
        }
        (self.false_rejects as f64 + LAPLACE_PSEUDOCOUNT)
            / (rejections + 2.0 * LAPLACE_PSEUDOCOUNT)
    }
}

/// The Critic & Memory Gate: scores a round and decides admission, while
/// tracking the calibration statistics the belief engine consumes.
#[derive(Debug, Serialize, Deserialize)]
pub struct CriticGate {
    config: CriticConfig,
    stats: GateStats,
    history: Vec<GateDecision>,
    #[serde(skip, default = "default_scorer")]
    scorer: Box<dyn CriticScorer>,
}

impl CriticGate {
    pub fn new(config: CriticConfig) -> Self {
        Self::with_scorer(config, default_scorer())
    }

    /// Construct a gate with a non-default [`CriticScorer`].
    pub fn with_scorer(config: CriticConfig, scorer: Box<dyn CriticScorer>) -> Self {
        Self {
            config,
            stats: GateStats::default(),
            history: Vec::new(),
            scorer,
        }
    }

    /// Independently score a round from `signals` and record the gate's
    /// admit/reject decision.
    pub fn evaluate(&mut self, round: u32, signals: CriticSignals) -> GateDecision {
        let score = self.scorer.score(&signals).clamp(0.0, 1.0);
        let admitted = score >= self.config.accept_threshold;
        let verdict = if admitted {
            CriticVerdict::Approve
        } else {
            CriticVerdict::Reject
        };
        let decision = GateDecision {
            round,
            score,
            verdict,
            admitted,
        };
        self.history.push(decision.clone());
        decision
    }

    /// Record that a past round's verdict is now known to have been correct
    /// or not (e.g. a later round contradicted it, or the Finalizer's answer
    /// was externally checked). Updates the running alpha/beta estimate.
    pub fn resolve(&mut self, round: u32, was_correct: bool) {
        if let Some(decision) = self.history.iter().find(|d| d.round == round) {
            self.stats.record_resolution(decision.verdict, was_correct);
        }
    }

    /// Current calibrated false-accept rate.
    pub fn alpha(&self) -> f64 {
        self.stats.alpha(self.config.prior_alpha)
    }

    /// Current calibrated false-reject rate.
    pub fn beta(&self) -> f64 {
        self.stats.beta(self.config.prior_beta)
    }

    pub fn history(&self) -> &[GateDecision] {
        &self.history
    }

    pub fn stats(&self) -> GateStats {
        self.stats
    }
}
