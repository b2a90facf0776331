//! # pre-core
//!
//! A belief-driven Plan-Retrieve-Execute control loop for agentic
//! data-analysis question answering.
//!
//! ## Core components
//!
//! - **Control loop**: [`solve`] drives Analyzer, Planner, Coder, Executor,
//!   Verifier, Critic, Router, Debugger, and Finalizer through rounds.
//! - **Belief / EIG engine**: calibrated Bayesian belief update and Expected
//!   Information Gain, used by the stopping rule.
//! - **Plan state machine**: an ordered, backtrackable plan with stable step
//!   indices.
//! - **Critic & Memory Gate**: admission scoring with a running alpha/beta
//!   calibration estimate.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pre_core::{solve, Config};
//!
//! let (record, trajectories) = solve(
//!     "Which country had the most transactions?",
//!     "/data",
//!     &corpus,
//!     llm,
//!     executor,
//!     Config::default(),
//! )
//! .await?;
//! ```

pub mod agents;
pub mod artifact;
pub mod belief;
pub mod bundle;
pub mod config;
pub mod control_loop;
pub mod critic;
pub mod error;
pub mod llm;
pub mod plan;
pub mod preprocessors;
pub mod snapshot;
pub mod temperature;

pub use artifact::{CodeArtifact, DiffJustification};
pub use belief::{
    clamp_belief, entropy_bits, expected_information_gain_bits, update_belief, BeliefTrajectory,
    CriticVerdict,
};
pub use bundle::{AmbiguousAggregate, ContextBundle, CrossReferenceIndex, FileSchema, FormatHints};
pub use config::{Config, ConfigBuilder, Difficulty};
pub use control_loop::solve;
pub use critic::{
    CriticConfig, CriticGate, CriticScorer, CriticSignals, GateDecision, GateStats,
    PassthroughScorer, WeightedCriticScorer,
};
pub use error::{Error, Result};
pub use llm::{AgentRole, Corpus, CorpusDescription, ExecutionOutcome, Executor, Llm, LlmCompletion};
pub use plan::{FixOutcome, Plan, PlanStep, StepIdentity, StepIndex, StepStatus};
pub use preprocessors::{
    build_context_bundle, build_context_bundle_cached, extract_format_hints, DocumentNormalizer,
    FileAnalysisCache, FileAnalyzer, NormalizedMarkdownCache,
};
pub use snapshot::{FinalRecord, RoundSnapshot, StopCause, TokenUsage, TokenUsageByRole, Trajectories};
pub use temperature::{TemperatureController, TemperatureTrack};
