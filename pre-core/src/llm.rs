//! External interfaces: the LLM, code executor, and corpus abstractions the
//! control loop is generic over.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::snapshot::TokenUsage;
use crate::Result;

/// The seven roles a call into [`Llm::generate`] can be made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Analyzer,
    Planner,
    Coder,
    Verifier,
    Router,
    Debugger,
    Finalizer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentRole::Analyzer => "analyzer",
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Verifier => "verifier",
            AgentRole::Router => "router",
            AgentRole::Debugger => "debugger",
            AgentRole::Finalizer => "finalizer",
        };
        write!(f, "{name}")
    }
}

/// A completion returned by an [`Llm`] implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub text: String,
    pub tokens: TokenUsage,
}

impl LlmCompletion {
    pub fn new(text: impl Into<String>, tokens: TokenUsage) -> Self {
        Self {
            text: text.into(),
            tokens,
        }
    }
}

/// The language model interface the control loop drives every agent role
/// through. Implementations are expected to be cheap to clone (e.g. an
/// `Arc`-wrapped client) and safe to call concurrently.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn generate(
        &self,
        role: AgentRole,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<LlmCompletion>;
}

/// Outcome of executing one candidate program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub out_of_memory: bool,
    /// The executor is overloaded and could not run this attempt at all —
    /// distinct from a program failure. The control loop backs off and
    /// retries rather than treating this as an execution error.
    pub busy: bool,
}

impl ExecutionOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
            out_of_memory: false,
            busy: false,
        }
    }

    pub fn failure(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            timed_out: false,
            out_of_memory: false,
            busy: false,
        }
    }

    /// The executor signaled `executor_busy`: it declined to run this
    /// attempt rather than reporting a program failure.
    pub fn busy() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
            out_of_memory: false,
            busy: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.out_of_memory && !self.busy
    }

    /// A coarse error signature (first line of stderr, or a sentinel for
    /// timeout/OOM/busy) used to detect repeated identical failures across
    /// consecutive rounds.
    pub fn error_signature(&self) -> Option<&str> {
        if self.is_success() {
            return None;
        }
        if self.busy {
            return Some("__busy__");
        }
        if self.timed_out {
            return Some("__timeout__");
        }
        if self.out_of_memory {
            return Some("__oom__");
        }
        self.stderr.lines().next().or(Some("__unknown_error__"))
    }
}

/// The sandboxed code executor the control loop hands candidate programs to.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, code: &str, timeout: Duration) -> Result<ExecutionOutcome>;
}

/// A schema/statistics summary for one corpus file, as produced outside the
/// loop by a [`Corpus`] implementation before preprocessing assembles the
/// context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusDescription {
    pub file_name: String,
    pub byte_size: u64,
    pub is_tabular: bool,
    pub preview: String,
}

/// Read-only access to the task's data directory.
pub trait Corpus {
    fn describe(&self, path: &Path) -> Result<CorpusDescription>;
    fn list_files(&self) -> Result<Vec<String>>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
}
