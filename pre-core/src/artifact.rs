//! Code artifacts produced by the Coder agent.

use serde::{Deserialize, Serialize};

use crate::plan::StepIndex;

/// One contiguous region of a [`CodeArtifact::source`] that the Coder
/// justified as changed on this round, tagged with the plan step index it
/// serves. Unchanged regions carry no entry here — the incremental-coder
/// discipline forbids touching them without a matching justification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffJustification {
    pub step_index: StepIndex,
    /// Human-readable reason the Coder gave for touching this region,
    /// normally echoing the plan step's description.
    pub reason: String,
    /// 1-based, inclusive line range in `CodeArtifact::source` this
    /// justification covers.
    pub line_start: u32,
    pub line_end: u32,
}

/// A candidate program produced by the Coder for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub round: u32,
    /// Full source of the candidate program, not a diff — the Coder always
    /// emits whole files, but must justify each changed region via
    /// `justifications`.
    pub source: String,
    pub justifications: Vec<DiffJustification>,
    /// Source of the artifact this one was derived from, if any (the
    /// previous round's artifact, when only a subset of steps changed).
    pub derived_from_round: Option<u32>,
}

impl CodeArtifact {
    pub fn new(round: u32, source: impl Into<String>) -> Self {
        Self {
            round,
            source: source.into(),
            justifications: Vec::new(),
            derived_from_round: None,
        }
    }

    pub fn with_justification(mut self, justification: DiffJustification) -> Self {
        self.justifications.push(justification);
        self
    }

    pub fn derived_from(mut self, round: u32) -> Self {
        self.derived_from_round = Some(round);
        self
    }

    /// Step indices this artifact claims to have touched on this round.
    pub fn touched_steps(&self) -> Vec<StepIndex> {
        let mut indices: Vec<StepIndex> =
            self.justifications.iter().map(|j| j.step_index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// True if every justification falls within the source's line count —
    /// a cheap sanity check the control loop runs before handing the
    /// artifact to the Executor.
    pub fn justifications_in_bounds(&self) -> bool {
        let line_count = self.source.lines().count() as u32;
        self.justifications
            .iter()
            .all(|j| j.line_start >= 1 && j.line_end <= line_count.max(1) && j.line_start <= j.line_end)
    }

    /// Number of source lines not covered by any justification — the
    /// incremental-coder discipline's violation count. Meaningless on the
    /// first round of a task, since every line is new; callers skip this
    /// check until there is a prior round's artifact to diff against.
    pub fn uncovered_line_count(&self) -> u32 {
        let line_count = self.source.lines().count() as u32;
        if line_count == 0 {
            return 0;
        }
        let mut covered = vec![false; line_count as usize];
        for justification in &self.justifications {
            let start = justification.line_start.max(1);
            let end = justification.line_end.min(line_count);
            for line in start..=end.max(start) {
                if let Some(slot) = covered.get_mut((line - 1) as usize) {
                    *slot = true;
                }
            }
        }
        covered.iter().filter(|c| !**c).count() as u32
    }

    /// True if this artifact left more than `threshold` source lines
    /// uncovered by any justification — the `large_unjustified_diff` signal
    /// surfaced to the Router rather than raised as a hard error. Only
    /// meaningful once there is a prior round's artifact to diff against;
    /// the control loop skips this check on the first round.
    pub fn has_large_unjustified_diff(&self, threshold: u32) -> bool {
        self.uncovered_line_count() > threshold
    }
}
