//! Plan state machine: ordered, append-only plan steps with bounded,
//! index-addressed backtracking via `fix_step_N`.

use serde::{Deserialize, Serialize};

/// A stable, 1-based plan step index. Never reassigned for the life of the
/// plan — `fix_step_N` replaces the step living at an index, it never
/// renumbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepIndex(pub u32);

impl std::fmt::Display for StepIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    /// Replaced by a later `fix_step_N`, or invalidated because an earlier
    /// step was fixed.
    Superseded,
}

/// A unique identity for a step occupant at a given index, incremented every
/// time `fix_step_N` replaces the occupant. Lets tests and snapshots
/// distinguish "step 2, first draft" from "step 2, after fix_step_2".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepIdentity(pub u64);

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: StepIndex,
    pub identity: StepIdentity,
    pub title: String,
    pub description: String,
    pub declared_tools: Vec<String>,
    pub status: StepStatus,
}

/// An ordered, append-only sequence of plan steps. `fix_step_N` never
/// removes an entry — the old occupant at an index is marked `Superseded`
/// and kept, and the replacement is appended. `steps()` therefore returns
/// the full edit history, oldest first; `step(index)` resolves to the most
/// recently appended occupant of that index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
    next_identity: u64,
    /// Highest index ever assigned by `add_step`/`fix_step_N`, used to hand
    /// out the next sequential index regardless of how many superseded
    /// entries have since piled up in `steps`.
    next_index: u32,
    /// Count of `fix_step_N` applications per index, used to enforce
    /// `max_backtracks_per_step`.
    backtracks_per_index: std::collections::HashMap<u32, u32>,
}

/// Outcome of attempting a `fix_step_N` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// The step was replaced and later steps marked superseded.
    Applied,
    /// This would be the `(max_backtracks_per_step + 1)`th fix against this
    /// index; the caller must escalate to `abort` instead.
    BacktrackExhausted,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a fresh plan from (title, description, declared_tools)
    /// triples, as returned by the Planner on its first call.
    pub fn from_steps(steps: impl IntoIterator<Item = (String, String, Vec<String>)>) -> Self {
        let mut plan = Self::new();
        for (title, description, declared_tools) in steps {
            plan.add_step(title, description, declared_tools);
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total number of entries ever recorded, including superseded ones.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Number of distinct step indices currently in the plan — what a
    /// caller normally means by "how many steps does this plan have".
    pub fn active_len(&self) -> usize {
        self.next_index as usize
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// The current occupant of every index, in index order, ignoring
    /// superseded history — what the plan "looks like right now".
    pub fn current_steps(&self) -> Vec<&PlanStep> {
        (1..=self.next_index)
            .filter_map(|i| self.step(StepIndex(i)))
            .collect()
    }

    /// The current occupant of `index` — the most recently appended entry
    /// with this index, whether that's the original step or the result of
    /// a `fix_step_N`.
    pub fn step(&self, index: StepIndex) -> Option<&PlanStep> {
        self.steps.iter().rev().find(|s| s.index == index)
    }

    fn fresh_identity(&mut self) -> StepIdentity {
        self.next_identity += 1;
        StepIdentity(self.next_identity)
    }

    /// Append a new step (Router's `add_step`).
    pub fn add_step(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        declared_tools: Vec<String>,
    ) -> StepIndex {
        self.next_index += 1;
        let index = StepIndex(self.next_index);
        let identity = self.fresh_identity();
        self.steps.push(PlanStep {
            index,
            identity,
            title: title.into(),
            description: description.into(),
            declared_tools,
            status: StepStatus::Pending,
        });
        index
    }

    /// Replace the step at `index` in place (Router's `fix_step_N`): the old
    /// occupant of `index` and every step after it are marked `Superseded`
    /// in place — never removed — and a fresh step (new identity, same
    /// index) is appended. The Planner/Coder regenerate the steps after
    /// `index` on the next round; their superseded predecessors stay in
    /// `steps()` as history.
    ///
    /// Returns [`FixOutcome::BacktrackExhausted`] without mutating the plan
    /// if this index has already been fixed `max_backtracks_per_step` times;
    /// the caller should route to `abort` in that case.
    pub fn fix_step(
        &mut self,
        index: StepIndex,
        title: impl Into<String>,
        description: impl Into<String>,
        declared_tools: Vec<String>,
        max_backtracks_per_step: u32,
    ) -> FixOutcome {
        let count = self.backtracks_per_index.entry(index.0).or_insert(0);
        if *count >= max_backtracks_per_step {
            return FixOutcome::BacktrackExhausted;
        }
        *count += 1;

        for step in self.steps.iter_mut().filter(|s| s.index >= index) {
            step.status = StepStatus::Superseded;
        }
        if index.0 > self.next_index {
            self.next_index = index.0;
        }

        let identity = self.fresh_identity();
        self.steps.push(PlanStep {
            index,
            identity,
            title: title.into(),
            description: description.into(),
            declared_tools,
            status: StepStatus::Pending,
        });

        FixOutcome::Applied
    }

    /// Mark a step completed or failed.
    pub fn set_status(&mut self, index: StepIndex, status: StepStatus) {
        if let Some(step) = self.steps.iter_mut().rev().find(|s| s.index == index) {
            step.status = status;
        }
    }

    /// Total number of `fix_step_N` applications made against `index` so far.
    pub fn backtracks_for(&self, index: StepIndex) -> u32 {
        self.backtracks_per_index.get(&index.0).copied().unwrap_or(0)
    }

    /// Total backtracks across all indices (used for `FinalRecord::backtracks`).
    pub fn total_backtracks(&self) -> u32 {
        self.backtracks_per_index.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_step_assigns_stable_sequential_indices() {
        let mut plan = Plan::new();
        let i1 = plan.add_step("load", "load csv", vec!["pandas".into()]);
        let i2 = plan.add_step("count", "value_counts", vec![]);
        assert_eq!(i1, StepIndex(1));
        assert_eq!(i2, StepIndex(2));
    }

    #[test]
    fn fix_step_changes_identity_but_not_index() {
        let mut plan = Plan::new();
        plan.add_step("load", "load csv", vec![]);
        let i2 = plan.add_step("count", "value_counts", vec![]);
        plan.add_step("print", "print top", vec![]);

        let before_identity = plan.step(i2).unwrap().identity;
        let outcome = plan.fix_step(i2, "count fixed", "value_counts on right column", vec![], 3);
        assert_eq!(outcome, FixOutcome::Applied);

        let after = plan.step(i2).unwrap();
        assert_eq!(after.index, i2);
        assert_ne!(after.identity, before_identity);
    }

    #[test]
    fn fix_step_retains_superseded_steps_in_place() {
        let mut plan = Plan::new();
        plan.add_step("load", "load csv", vec![]);
        let i2 = plan.add_step("count", "value_counts", vec![]);
        let i3 = plan.add_step("print", "print top", vec![]);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.active_len(), 3);

        plan.fix_step(i2, "count fixed", "value_counts on right column", vec![], 3);

        // The old occupants of steps 2 and 3 are retained, not deleted.
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.active_len(), 3);
        assert_eq!(plan.steps()[1].index, i2);
        assert_eq!(plan.steps()[1].status, StepStatus::Superseded);
        assert_eq!(plan.steps()[2].index, i3);
        assert_eq!(plan.steps()[2].status, StepStatus::Superseded);

        // The current occupant of step 2 is the fixed, pending one.
        let current = plan.step(i2).unwrap();
        assert_eq!(current.status, StepStatus::Pending);
        assert_eq!(current.title, "count fixed");
    }

    #[test]
    fn fix_step_beyond_current_length_extends_active_len() {
        let mut plan = Plan::new();
        plan.add_step("load", "load csv", vec![]);
        assert_eq!(plan.active_len(), 1);

        plan.fix_step(StepIndex(5), "jump ahead", "jump ahead", vec![], 3);
        assert_eq!(plan.active_len(), 5);
        assert_eq!(plan.step(StepIndex(5)).unwrap().status, StepStatus::Pending);

        let i6 = plan.add_step("next", "next", vec![]);
        assert_eq!(i6, StepIndex(6));
    }

    #[test]
    fn backtrack_exhaustion_after_max_fixes() {
        let mut plan = Plan::new();
        let i1 = plan.add_step("load", "load csv", vec![]);

        for _ in 0..3 {
            let outcome = plan.fix_step(i1, "retry", "retry", vec![], 3);
            assert_eq!(outcome, FixOutcome::Applied);
        }

        let fourth = plan.fix_step(i1, "retry again", "retry again", vec![], 3);
        assert_eq!(fourth, FixOutcome::BacktrackExhausted);
        assert_eq!(plan.total_backtracks(), 3);
    }

    #[test]
    fn plan_from_steps_empty_is_empty() {
        let plan = Plan::from_steps(Vec::new());
        assert!(plan.is_empty());
    }
}
