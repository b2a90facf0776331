//! Configuration surface for the control loop.
//!
//! A single, explicit, serializable `Config` is passed into [`crate::solve`]
//! rather than read from the environment or a singleton; callers build one
//! with [`ConfigBuilder`] or use [`Config::default`] / [`Config::for_difficulty`].

use serde::{Deserialize, Serialize};

/// Difficulty hint selecting loop budget defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Hard,
}

/// Configuration recognized by the control loop (`spec.md` §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hard cap on belief-updating events.
    pub max_events: u32,
    /// Hard cap on loop iterations (usually slightly larger than `max_events`).
    pub max_rounds: u32,
    /// Confidence-based stop threshold `kappa`.
    pub belief_threshold: f64,
    /// EIG convergence-stop floor `epsilon_eig`, in bits.
    pub eig_floor: f64,
    /// Critic memory-admission threshold `tau_c`.
    pub critic_accept_threshold: f64,
    /// Base (non-code) and code temperatures.
    pub base_temperature_code: f64,
    pub base_temperature_agent: f64,
    /// Maximum temperature reachable by the controller.
    pub max_temperature: f64,
    /// Per-step temperature increase on consecutive insufficient verdicts.
    pub temperature_step: f64,
    /// Maximum `fix_step_N` backtracks allowed against the same index.
    pub max_backtracks_per_step: u32,
    /// Whether the Debugger may run at most once per round (0 or 1).
    pub debugger_budget_per_round: u32,
    /// Difficulty hint, used only to pick defaults via [`Config::for_difficulty`].
    pub difficulty_hint: Difficulty,
    /// Assumed post-approval confidence used by the EIG formula.
    pub eig_accept_p: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_difficulty(Difficulty::Easy)
    }
}

impl Config {
    /// Defaults tuned per difficulty hint, mirroring the observed average
    /// round counts in the system this loop was distilled from (~3 rounds
    /// for easy tasks, ~5.6 for hard tasks).
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        let (max_events, max_rounds) = match difficulty {
            Difficulty::Easy => (8, 10),
            Difficulty::Hard => (16, 20),
        };

        Self {
            max_events,
            max_rounds,
            belief_threshold: 0.92,
            eig_floor: 0.015,
            critic_accept_threshold: 0.6,
            base_temperature_code: 0.1,
            base_temperature_agent: 0.2,
            max_temperature: 0.7,
            temperature_step: 0.05,
            max_backtracks_per_step: 3,
            debugger_budget_per_round: 1,
            difficulty_hint: difficulty,
            eig_accept_p: 0.95,
        }
    }

    /// Validate invariants the loop relies on; returns a [`crate::Error::Config`]
    /// describing the first violation found.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_events == 0 && self.max_rounds == 0 {
            return Err(crate::Error::Config(
                "max_events and max_rounds cannot both be zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.belief_threshold) {
            return Err(crate::Error::Config("belief_threshold must be in [0,1]".into()));
        }
        if !(0.0..=1.0).contains(&self.critic_accept_threshold) {
            return Err(crate::Error::Config(
                "critic_accept_threshold must be in [0,1]".into(),
            ));
        }
        if self.max_temperature < self.base_temperature_code
            || self.max_temperature < self.base_temperature_agent
        {
            return Err(crate::Error::Config(
                "max_temperature must be >= both base temperatures".into(),
            ));
        }
        if self.debugger_budget_per_round > 1 {
            return Err(crate::Error::Config(
                "debugger_budget_per_round must be 0 or 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`], mirroring the fluent style used elsewhere in this
/// crate for orchestration-level configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from the defaults for a given difficulty hint.
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        Self {
            config: Config::for_difficulty(difficulty),
        }
    }

    pub fn max_events(mut self, value: u32) -> Self {
        self.config.max_events = value;
        self
    }

    pub fn max_rounds(mut self, value: u32) -> Self {
        self.config.max_rounds = value;
        self
    }

    pub fn belief_threshold(mut self, value: f64) -> Self {
        self.config.belief_threshold = value;
        self
    }

    pub fn eig_floor(mut self, value: f64) -> Self {
        self.config.eig_floor = value;
        self
    }

    pub fn critic_accept_threshold(mut self, value: f64) -> Self {
        self.config.critic_accept_threshold = value;
        self
    }

    pub fn max_backtracks_per_step(mut self, value: u32) -> Self {
        self.config.max_backtracks_per_step = value;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_defaults_scale_budgets() {
        let easy = Config::for_difficulty(Difficulty::Easy);
        let hard = Config::for_difficulty(Difficulty::Hard);
        assert!(hard.max_events > easy.max_events);
        assert!(hard.max_rounds > easy.max_rounds);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ConfigBuilder::for_difficulty(Difficulty::Easy)
            .max_events(4)
            .belief_threshold(0.8)
            .build();
        assert_eq!(config.max_events, 4);
        assert_eq!(config.belief_threshold, 0.8);
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.belief_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }
}
