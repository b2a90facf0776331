//! Temperature Controller: adaptive sampling temperature per agent family,
//! rising on consecutive insufficient verdicts and resetting on success.

use serde::{Deserialize, Serialize};

/// Which temperature track a call draws from. Code generation and the other
/// agent roles are tracked separately because the Coder benefits from a
/// colder default than the reasoning-heavy roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureTrack {
    Code,
    Agent,
}

/// Adaptive temperature schedule: `T0`, step `delta`, ceiling `T_max`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureController {
    base_code: f64,
    base_agent: f64,
    step: f64,
    max: f64,
    current_code: f64,
    current_agent: f64,
    consecutive_insufficient: u32,
}

impl TemperatureController {
    pub fn new(base_code: f64, base_agent: f64, step: f64, max: f64) -> Self {
        Self {
            base_code,
            base_agent,
            step,
            max,
            current_code: base_code,
            current_agent: base_agent,
            consecutive_insufficient: 0,
        }
    }

    /// Current temperature for the given track.
    pub fn current(&self, track: TemperatureTrack) -> f64 {
        match track {
            TemperatureTrack::Code => self.current_code,
            TemperatureTrack::Agent => self.current_agent,
        }
    }

    /// Temperature to use for a single-shot retry after a parse/format
    /// failure: the current temperature plus one step, capped at `max`, but
    /// without mutating the controller's running state.
    pub fn retry_temperature(&self, track: TemperatureTrack) -> f64 {
        (self.current(track) + self.step).min(self.max)
    }

    /// Report a round outcome. `sufficient` means the round's belief update
    /// moved the loop meaningfully forward (e.g. the critic approved, or EIG
    /// stayed above the floor); on success both tracks reset to their base
    /// temperature, on an insufficient round both tracks step up.
    pub fn report_round(&mut self, sufficient: bool) {
        if sufficient {
            self.consecutive_insufficient = 0;
            self.current_code = self.base_code;
            self.current_agent = self.base_agent;
        } else {
            self.consecutive_insufficient += 1;
            self.current_code = (self.current_code + self.step).min(self.max);
            self.current_agent = (self.current_agent + self.step).min(self.max);
        }
    }

    pub fn consecutive_insufficient(&self) -> u32 {
        self.consecutive_insufficient
    }
}
