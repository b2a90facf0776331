//! Belief / EIG engine.
//!
//! Implements the calibrated-Bayesian belief update, binary Shannon entropy,
//! and Expected Information Gain (EIG) used by the control loop's stopping
//! rule. The critic's verdict is treated as a noisy observation of
//! correctness, characterized by a false-accept rate `alpha` and a
//! false-reject rate `beta`.

use serde::{Deserialize, Serialize};

/// Clamp applied to belief so it is never stored as exactly 0 or 1.
pub const EPSILON: f64 = 1e-6;

/// Clamp a belief value into `[EPSILON, 1 - EPSILON]`.
pub fn clamp_belief(b: f64) -> f64 {
    b.clamp(EPSILON, 1.0 - EPSILON)
}

/// Binary Shannon entropy `H(b)` in bits.
pub fn entropy_bits(b: f64) -> f64 {
    let b = clamp_belief(b);
    -b * b.log2() - (1.0 - b) * (1.0 - b).log2()
}

/// A single critic observation of correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriticVerdict {
    /// The critic approved the round (admitted to memory).
    Approve,
    /// The critic rejected the round.
    Reject,
}

/// Update belief given a critic verdict and the current calibrated
/// false-accept (`alpha`) / false-reject (`beta`) rates.
///
/// For `Approve`:
/// `b' = b*(1-beta) / [b*(1-beta) + (1-b)*alpha]`
///
/// For `Reject`:
/// `b' = b*beta / [b*beta + (1-b)*(1-alpha)]`
///
/// The result is clamped to `[EPSILON, 1 - EPSILON]`.
pub fn update_belief(b: f64, verdict: CriticVerdict, alpha: f64, beta: f64) -> f64 {
    let b = clamp_belief(b);
    let alpha = alpha.clamp(EPSILON, 1.0 - EPSILON);
    let beta = beta.clamp(EPSILON, 1.0 - EPSILON);

    let updated = match verdict {
        CriticVerdict::Approve => {
            let numerator = b * (1.0 - beta);
            let denominator = numerator + (1.0 - b) * alpha;
            numerator / denominator
        }
        CriticVerdict::Reject => {
            let numerator = b * beta;
            let denominator = numerator + (1.0 - b) * (1.0 - alpha);
            numerator / denominator
        }
    };

    clamp_belief(updated)
}

/// Expected Information Gain from one more critic observation at belief `b`,
/// assuming `accept_p` is the post-approval confidence the loop would settle
/// on if the next observation were an approval.
///
/// `EIG = H(b) - [b*H(accept_p) + (1-b)*H(b)]`
pub fn expected_information_gain_bits(b: f64, accept_p: f64) -> f64 {
    let b = clamp_belief(b);
    let h_b = entropy_bits(b);
    let h_accept = entropy_bits(accept_p);
    (h_b - (b * h_accept + (1.0 - b) * h_b)).max(0.0)
}

/// Running belief and EIG trajectories for one task.
///
/// Invariant: `belief.len() == eig.len() + 1` — the belief trajectory
/// carries the initial belief at index 0, while the EIG trajectory records
/// one value per completed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefTrajectory {
    belief: Vec<f64>,
    eig: Vec<f64>,
}

impl BeliefTrajectory {
    /// Start a trajectory at the given initial belief (typically 0.5).
    pub fn new(initial_belief: f64) -> Self {
        Self {
            belief: vec![clamp_belief(initial_belief)],
            eig: Vec::new(),
        }
    }

    /// Current belief (the last trajectory entry).
    pub fn current(&self) -> f64 {
        *self.belief.last().expect("trajectory always has an initial value")
    }

    /// Record one completed event: the EIG realized on the way to the new
    /// belief, followed by the new belief itself.
    pub fn record_event(&mut self, eig_bits: f64, new_belief: f64) {
        self.eig.push(eig_bits.max(0.0));
        self.belief.push(clamp_belief(new_belief));
    }

    /// Number of events recorded so far.
    pub fn events_fired(&self) -> usize {
        self.eig.len()
    }

    /// Full belief trajectory, length `events_fired() + 1`.
    pub fn belief_trajectory(&self) -> &[f64] {
        &self.belief
    }

    /// Full EIG trajectory, length `events_fired()`.
    pub fn eig_trajectory(&self) -> &[f64] {
        &self.eig
    }

    /// Initial belief (index 0 of the trajectory).
    pub fn initial_belief(&self) -> f64 {
        self.belief[0]
    }

    /// `H(b0) - H(current)`, the entropy reduction realized so far.
    pub fn entropy_reduction_bits(&self) -> f64 {
        entropy_bits(self.initial_belief()) - entropy_bits(self.current())
    }

    /// Sum of the EIG trajectory.
    pub fn total_eig_bits(&self) -> f64 {
        self.eig.iter().sum()
    }

    /// Average EIG per event, or 0.0 if no events fired yet.
    pub fn avg_eig_per_event_bits(&self) -> f64 {
        if self.eig.is_empty() {
            0.0
        } else {
            self.total_eig_bits() / self.eig.len() as f64
        }
    }
}
