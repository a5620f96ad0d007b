//! Per-round and per-run resource accounting.

use crate::config::PricingConfig;
use crate::policy::CallOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub round: u32,
    /// Wall time of the review fan-out
    pub reviewer_ms: u64,
    pub revision_ms: u64,
    pub input_units: u64,
    pub output_units: u64,
    pub reviews_received: usize,
    pub reviews_missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub rounds: Vec<RoundMetrics>,
    pub input_units: u64,
    pub output_units: u64,
    pub calls: u32,
    pub attempts: u32,
    pub fallbacks: u32,
    pub estimated_cost: f64,
}

impl RunMetrics {
    pub fn record_call(&mut self, outcome: &CallOutcome) {
        self.input_units += outcome.generation.input_units;
        self.output_units += outcome.generation.output_units;
        self.calls += 1;
        self.attempts += outcome.attempts;
        if outcome.fell_back {
            self.fallbacks += 1;
        }
    }

    /// Metrics for `round`, created on first use.
    pub fn round_mut(&mut self, round: u32) -> &mut RoundMetrics {
        let index = match self.rounds.iter().position(|r| r.round == round) {
            Some(index) => index,
            None => {
                self.rounds.push(RoundMetrics {
                    round,
                    ..RoundMetrics::default()
                });
                self.rounds.len() - 1
            }
        };
        &mut self.rounds[index]
    }

    pub fn update_cost(&mut self, pricing: &PricingConfig) {
        self.estimated_cost = pricing.estimate(self.input_units, self.output_units);
    }
}
