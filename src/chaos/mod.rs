//! Deterministic, seeded fault injection for the Stdio Proxy.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// `{p, value}` or `{p, min, max}` — draw once; with probability `p` the
/// event occurs and its magnitude is either the fixed `value` or a uniform
/// integer in `[min, max]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChaosMagnitude {
    Fixed { value: u64 },
    Range { min: u64, max: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Probabilistic {
    pub p: f64,
    #[serde(flatten)]
    pub magnitude: ChaosMagnitude,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaosRule {
    #[serde(rename = "delayMs", default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<Probabilistic>,
    #[serde(rename = "failRate", default, skip_serializing_if = "Option::is_none")]
    pub fail_rate: Option<f64>,
    #[serde(rename = "corruptRate", default, skip_serializing_if = "Option::is_none")]
    pub corrupt_rate: Option<f64>,
}

impl ChaosRule {
    /// Tool fields win over the global rule; missing fields mean "no effect".
    fn merged_over(&self, global: Option<&ChaosRule>) -> ChaosRule {
        let Some(global) = global else {
            return self.clone();
        };
        ChaosRule {
            delay_ms: self.delay_ms.or(global.delay_ms),
            fail_rate: self.fail_rate.or(global.fail_rate),
            corrupt_rate: self.corrupt_rate.or(global.corrupt_rate),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaosConfig {
    pub seed: u64,
    #[serde(default)]
    pub global: Option<ChaosRule>,
    #[serde(default)]
    pub tools: HashMap<String, ChaosRule>,
}

impl ChaosConfig {
    fn rule_for(&self, tool: &str) -> ChaosRule {
        match self.tools.get(tool) {
            Some(tool_rule) => tool_rule.merged_over(self.global.as_ref()),
            None => self.global.clone().unwrap_or_default(),
        }
    }
}

/// One application of the engine against a single request, recorded
/// verbatim in the outgoing `rpc_response` event's chaos descriptor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChaosApplied {
    pub seed: u64,
    #[serde(rename = "delayMs", skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(rename = "errorInjected")]
    pub error_injected: bool,
    pub corrupted: bool,
}

/// mulberry32: a 32-bit state generator, advanced once per decision so that
/// repeated queries against the same config and seed are reproducible
/// across runs and platforms.
fn mulberry32_next(state: &mut u32) -> u32 {
    *state = state.wrapping_add(0x6D2B79F5);
    let mut z = *state;
    z = (z ^ (z >> 15)).wrapping_mul(z | 1);
    z ^= z.wrapping_add((z ^ (z >> 7)).wrapping_mul(z | 61));
    z ^ (z >> 14)
}

fn next_unit_f64(state: &mut u32) -> f64 {
    (mulberry32_next(state) as f64) / (u32::MAX as f64 + 1.0)
}

pub struct ChaosEngine {
    config: ChaosConfig,
    state: Mutex<u32>,
}

impl ChaosEngine {
    pub fn new(config: ChaosConfig) -> Self {
        let seed = config.seed as u32;
        Self {
            config,
            state: Mutex::new(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    fn draw(&self) -> f64 {
        let mut state = self.state.lock().expect("chaos engine state poisoned");
        next_unit_f64(&mut state)
    }

    fn draw_magnitude(&self, magnitude: ChaosMagnitude) -> u64 {
        match magnitude {
            ChaosMagnitude::Fixed { value } => value,
            ChaosMagnitude::Range { min, max } => {
                if max <= min {
                    min
                } else {
                    let span = max - min + 1;
                    let roll = (self.draw() * span as f64) as u64;
                    min + roll.min(span - 1)
                }
            }
        }
    }

    /// `delay(tool) → ms`. Draws from the rng only when a delay rule is
    /// configured for `tool`; with no rule, returns 0 without advancing
    /// the stream, unlike `should_fail`/`should_corrupt`.
    pub fn delay(&self, tool: &str) -> u64 {
        let rule = self.config.rule_for(tool);
        match rule.delay_ms {
            Some(prob) => {
                let occurs = self.draw() < prob.p;
                if occurs {
                    self.draw_magnitude(prob.magnitude)
                } else {
                    0
                }
            }
            None => 0,
        }
    }

    pub fn should_fail(&self, tool: &str) -> bool {
        let rule = self.config.rule_for(tool);
        let rate = rule.fail_rate.unwrap_or(0.0);
        self.draw() < rate
    }

    pub fn should_corrupt(&self, tool: &str) -> bool {
        let rule = self.config.rule_for(tool);
        let rate = rule.corrupt_rate.unwrap_or(0.0);
        self.draw() < rate
    }

    pub fn apply(&self, tool: &str) -> ChaosApplied {
        let delay_ms = self.delay(tool);
        let error_injected = self.should_fail(tool);
        let corrupted = self.should_corrupt(tool);
        ChaosApplied {
            seed: self.config.seed,
            delay_ms: if delay_ms > 0 { Some(delay_ms) } else { None },
            error_injected,
            corrupted,
        }
    }
}

#[cfg(test)]
mod tests;
