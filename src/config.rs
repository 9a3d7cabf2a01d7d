//! Engine tuning. Stored as a singleton row so clients can read the delays
//! they are expected to honor; reducers fall back to these defaults when the
//! row is missing.

use serde_json::Value;

use crate::codes::{CODE_MAX_LEN, CODE_MIN_LEN};
use crate::error::{BattleError, Result};
use crate::EngineConfig;

/// Primary key of the singleton `engine_config` row
pub const CONFIG_ID: u32 = 0;

/// Points for an instant correct answer; decays 1 point per millisecond
const BASE_SCORE: u32 = 1000;

/// A correct answer never earns less than this, however slow
const FLOOR_SCORE: u32 = 100;

/// Wrong answers that knock a group out
const ELIMINATION_THRESHOLD: u32 = 2;

/// Reward by rank among non-eliminated groups (index 0 = winner)
const PAYOUT_TABLE: [u32; 3] = [200, 150, 100];
const FALLBACK_PAYOUT: u32 = 50;
const ELIMINATED_PAYOUT: u32 = 25;

/// Lockstep: how long everyone sees the results before auto-advance
const RESULTS_DELAY_MS: u32 = 2000;

/// Self-paced: pause between a group's answer and its next question
const SELF_PACED_DELAY_MS: u32 = 1500;

const POLL_INTERVAL_MS: u32 = 2000;

const CODE_LENGTH: u32 = 6;
const CODE_ATTEMPTS: u32 = 16;

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            id: CONFIG_ID,
            base_score: BASE_SCORE,
            floor_score: FLOOR_SCORE,
            elimination_threshold: ELIMINATION_THRESHOLD,
            payout_table: PAYOUT_TABLE.to_vec(),
            fallback_payout: FALLBACK_PAYOUT,
            eliminated_payout: ELIMINATED_PAYOUT,
            results_delay_ms: RESULTS_DELAY_MS,
            self_paced_delay_ms: SELF_PACED_DELAY_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
            code_length: CODE_LENGTH,
            code_attempts: CODE_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    /// Time-decayed reward for a correct answer: `max(base - latency, floor)`
    pub fn points_for(&self, response_ms: u32) -> u32 {
        self.base_score.saturating_sub(response_ms).max(self.floor_score)
    }

    /// Payout for a 0-based rank among non-eliminated groups
    pub fn payout_for_rank(&self, rank: usize) -> u32 {
        self.payout_table
            .get(rank)
            .copied()
            .unwrap_or(self.fallback_payout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.floor_score > self.base_score {
            return Err(BattleError::InvalidInput(format!(
                "floor score {} exceeds base score {}",
                self.floor_score, self.base_score
            )));
        }
        if self.elimination_threshold == 0 {
            return Err(BattleError::InvalidInput(
                "elimination threshold must be at least 1".to_string(),
            ));
        }
        if !(CODE_MIN_LEN..=CODE_MAX_LEN).contains(&self.code_length) {
            return Err(BattleError::InvalidInput(format!(
                "code length {} outside {}..={}",
                self.code_length, CODE_MIN_LEN, CODE_MAX_LEN
            )));
        }
        if self.code_attempts == 0 {
            return Err(BattleError::InvalidInput(
                "code attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a JSON object of overrides, e.g. `{"baseScore": 800}`.
    /// Unknown keys are rejected; the result must still validate.
    pub fn apply_overrides(&mut self, json_data: &str) -> Result<()> {
        let data: Value = serde_json::from_str(json_data)
            .map_err(|e| BattleError::InvalidInput(format!("Invalid JSON: {}", e)))?;
        let fields = data.as_object().ok_or_else(|| {
            BattleError::InvalidInput("Expected JSON object of settings".to_string())
        })?;

        let mut next = self.clone();
        for (key, value) in fields {
            if key == "payoutTable" {
                next.payout_table = value
                    .as_array()
                    .ok_or_else(|| {
                        BattleError::InvalidInput("payoutTable: expected array".to_string())
                    })?
                    .iter()
                    .map(|v| as_u32(key, v))
                    .collect::<Result<Vec<u32>>>()?;
                continue;
            }
            let slot = match key.as_str() {
                "baseScore" => &mut next.base_score,
                "floorScore" => &mut next.floor_score,
                "eliminationThreshold" => &mut next.elimination_threshold,
                "fallbackPayout" => &mut next.fallback_payout,
                "eliminatedPayout" => &mut next.eliminated_payout,
                "resultsDelayMs" => &mut next.results_delay_ms,
                "selfPacedDelayMs" => &mut next.self_paced_delay_ms,
                "pollIntervalMs" => &mut next.poll_interval_ms,
                "codeLength" => &mut next.code_length,
                "codeAttempts" => &mut next.code_attempts,
                _ => return Err(BattleError::InvalidInput(format!("unknown setting {}", key))),
            };
            *slot = as_u32(key, value)?;
        }

        next.validate()?;
        *self = next;
        Ok(())
    }
}

fn as_u32(key: &str, value: &Value) -> Result<u32> {
    value.as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| BattleError::InvalidInput(format!("{}: expected unsigned integer", key)))
}
