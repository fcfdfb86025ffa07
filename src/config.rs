//! Configuration types for the recommendation core.
//!
//! Every section has serde defaults so a partial TOML file (or none at all)
//! yields a fully usable configuration. The defaults are contractual: they
//! seed the cold path and are relied on by downstream scoring.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the recommendation core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Conversation context memory settings.
    pub context: ContextConfig,
    /// Session reward settings.
    pub reward: RewardConfig,
    /// Weight adapter learning settings.
    pub weights: LearningConfig,
    /// Thompson-Sampling bandit settings.
    pub bandit: BanditConfig,
    /// Scoring engine settings.
    pub scoring: ScoringConfig,
    /// Cold-start handler settings.
    pub cold_start: ColdStartConfig,
}

impl CoreConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let body = std::fs::read_to_string(path)?;
        toml::from_str(&body)
            .map_err(|e| CoreError::Validation(format!("invalid config file: {e}")))
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Internal(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// Conversation context memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Number of turns retained in the sliding window.
    pub window_size: usize,
    /// Sessions idle for longer than this are evicted.
    pub idle_ttl_secs: u64,
    /// Interval between eviction sweeps.
    pub eviction_interval_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            idle_ttl_secs: 3600,
            eviction_interval_secs: 300,
        }
    }
}

/// Session reward configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Weight of the engagement component.
    pub engagement_weight: f64,
    /// Weight of the satisfaction component.
    pub satisfaction_weight: f64,
    /// Weight of the emotional-improvement component.
    pub emotional_weight: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            engagement_weight: 0.40,
            satisfaction_weight: 0.30,
            emotional_weight: 0.30,
        }
    }
}

/// Weight adapter learning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Learning rate applied to feedback deltas.
    pub learning_rate: f64,
    /// L2 regularization strength (decay toward 1.0).
    pub weight_decay: f64,
    /// Lower clamp for any feature weight.
    pub weight_min: f64,
    /// Upper clamp for any feature weight.
    pub weight_max: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            weight_decay: 0.01,
            weight_min: 0.1,
            weight_max: 2.0,
        }
    }
}

/// Thompson-Sampling bandit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// Initial alpha for every arm's Beta prior.
    pub prior_alpha: f64,
    /// Initial beta for every arm's Beta prior.
    pub prior_beta: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            prior_alpha: 1.0,
            prior_beta: 1.0,
        }
    }
}

/// Scoring engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Default number of songs returned.
    pub default_limit: usize,
    /// Hard cap on the number of songs returned.
    pub max_limit: usize,
    /// Candidates fetched per requested song (`limit * candidate_multiplier`).
    pub candidate_multiplier: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 50,
            candidate_multiplier: 3,
        }
    }
}

/// Cold-start handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColdStartConfig {
    /// Feedback count below which a user is cold.
    pub cold_start_threshold: u64,
    /// Feedback count at which personalization is complete.
    pub transition_complete_at: u64,
    /// Blend factor for greedy-maximin diversity sampling.
    pub diversity_factor: f64,
    /// VA-space distance threshold for mood-cluster candidates.
    pub va_threshold: f64,
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            cold_start_threshold: 10,
            transition_complete_at: 30,
            diversity_factor: 0.3,
            va_threshold: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_carry_contract_constants() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.context.window_size, 10);
        assert_eq!(cfg.context.idle_ttl_secs, 3600);
        assert_eq!(cfg.weights.learning_rate, 0.05);
        assert_eq!(cfg.weights.weight_decay, 0.01);
        assert_eq!(cfg.weights.weight_min, 0.1);
        assert_eq!(cfg.weights.weight_max, 2.0);
        assert_eq!(cfg.cold_start.cold_start_threshold, 10);
        assert_eq!(cfg.cold_start.transition_complete_at, 30);
        assert_eq!(cfg.bandit.prior_alpha, 1.0);
        assert_eq!(cfg.scoring.candidate_multiplier, 3);
    }

    #[test]
    fn reward_weights_sum_to_one() {
        let cfg = RewardConfig::default();
        let sum = cfg.engagement_weight + cfg.satisfaction_weight + cfg.emotional_weight;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: CoreConfig = toml::from_str("[context]\nwindow_size = 4\n").unwrap();
        assert_eq!(cfg.context.window_size, 4);
        assert_eq!(cfg.context.idle_ttl_secs, 3600);
        assert_eq!(cfg.weights.weight_max, 2.0);
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("cadenza-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("core.toml");

        let mut cfg = CoreConfig::default();
        cfg.context.window_size = 7;
        cfg.save(&path).unwrap();

        let loaded = CoreConfig::load(&path).unwrap();
        assert_eq!(loaded.context.window_size, 7);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = CoreConfig::load(Path::new("/nonexistent/cadenza.toml")).unwrap();
        assert_eq!(cfg.context.window_size, 10);
    }
}
