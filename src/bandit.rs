//! Thompson-Sampling bandit for scoring-strategy selection.
//!
//! Each strategy arm carries a Beta(α, β) prior. Selection draws one
//! sample per arm and picks the argmax; rewards in `[0, 1]` update the
//! winning arm's prior. `sample` and `update` are atomic against each
//! other: both take the same internal lock, and each arm's (α, β) pair
//! is only ever written together.
//!
//! All randomness flows through an injected [`StdRng`] so tests can run
//! seeded and deterministic.

use crate::error::{CoreError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Scoring strategies, in stable order. Ties in sampling break toward the
/// earlier strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Emotion,
    Content,
    Collaborative,
    Diversity,
    Exploration,
}

impl Strategy {
    /// All strategies in selection order.
    pub const ALL: [Strategy; 5] = [
        Strategy::Emotion,
        Strategy::Content,
        Strategy::Collaborative,
        Strategy::Diversity,
        Strategy::Exploration,
    ];

    /// Stable snake_case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emotion => "emotion",
            Self::Content => "content",
            Self::Collaborative => "collaborative",
            Self::Diversity => "diversity",
            Self::Exploration => "exploration",
        }
    }

    /// Parse a strategy label. Case-insensitive; unknown labels are `None`.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_lowercase().as_str() {
            "emotion" => Some(Self::Emotion),
            "content" => Some(Self::Content),
            "collaborative" => Some(Self::Collaborative),
            "diversity" => Some(Self::Diversity),
            "exploration" => Some(Self::Exploration),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Beta prior of one arm. Both parameters stay strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    pub alpha: f64,
    pub beta: f64,
}

/// Serializable bandit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditSnapshot {
    pub arms: BTreeMap<Strategy, ArmState>,
}

struct BanditInner {
    arms: BTreeMap<Strategy, ArmState>,
    rng: StdRng,
}

/// Thompson-Sampling bandit over the fixed strategy set.
pub struct ThompsonBandit {
    inner: Mutex<BanditInner>,
}

impl std::fmt::Debug for ThompsonBandit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThompsonBandit").finish_non_exhaustive()
    }
}

impl ThompsonBandit {
    /// Create a bandit with the given priors and an entropy-seeded RNG.
    #[must_use]
    pub fn new(prior_alpha: f64, prior_beta: f64) -> Self {
        Self::with_rng(prior_alpha, prior_beta, StdRng::from_entropy())
    }

    /// Create a bandit with a fixed seed, for deterministic tests.
    #[must_use]
    pub fn seeded(prior_alpha: f64, prior_beta: f64, seed: u64) -> Self {
        Self::with_rng(prior_alpha, prior_beta, StdRng::seed_from_u64(seed))
    }

    fn with_rng(prior_alpha: f64, prior_beta: f64, rng: StdRng) -> Self {
        let alpha = if prior_alpha > 0.0 { prior_alpha } else { 1.0 };
        let beta = if prior_beta > 0.0 { prior_beta } else { 1.0 };
        let arms = Strategy::ALL
            .iter()
            .map(|&s| (s, ArmState { alpha, beta }))
            .collect();
        Self {
            inner: Mutex::new(BanditInner {
                arms,
                rng,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BanditInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Draw one Beta sample per strategy and return the winner plus the
    /// full sample map. Ties break toward the earlier strategy.
    pub fn sample(&self) -> (Strategy, BTreeMap<Strategy, f64>) {
        let mut inner = self.lock();
        let mut samples = BTreeMap::new();
        for &strategy in &Strategy::ALL {
            let arm = inner.arms[&strategy];
            let draw = match Beta::new(arm.alpha, arm.beta) {
                Ok(dist) => {
                    let value: f64 = dist.sample(&mut inner.rng);
                    value
                }
                // Degenerate parameters cannot occur while the positivity
                // invariant holds, but a neutral draw keeps selection alive.
                Err(_) => 0.5,
            };
            samples.insert(strategy, draw);
        }

        let mut winner = Strategy::Emotion;
        let mut best = f64::NEG_INFINITY;
        for &strategy in &Strategy::ALL {
            let draw = samples[&strategy];
            if draw > best {
                best = draw;
                winner = strategy;
            }
        }
        tracing::debug!(strategy = %winner, "thompson sample selected strategy");
        (winner, samples)
    }

    /// Update a strategy's prior with a reward in `[0, 1]`.
    ///
    /// Rewards at or above 0.5 grow α by the reward; lower rewards grow β
    /// by the complement.
    pub fn update(&self, strategy: Strategy, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        let mut inner = self.lock();
        if let Some(arm) = inner.arms.get_mut(&strategy) {
            if reward >= 0.5 {
                arm.alpha += reward;
            } else {
                arm.beta += 1.0 - reward;
            }
            tracing::debug!(
                strategy = %strategy,
                reward,
                alpha = arm.alpha,
                beta = arm.beta,
                "bandit arm updated"
            );
        }
    }

    /// Expected reward `α / (α + β)` per strategy.
    #[must_use]
    pub fn expected_rewards(&self) -> BTreeMap<Strategy, f64> {
        let inner = self.lock();
        inner
            .arms
            .iter()
            .map(|(&s, arm)| (s, arm.alpha / (arm.alpha + arm.beta)))
            .collect()
    }

    /// Snapshot the arm states for persistence.
    #[must_use]
    pub fn snapshot(&self) -> BanditSnapshot {
        BanditSnapshot {
            arms: self.lock().arms.clone(),
        }
    }

    /// Restore arm states from a snapshot.
    ///
    /// Rejects snapshots that would violate the α, β > 0 invariant.
    pub fn restore(&self, snapshot: &BanditSnapshot) -> Result<()> {
        for (strategy, arm) in &snapshot.arms {
            if arm.alpha <= 0.0 || arm.beta <= 0.0 {
                return Err(CoreError::Validation(format!(
                    "non-positive beta prior for strategy {strategy}"
                )));
            }
        }
        let mut inner = self.lock();
        for (&strategy, &arm) in &snapshot.arms {
            inner.arms.insert(strategy, arm);
        }
        Ok(())
    }

    /// Draw a uniform value from `[low, high)` using the bandit's RNG.
    ///
    /// Shares the seeded RNG with sampling so a whole scoring run stays
    /// deterministic under one seed.
    pub fn uniform(&self, low: f64, high: f64) -> f64 {
        let mut inner = self.lock();
        inner.rng.gen_range(low..high)
    }
}
