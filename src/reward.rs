//! Composite session reward for bandit learning.
//!
//! Turns observable events (song feedback and emotional-state updates)
//! into a bounded reward:
//!
//! ```text
//! R = 0.40·engagement + 0.30·satisfaction + 0.30·emotional_improvement
//! ```
//!
//! The reward feeds the strategy bandit through [`SessionReward::bandit_reward`],
//! which discretizes it to `{0.0, 0.5, 1.0}`.

use crate::config::RewardConfig;
use crate::emotion::{EmotionalTrend, clamp_unit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listen fraction above which a play counts as a full listen.
pub const LISTEN_THRESHOLD_FULL: f64 = 0.8;
/// Listen fraction above which a play counts as a partial listen.
pub const LISTEN_THRESHOLD_PARTIAL: f64 = 0.3;

/// User feedback on a recommended song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Love,
    Like,
    Neutral,
    Skip,
    Dislike,
}

impl Feedback {
    /// Parse a feedback label. Case-insensitive; unknown labels are `None`.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_lowercase().as_str() {
            "love" => Some(Self::Love),
            "like" => Some(Self::Like),
            "neutral" => Some(Self::Neutral),
            "skip" => Some(Self::Skip),
            "dislike" => Some(Self::Dislike),
            _ => None,
        }
    }

    /// Parse a feedback label, mapping unknown labels to neutral.
    #[must_use]
    pub fn parse_lossy(label: &str) -> Self {
        Self::parse(label).unwrap_or(Self::Neutral)
    }

    /// Stable snake_case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Love => "love",
            Self::Like => "like",
            Self::Neutral => "neutral",
            Self::Skip => "skip",
            Self::Dislike => "dislike",
        }
    }

    /// Engagement base reward for this feedback.
    #[must_use]
    pub fn reward_value(self) -> f64 {
        match self {
            Self::Love => 1.0,
            Self::Like => 0.8,
            Self::Neutral => 0.4,
            Self::Skip => 0.1,
            Self::Dislike => 0.0,
        }
    }

    /// Per-feature weight delta applied by the weight adapter.
    #[must_use]
    pub fn weight_delta(self) -> f64 {
        match self {
            Self::Love => 0.10,
            Self::Like => 0.05,
            Self::Neutral => 0.0,
            Self::Skip => -0.03,
            Self::Dislike => -0.08,
        }
    }

    /// True for love/like.
    #[must_use]
    pub fn is_positive(self) -> bool {
        matches!(self, Self::Love | Self::Like)
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a recorded reward event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardEventKind {
    Feedback,
    Emotional,
}

/// A single append-only reward event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: RewardEventKind,
    #[serde(default)]
    pub song_id: Option<i64>,
    /// Raw component value before weighting.
    pub raw_value: f64,
    /// Contribution after the component weight was applied.
    pub weighted_value: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Detailed per-component reward report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub session_id: String,
    pub user_id: String,
    pub total_reward: f64,
    pub engagement_average: f64,
    pub engagement_count: u64,
    pub satisfaction_average: f64,
    pub acceptance_rate: f64,
    pub total_recommendations: u64,
    pub accepted_recommendations: u64,
    pub emotional_improvement: f64,
    pub initial_valence: Option<f64>,
    pub current_valence: f64,
    pub songs_fully_listened: u64,
    pub songs_partially_listened: u64,
    pub event_count: usize,
}

/// Per-session composite reward calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReward {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    engagement_sum: f64,
    engagement_count: u64,
    satisfaction_sum: f64,
    satisfaction_count: u64,
    emotional_improvement: f64,
    total_recommendations: u64,
    accepted_recommendations: u64,
    songs_fully_listened: u64,
    songs_partially_listened: u64,
    initial_valence: Option<f64>,
    current_valence: f64,
    #[serde(default)]
    events: Vec<RewardEvent>,
    #[serde(default)]
    weights: RewardConfig,
}

impl SessionReward {
    /// Create a calculator for one session.
    #[must_use]
    pub fn new(session_id: &str, user_id: &str, weights: RewardConfig) -> Self {
        Self {
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            created_at: Utc::now(),
            engagement_sum: 0.0,
            engagement_count: 0,
            satisfaction_sum: 0.0,
            satisfaction_count: 0,
            emotional_improvement: 0.0,
            total_recommendations: 0,
            accepted_recommendations: 0,
            songs_fully_listened: 0,
            songs_partially_listened: 0,
            initial_valence: None,
            current_valence: 0.0,
            events: Vec::new(),
            weights,
        }
    }

    /// Record song feedback and return the weighted reward contribution.
    ///
    /// `listen_duration_pct` accepts either `[0, 1]` or `[0, 100]`;
    /// anything above 1 is interpreted as a percentage.
    /// `recommendation_score` is the score the song was served with.
    pub fn record_feedback(
        &mut self,
        song_id: i64,
        feedback: Feedback,
        listen_duration_pct: f64,
        recommendation_score: f64,
    ) -> f64 {
        let feedback_reward = feedback.reward_value();
        let rec_score = clamp_unit(recommendation_score);

        let listen_pct = if listen_duration_pct > 1.0 {
            listen_duration_pct / 100.0
        } else {
            listen_duration_pct
        };
        let listen_pct = clamp_unit(listen_pct);

        let listen_bonus = if listen_pct >= LISTEN_THRESHOLD_FULL {
            self.songs_fully_listened += 1;
            0.2
        } else if listen_pct >= LISTEN_THRESHOLD_PARTIAL {
            self.songs_partially_listened += 1;
            0.1
        } else {
            0.0
        };

        let engagement = (feedback_reward + listen_bonus).min(1.0);
        self.engagement_sum += engagement;
        self.engagement_count += 1;

        self.total_recommendations += 1;
        let satisfaction = if feedback.is_positive() {
            self.accepted_recommendations += 1;
            rec_score
        } else if feedback == Feedback::Neutral {
            0.5
        } else {
            // Penalize confident predictions the user rejected.
            1.0 - rec_score
        };
        self.satisfaction_sum += satisfaction;
        self.satisfaction_count += 1;

        let weighted = engagement * self.weights.engagement_weight
            + satisfaction * self.weights.satisfaction_weight;

        self.events.push(RewardEvent {
            timestamp: Utc::now(),
            kind: RewardEventKind::Feedback,
            song_id: Some(song_id),
            raw_value: feedback_reward,
            weighted_value: weighted,
            metadata: serde_json::json!({
                "feedback": feedback.as_str(),
                "listen_duration_pct": listen_pct,
                "engagement_value": engagement,
                "satisfaction_value": satisfaction,
            }),
        });

        weighted
    }

    /// Update the emotional-improvement component from the trajectory.
    ///
    /// The first call pins the valence baseline. The normalized improvement
    /// replaces (does not accumulate into) the current component value. The
    /// recorded event carries both the raw improvement (0 on the first
    /// call) and the normalized value actually used for the reward.
    pub fn update_emotional_state(
        &mut self,
        valence: f64,
        arousal: f64,
        trend: EmotionalTrend,
    ) -> f64 {
        let first_update = self.initial_valence.is_none();
        if first_update {
            self.initial_valence = Some(valence);
        }
        self.current_valence = valence;

        let baseline = self.initial_valence.unwrap_or(valence);
        let raw_improvement = if first_update {
            0.0
        } else {
            valence - baseline
        };
        let normalized = clamp_unit(((valence - baseline) + 2.0) / 4.0);

        let trend_bonus = match trend {
            EmotionalTrend::Improving => 0.15,
            EmotionalTrend::Stable => 0.05,
            EmotionalTrend::Declining => -0.1,
            _ => 0.0,
        };

        let emotional = clamp_unit(normalized + trend_bonus);
        self.emotional_improvement = emotional;
        let weighted = emotional * self.weights.emotional_weight;

        self.events.push(RewardEvent {
            timestamp: Utc::now(),
            kind: RewardEventKind::Emotional,
            song_id: None,
            raw_value: emotional,
            weighted_value: weighted,
            metadata: serde_json::json!({
                "valence": valence,
                "arousal": arousal,
                "trend": trend.as_str(),
                "initial_valence": baseline,
                "improvement": raw_improvement,
                "normalized_improvement": normalized,
            }),
        });

        weighted
    }

    /// Average engagement component; 0.5 when no feedback was recorded.
    #[must_use]
    pub fn engagement_score(&self) -> f64 {
        if self.engagement_count > 0 {
            self.engagement_sum / self.engagement_count as f64
        } else {
            0.5
        }
    }

    /// Average satisfaction component; 0.5 when no feedback was recorded.
    #[must_use]
    pub fn satisfaction_score(&self) -> f64 {
        if self.satisfaction_count > 0 {
            self.satisfaction_sum / self.satisfaction_count as f64
        } else {
            0.5
        }
    }

    /// Current emotional-improvement component, `[0, 1]`.
    #[must_use]
    pub fn emotional_improvement(&self) -> f64 {
        self.emotional_improvement
    }

    /// Composite session reward, `[0, 1]`.
    #[must_use]
    pub fn session_reward(&self) -> f64 {
        self.engagement_score() * self.weights.engagement_weight
            + self.satisfaction_score() * self.weights.satisfaction_weight
            + self.emotional_improvement * self.weights.emotional_weight
    }

    /// Discretized reward for a bandit update: 1.0 for a good session
    /// (R ≥ 0.6), 0.5 for a middling one (R ≥ 0.4), 0.0 otherwise.
    #[must_use]
    pub fn bandit_reward(&self) -> f64 {
        let reward = self.session_reward();
        if reward >= 0.6 {
            1.0
        } else if reward >= 0.4 {
            0.5
        } else {
            0.0
        }
    }

    /// Fraction of recommendations the user accepted (love/like).
    #[must_use]
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_recommendations == 0 {
            return 0.0;
        }
        self.accepted_recommendations as f64 / self.total_recommendations as f64
    }

    /// All recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> &[RewardEvent] {
        &self.events
    }

    /// The `n` most recent events, oldest first.
    #[must_use]
    pub fn recent_events(&self, n: usize) -> &[RewardEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }

    /// Detailed per-component report.
    #[must_use]
    pub fn breakdown(&self) -> RewardBreakdown {
        RewardBreakdown {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            total_reward: self.session_reward(),
            engagement_average: self.engagement_score(),
            engagement_count: self.engagement_count,
            satisfaction_average: self.satisfaction_score(),
            acceptance_rate: self.acceptance_rate(),
            total_recommendations: self.total_recommendations,
            accepted_recommendations: self.accepted_recommendations,
            emotional_improvement: self.emotional_improvement,
            initial_valence: self.initial_valence,
            current_valence: self.current_valence,
            songs_fully_listened: self.songs_fully_listened,
            songs_partially_listened: self.songs_partially_listened,
            event_count: self.events.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn calc() -> SessionReward {
        SessionReward::new("s-1", "u-1", RewardConfig::default())
    }

    #[test]
    fn feedback_reward_mapping() {
        assert_eq!(Feedback::Love.reward_value(), 1.0);
        assert_eq!(Feedback::Like.reward_value(), 0.8);
        assert_eq!(Feedback::Neutral.reward_value(), 0.4);
        assert_eq!(Feedback::Skip.reward_value(), 0.1);
        assert_eq!(Feedback::Dislike.reward_value(), 0.0);
    }

    #[test]
    fn parse_is_case_insensitive_and_lossy_defaults_neutral() {
        assert_eq!(Feedback::parse("LOVE"), Some(Feedback::Love));
        assert_eq!(Feedback::parse("meh"), None);
        assert_eq!(Feedback::parse_lossy("meh"), Feedback::Neutral);
    }

    #[test]
    fn love_with_full_listen_yields_high_reward() {
        let mut c = calc();
        c.record_feedback(7, Feedback::Love, 1.0, 0.8);

        // Engagement capped at 1.0 even with the listen bonus.
        assert!((c.engagement_score() - 1.0).abs() < 1e-9);
        assert!((c.satisfaction_score() - 0.8).abs() < 1e-9);
        // R = 1.0*0.4 + 0.8*0.3 + 0.0*0.3 = 0.64 → bandit reward 1.0.
        assert!((c.session_reward() - 0.64).abs() < 1e-9);
        assert_eq!(c.bandit_reward(), 1.0);
    }

    #[test]
    fn percentage_scale_listen_duration_is_normalized() {
        let mut c = calc();
        c.record_feedback(1, Feedback::Like, 85.0, 0.5);
        assert_eq!(c.breakdown().songs_fully_listened, 1);
        assert!((c.engagement_score() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn partial_listen_bonus() {
        let mut c = calc();
        c.record_feedback(1, Feedback::Skip, 0.5, 0.5);
        assert_eq!(c.breakdown().songs_partially_listened, 1);
        assert!((c.engagement_score() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn dislike_of_confident_prediction_penalizes_satisfaction() {
        let mut c = calc();
        c.record_feedback(1, Feedback::Dislike, 0.0, 0.9);
        assert!((c.satisfaction_score() - 0.1).abs() < 1e-9);
        assert_eq!(c.bandit_reward(), 0.0);
    }

    #[test]
    fn first_emotional_update_reports_zero_raw_improvement() {
        let mut c = calc();
        c.update_emotional_state(-0.4, 0.0, EmotionalTrend::Unknown);

        let event = c.events().last().unwrap();
        assert_eq!(event.metadata["improvement"], serde_json::json!(0.0));
        assert_eq!(
            event.metadata["normalized_improvement"],
            serde_json::json!(0.5)
        );
        assert!((c.emotional_improvement() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn emotional_improvement_replaces_not_accumulates() {
        let mut c = calc();
        c.update_emotional_state(-0.5, 0.0, EmotionalTrend::Unknown);
        c.update_emotional_state(0.1, 0.0, EmotionalTrend::Improving);
        c.update_emotional_state(0.3, 0.0, EmotionalTrend::Improving);

        // ((0.3 - (-0.5)) + 2) / 4 = 0.7, plus 0.15 trend bonus.
        assert!((c.emotional_improvement() - 0.85).abs() < 1e-9);
    }

    #[test]
    fn declining_trend_subtracts() {
        let mut c = calc();
        c.update_emotional_state(0.2, 0.0, EmotionalTrend::Unknown);
        c.update_emotional_state(0.2, 0.0, EmotionalTrend::Declining);
        // Normalized 0.5 - 0.1 = 0.4.
        assert!((c.emotional_improvement() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn reward_stays_bounded() {
        let mut c = calc();
        for i in 0..20 {
            c.record_feedback(i, Feedback::Love, 1.0, 1.0);
            c.update_emotional_state(1.0, 1.0, EmotionalTrend::Improving);
            let r = c.session_reward();
            assert!((0.0..=1.0).contains(&r), "reward {r} out of bounds");
        }
        let mut c = calc();
        for i in 0..20 {
            c.record_feedback(i, Feedback::Dislike, 0.0, 1.0);
            c.update_emotional_state(-1.0, 0.0, EmotionalTrend::Declining);
            let r = c.session_reward();
            assert!((0.0..=1.0).contains(&r), "reward {r} out of bounds");
        }
    }

    #[test]
    fn empty_session_defaults_to_neutral_components() {
        let c = calc();
        assert!((c.engagement_score() - 0.5).abs() < 1e-9);
        assert!((c.satisfaction_score() - 0.5).abs() < 1e-9);
        // R = 0.5*0.4 + 0.5*0.3 + 0.0*0.3 = 0.35.
        assert!((c.session_reward() - 0.35).abs() < 1e-9);
    }

    #[test]
    fn acceptance_rate_tracks_positive_feedback() {
        let mut c = calc();
        c.record_feedback(1, Feedback::Love, 0.0, 0.5);
        c.record_feedback(2, Feedback::Skip, 0.0, 0.5);
        c.record_feedback(3, Feedback::Like, 0.0, 0.5);
        c.record_feedback(4, Feedback::Dislike, 0.0, 0.5);
        assert!((c.acceptance_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn serde_roundtrip_preserves_state() {
        let mut c = calc();
        c.record_feedback(1, Feedback::Like, 0.9, 0.7);
        c.update_emotional_state(0.4, 0.2, EmotionalTrend::Stable);

        let json = serde_json::to_string(&c).unwrap();
        let back: SessionReward = serde_json::from_str(&json).unwrap();
        assert!((back.session_reward() - c.session_reward()).abs() < 1e-12);
        assert_eq!(back.events().len(), c.events().len());
        assert_eq!(back.breakdown().songs_fully_listened, 1);
    }

    #[test]
    fn recent_events_returns_tail() {
        let mut c = calc();
        for i in 0..5 {
            c.record_feedback(i, Feedback::Neutral, 0.0, 0.5);
        }
        assert_eq!(c.recent_events(2).len(), 2);
        assert_eq!(c.recent_events(2)[0].song_id, Some(3));
        assert_eq!(c.recent_events(100).len(), 5);
    }
}
