//! Request and response types for the recommendation facade.
//!
//! Shapes are contractual: a transport shell maps them 1:1 onto its wire
//! format. Serde names follow the snake_case wire convention.

use crate::coldstart::ColdStartSong;
use crate::context::ContextFeatures;
use crate::emotion::EmotionalTrend;
use crate::reward::RewardBreakdown;
use crate::scoring::{ScoreComponents, ScoredSong};
use crate::trajectory::TrajectoryAnalysis;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Maximum accepted message length in characters.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// How the message was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    #[default]
    Text,
    /// A mood chip tap; the message is the mood label itself.
    Chip,
}

/// Mood analysis of a user message, produced by the NLP front-end.
///
/// The extractor is an external collaborator; callers pass its output in.
/// When absent, the turn is treated as neutral with zero confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodReading {
    pub mood: Option<String>,
    pub valence: f64,
    pub arousal: f64,
    pub intensity: f64,
    pub confidence: f64,
    pub entities: BTreeMap<String, BTreeSet<String>>,
}

impl Default for MoodReading {
    fn default() -> Self {
        Self {
            mood: None,
            valence: 0.0,
            arousal: 0.0,
            intensity: 0.5,
            confidence: 0.0,
            entities: BTreeMap::new(),
        }
    }
}

/// Input for `Conversation.continue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub input_type: InputKind,
    /// NLP analysis of the message, if available.
    #[serde(default)]
    pub reading: Option<MoodReading>,
    #[serde(default)]
    pub include_recommendations: bool,
    #[serde(default)]
    pub max_recommendations: Option<usize>,
    #[serde(default)]
    pub emotional_support_mode: bool,
}

/// Entities accumulated over the session so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextEntities {
    pub artists: Vec<String>,
    pub genres: Vec<String>,
}

/// Output of `Conversation.continue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationReply {
    pub session_id: String,
    pub turn_number: u64,
    pub bot_response: String,
    pub detected_mood: Option<String>,
    pub emotional_trend: EmotionalTrend,
    /// Confidence that the user's intent was understood, `[0, 1]`.
    pub clarity_score: f64,
    pub should_recommend: bool,
    pub recommendations: Vec<Recommendation>,
    pub context_entities: ContextEntities,
}

/// Verbosity of recommendation explanations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationVerbosity {
    #[default]
    Brief,
    Detailed,
}

/// Input for `Recommendation.adaptive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveRequest {
    pub user_id: String,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub arousal: Option<f64>,
    /// Alias for arousal used by energy-oriented callers.
    #[serde(default)]
    pub energy_level: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_true")]
    pub use_context_memory: bool,
    #[serde(default = "default_true")]
    pub use_emotional_trajectory: bool,
    #[serde(default = "default_true")]
    pub apply_cold_start: bool,
    #[serde(default = "default_true")]
    pub include_explanations: bool,
    #[serde(default)]
    pub explanation_verbosity: ExplanationVerbosity,
    #[serde(default = "default_diversity_factor")]
    pub diversity_factor: f64,
    /// Optional processing deadline for upstream calls.
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

fn default_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_diversity_factor() -> f64 {
    0.3
}

impl AdaptiveRequest {
    /// A request with defaults for everything but the user id.
    #[must_use]
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            mood: None,
            valence: None,
            arousal: None,
            energy_level: None,
            limit: default_limit(),
            use_context_memory: true,
            use_emotional_trajectory: true,
            apply_cold_start: true,
            include_explanations: true,
            explanation_verbosity: ExplanationVerbosity::default(),
            diversity_factor: default_diversity_factor(),
            deadline: None,
        }
    }
}

/// A recommendation from either the personalized or the cold path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub song_id: i64,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    pub score: f64,
    pub strategy: String,
    pub explanation: String,
    /// Score breakdown; only present on the personalized path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ScoreComponents>,
}

impl From<ScoredSong> for Recommendation {
    fn from(song: ScoredSong) -> Self {
        Self {
            song_id: song.song_id,
            name: song.name,
            artist: song.artist,
            genre: song.genre,
            mood: song.mood,
            score: song.final_score,
            strategy: song.strategy.as_str().to_owned(),
            explanation: song.explanation,
            components: Some(song.components),
        }
    }
}

impl From<ColdStartSong> for Recommendation {
    fn from(song: ColdStartSong) -> Self {
        Self {
            song_id: song.song_id,
            name: song.name,
            artist: song.artist,
            genre: song.genre,
            mood: song.mood,
            score: song.score,
            strategy: song.strategy,
            explanation: song.explanation,
            components: None,
        }
    }
}

/// Output of `Recommendation.adaptive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveResponse {
    pub recommendations: Vec<Recommendation>,
    /// Strategy label, `"none"` when recommendation degraded.
    pub strategy_used: String,
    pub personalization_weight: f64,
    pub cold_start_active: bool,
    pub diversity_applied: bool,
    pub processing_time_ms: u64,
}

/// Kind of weight adjustment requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightAdjustmentKind {
    Feedback,
    Explicit,
    Reset,
}

/// Input for `Learning.weights`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsRequest {
    pub user_id: String,
    pub adjustment_type: WeightAdjustmentKind,
    #[serde(default)]
    pub feedback_type: Option<String>,
    #[serde(default)]
    pub song_features: BTreeMap<String, f64>,
    #[serde(default)]
    pub song_id: Option<i64>,
    #[serde(default)]
    pub explicit_weights: BTreeMap<String, f64>,
}

/// Output of `Learning.weights`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsResponse {
    pub success: bool,
    pub updated_weights: BTreeMap<String, f64>,
    /// Sum of absolute weight changes applied.
    pub adjustment_magnitude: f64,
}

/// Input for `Feedback.reward`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub song_id: i64,
    pub feedback_type: String,
    /// Turn that served the song, when known; feedback on an evicted turn
    /// is rejected without touching bandit or weights.
    #[serde(default)]
    pub turn_number: Option<u64>,
    pub play_duration_seconds: f64,
    pub song_duration_seconds: f64,
    #[serde(default)]
    pub recommendation_score: Option<f64>,
    /// Feature intensities of the song, `[0, 1]` each, for weight
    /// learning; missing features default to 0.5.
    #[serde(default)]
    pub song_features: BTreeMap<String, f64>,
}

/// Output of `Feedback.reward`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub engagement_score: f64,
    pub satisfaction_score: f64,
    pub emotional_improvement: f64,
    pub total_reward: f64,
}

/// Cold-start summary inside a session status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartStatus {
    pub feedback_count: u64,
    pub personalization_weight: f64,
    pub cold_start_active: bool,
}

/// Output of `Session.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub user_id: String,
    pub context_memory: Option<ContextFeatures>,
    pub emotional_trajectory: Option<TrajectoryAnalysis>,
    pub session_rewards: Option<RewardBreakdown>,
    pub personalization_weights: BTreeMap<String, f64>,
    pub cold_start: ColdStartStatus,
}
