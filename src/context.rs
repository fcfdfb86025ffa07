//! Per-session conversation context memory.
//!
//! Keeps a sliding window of conversation turns (FIFO eviction at
//! `window_size`), accumulates entities and moods across the whole
//! session, and derives the context features and scoring modifiers the
//! scoring engine consumes.

use crate::emotion::{clamp_unit, clamp_va};
use crate::reward::Feedback;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Default number of turns retained in the window.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Number of recent turns inspected for mood stability and confidence.
const RECENT_TURNS: usize = 5;

/// A single turn in a conversation.
///
/// Immutable once created, except for `feedback`, which may be set once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Monotonic turn number, starting at 1.
    pub turn_number: u64,
    pub user_text: String,
    pub bot_text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detected_mood: Option<String>,
    pub valence: f64,
    pub arousal: f64,
    pub intensity: f64,
    pub confidence: f64,
    /// Extracted entities by kind (e.g. "artists", "genres").
    #[serde(default)]
    pub entities: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub recommended_song_ids: Vec<i64>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

/// Parameters for [`ConversationContext::add_turn`].
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub user_text: String,
    pub bot_text: String,
    pub detected_mood: Option<String>,
    pub valence: f64,
    pub arousal: f64,
    pub intensity: f64,
    pub confidence: f64,
    pub entities: BTreeMap<String, BTreeSet<String>>,
    pub recommended_song_ids: Vec<i64>,
}

/// Context features derived from the window and session accumulators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFeatures {
    pub turn_count: u64,
    /// Turns currently held in the window.
    pub window_size: usize,
    pub mood_stability: f64,
    pub avg_confidence: f64,
    pub engagement_rate: f64,
    pub dominant_mood: Option<String>,
    pub recent_moods: Vec<String>,
    pub accumulated_artists: Vec<String>,
    pub accumulated_genres: Vec<String>,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
    pub skip_count: u64,
    pub session_duration_seconds: f64,
}

/// The closed set of scoring modifiers derived from conversation context.
///
/// `comfort_music_boost` starts at 0; the facade fills it in from the
/// emotional trajectory before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextModifiers {
    pub mood_stability_weight: f64,
    pub diversity_boost: f64,
    pub artist_familiarity_boost: f64,
    pub comfort_music_boost: f64,
    pub exploration_penalty: f64,
}

impl Default for ContextModifiers {
    fn default() -> Self {
        Self {
            mood_stability_weight: 1.0,
            diversity_boost: 0.0,
            artist_familiarity_boost: 0.0,
            comfort_music_boost: 0.0,
            exploration_penalty: 0.0,
        }
    }
}

/// One VA sample of the windowed mood trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnVa {
    pub turn: u64,
    pub valence: f64,
    pub arousal: f64,
    #[serde(default)]
    pub mood: Option<String>,
}

/// Multi-turn conversation context with sliding-window memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub user_id: String,
    pub window_size: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    total_turns: u64,
    turns: VecDeque<ConversationTurn>,
    accumulated_artists: BTreeSet<String>,
    accumulated_genres: BTreeSet<String>,
    /// Every mood detected across the session, in order (not windowed).
    accumulated_moods: Vec<String>,
    positive_feedback: u64,
    negative_feedback: u64,
    skip_count: u64,
}

impl ConversationContext {
    /// Create an empty context for a session.
    #[must_use]
    pub fn new(session_id: &str, user_id: &str, window_size: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            window_size: window_size.max(1),
            created_at: now,
            updated_at: now,
            total_turns: 0,
            turns: VecDeque::new(),
            accumulated_artists: BTreeSet::new(),
            accumulated_genres: BTreeSet::new(),
            accumulated_moods: Vec::new(),
            positive_feedback: 0,
            negative_feedback: 0,
            skip_count: 0,
        }
    }

    /// Total turns ever added to this session.
    #[must_use]
    pub fn turn_count(&self) -> u64 {
        self.total_turns
    }

    /// Turns currently held in the window, oldest first.
    #[must_use]
    pub fn windowed_turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// All artists mentioned across the session.
    #[must_use]
    pub fn accumulated_artists(&self) -> &BTreeSet<String> {
        &self.accumulated_artists
    }

    /// All genres mentioned across the session.
    #[must_use]
    pub fn accumulated_genres(&self) -> &BTreeSet<String> {
        &self.accumulated_genres
    }

    /// Append a new turn, evicting the oldest when the window is full.
    ///
    /// VA inputs are clamped onto `[-1, 1]`, intensity and confidence onto
    /// `[0, 1]`. Returns the created turn with its assigned number.
    pub fn add_turn(&mut self, input: TurnInput) -> ConversationTurn {
        self.total_turns += 1;

        let turn = ConversationTurn {
            turn_number: self.total_turns,
            user_text: input.user_text,
            bot_text: input.bot_text,
            timestamp: Utc::now(),
            detected_mood: input.detected_mood.clone(),
            valence: clamp_va(input.valence),
            arousal: clamp_va(input.arousal),
            intensity: clamp_unit(input.intensity),
            confidence: clamp_unit(input.confidence),
            entities: input.entities,
            recommended_song_ids: input.recommended_song_ids,
            feedback: None,
        };

        if self.turns.len() == self.window_size {
            self.turns.pop_front();
        }

        // Only supplied entities feed the accumulators; recommended songs
        // do not.
        if let Some(artists) = turn.entities.get("artists") {
            self.accumulated_artists.extend(artists.iter().cloned());
        }
        if let Some(genres) = turn.entities.get("genres") {
            self.accumulated_genres.extend(genres.iter().cloned());
        }
        if let Some(mood) = &input.detected_mood {
            self.accumulated_moods.push(mood.clone());
        }

        self.turns.push_back(turn.clone());
        self.updated_at = Utc::now();
        turn
    }

    /// Record feedback on a windowed turn.
    ///
    /// Returns `false` when the turn was evicted (or never existed) or
    /// already carries feedback; counters are only updated on success.
    pub fn record_feedback(&mut self, turn_number: u64, feedback: Feedback) -> bool {
        let Some(turn) = self
            .turns
            .iter_mut()
            .find(|t| t.turn_number == turn_number)
        else {
            return false;
        };
        if turn.feedback.is_some() {
            return false;
        }
        turn.feedback = Some(feedback);

        match feedback {
            Feedback::Love | Feedback::Like => self.positive_feedback += 1,
            Feedback::Dislike => self.negative_feedback += 1,
            Feedback::Skip => self.skip_count += 1,
            Feedback::Neutral => {}
        }
        self.updated_at = Utc::now();
        true
    }

    /// The `n` most recent non-null moods from the window, oldest first.
    #[must_use]
    pub fn recent_moods(&self, n: usize) -> Vec<String> {
        let moods: Vec<String> = self
            .turns
            .iter()
            .filter_map(|t| t.detected_mood.clone())
            .collect();
        let start = moods.len().saturating_sub(n);
        moods[start..].to_vec()
    }

    /// Windowed VA trajectory, one sample per turn.
    #[must_use]
    pub fn mood_trajectory(&self) -> Vec<TurnVa> {
        self.turns
            .iter()
            .map(|t| TurnVa {
                turn: t.turn_number,
                valence: t.valence,
                arousal: t.arousal,
                mood: t.detected_mood.clone(),
            })
            .collect()
    }

    /// Dominant mood across the whole session (not windowed).
    ///
    /// Ties break toward the mood that occurred most recently.
    #[must_use]
    pub fn dominant_mood(&self) -> Option<String> {
        if self.accumulated_moods.is_empty() {
            return None;
        }
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for (index, mood) in self.accumulated_moods.iter().enumerate() {
            let entry = counts.entry(mood.as_str()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = index;
        }
        counts
            .into_iter()
            .max_by_key(|&(_, (count, last_seen))| (count, last_seen))
            .map(|(mood, _)| mood.to_owned())
    }

    /// Derive context features from the window and accumulators.
    #[must_use]
    pub fn context_features(&self) -> ContextFeatures {
        let recent_start = self.turns.len().saturating_sub(RECENT_TURNS);
        let recent: Vec<&ConversationTurn> = self.turns.iter().skip(recent_start).collect();

        let recent_moods: Vec<String> = recent
            .iter()
            .filter_map(|t| t.detected_mood.clone())
            .collect();
        let mood_stability = if recent_moods.is_empty() {
            0.5
        } else {
            let unique: BTreeSet<&String> = recent_moods.iter().collect();
            1.0 - (unique.len() as f64 - 1.0) / (recent_moods.len().max(1) as f64)
        };

        let avg_confidence = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|t| t.confidence).sum::<f64>() / recent.len() as f64
        };

        let total_feedback = self.positive_feedback + self.negative_feedback + self.skip_count;
        let engagement_rate = if total_feedback > 0 {
            self.positive_feedback as f64 / total_feedback as f64
        } else {
            0.5
        };

        ContextFeatures {
            turn_count: self.total_turns,
            window_size: self.turns.len(),
            mood_stability,
            avg_confidence,
            engagement_rate,
            dominant_mood: self.dominant_mood(),
            recent_moods,
            accumulated_artists: self.accumulated_artists.iter().cloned().collect(),
            accumulated_genres: self.accumulated_genres.iter().cloned().collect(),
            positive_feedback: self.positive_feedback,
            negative_feedback: self.negative_feedback,
            skip_count: self.skip_count,
            session_duration_seconds: (Utc::now() - self.created_at)
                .num_milliseconds() as f64
                / 1000.0,
        }
    }

    /// Derive the scoring modifiers from the current features.
    #[must_use]
    pub fn context_modifiers(&self) -> ContextModifiers {
        let features = self.context_features();
        ContextModifiers {
            // Stable mood → lean harder on mood matching.
            mood_stability_weight: 1.0 + features.mood_stability * 0.3,
            // Dropping engagement → surface more variety.
            diversity_boost: (0.3 - features.engagement_rate * 0.3).max(0.0),
            artist_familiarity_boost: (features.accumulated_artists.len() as f64 * 0.02).min(0.2),
            // Filled in by the facade from the trajectory tracker.
            comfort_music_boost: 0.0,
            exploration_penalty: if features.positive_feedback > 5 {
                -0.1
            } else {
                0.0
            },
        }
    }
}
