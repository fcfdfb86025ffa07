//! Recommendation facade: the single entry point external callers use.
//!
//! The facade owns a [`Registry`] of collaborating stores (conversation
//! contexts, emotional trajectories, session rewards, the weight adapter,
//! the scoring engine and the cold-start handler) and threads values
//! between them. The stores never reference each other.
//!
//! Locking discipline: every store keys its state behind a per-key lock,
//! and no lock is ever held across a catalog or persistence call.

mod stores;
mod types;

pub use stores::KeyedStore;
pub use types::{
    AdaptiveRequest, AdaptiveResponse, ColdStartStatus, ContextEntities, ConversationReply,
    ConversationRequest, ExplanationVerbosity, FeedbackRequest, FeedbackResponse, InputKind,
    MAX_MESSAGE_LEN, MoodReading, Recommendation, SessionStatus, WeightAdjustmentKind,
    WeightsRequest, WeightsResponse,
};

use crate::bandit::Strategy;
use crate::catalog::CatalogAdapter;
use crate::coldstart::{ColdStartHandler, FeedbackSource, InMemoryFeedbackLog, TransitionManager};
use crate::config::CoreConfig;
use crate::context::{ConversationContext, ContextModifiers, TurnInput};
use crate::emotion::{clamp_va, mood_to_va};
use crate::error::{CoreError, Result};
use crate::reward::{Feedback, RewardBreakdown, SessionReward};
use crate::scoring::{ScoreRequest, ScoringEngine};
use crate::trajectory::TrajectoryTracker;
use crate::weights::{InMemoryWeightStore, WeightAdapter, WeightStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Every store the core needs, wired together.
///
/// Tests build a fresh registry per case; nothing in the crate is global.
pub struct Registry {
    config: CoreConfig,
    contexts: KeyedStore<ConversationContext>,
    trajectories: KeyedStore<TrajectoryTracker>,
    rewards: KeyedStore<SessionReward>,
    weights: WeightAdapter,
    scoring: ScoringEngine,
    cold_start: Arc<ColdStartHandler>,
    transition: TransitionManager,
    feedback: Arc<dyn FeedbackSource>,
    /// Strategy most recently served per user, for bandit attribution.
    last_strategy: Mutex<HashMap<String, Strategy>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.contexts.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Fully in-memory registry with an entropy-seeded RNG.
    #[must_use]
    pub fn new(config: CoreConfig, catalog: Arc<dyn CatalogAdapter>) -> Self {
        Self::with_stores(
            config,
            catalog,
            Arc::new(InMemoryWeightStore::new()),
            Arc::new(InMemoryFeedbackLog::new()),
            None,
        )
    }

    /// In-memory registry with a seeded RNG, for deterministic tests.
    #[must_use]
    pub fn seeded(config: CoreConfig, catalog: Arc<dyn CatalogAdapter>, seed: u64) -> Self {
        Self::with_stores(
            config,
            catalog,
            Arc::new(InMemoryWeightStore::new()),
            Arc::new(InMemoryFeedbackLog::new()),
            Some(seed),
        )
    }

    /// Registry over caller-supplied persistence seams.
    #[must_use]
    pub fn with_stores(
        config: CoreConfig,
        catalog: Arc<dyn CatalogAdapter>,
        weight_store: Arc<dyn WeightStore>,
        feedback: Arc<dyn FeedbackSource>,
        seed: Option<u64>,
    ) -> Self {
        let scoring = match seed {
            Some(seed) => ScoringEngine::seeded(
                catalog.clone(),
                config.scoring.clone(),
                &config.bandit,
                seed,
            ),
            None => ScoringEngine::new(catalog.clone(), config.scoring.clone(), &config.bandit),
        };
        let cold_start = Arc::new(ColdStartHandler::new(
            catalog,
            feedback.clone(),
            config.cold_start.clone(),
        ));
        Self {
            weights: WeightAdapter::new(weight_store, config.weights.clone()),
            scoring,
            transition: TransitionManager::new(cold_start.clone()),
            cold_start,
            feedback,
            config,
            contexts: KeyedStore::new(),
            trajectories: KeyedStore::new(),
            rewards: KeyedStore::new(),
            last_strategy: Mutex::new(HashMap::new()),
        }
    }

    /// The scoring engine (bandit access for status and tests).
    #[must_use]
    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// The weight adapter.
    #[must_use]
    pub fn weights(&self) -> &WeightAdapter {
        &self.weights
    }

    /// The cold-start handler.
    #[must_use]
    pub fn cold_start(&self) -> &ColdStartHandler {
        &self.cold_start
    }

    /// The core configuration.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    fn remember_strategy(&self, user_id: &str, strategy: Strategy) {
        let mut map = self.last_strategy.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(user_id.to_owned(), strategy);
    }

    fn recall_strategy(&self, user_id: &str) -> Option<Strategy> {
        let map = self.last_strategy.lock().unwrap_or_else(|e| e.into_inner());
        map.get(user_id).copied()
    }

    /// Evict idle sessions (contexts and their reward calculators).
    ///
    /// Returns the number of evicted sessions.
    pub fn evict_idle_sessions(&self) -> usize {
        let evicted = self.contexts.evict_idle(self.config.context.idle_ttl_secs);
        for session_id in &evicted {
            self.rewards.remove(session_id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted idle sessions");
        }
        evicted.len()
    }

    /// Spawn the periodic eviction sweep.
    pub fn spawn_eviction(registry: Arc<Registry>) -> tokio::task::JoinHandle<()> {
        let interval_secs = registry.config.context.eviction_interval_secs.max(1);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.evict_idle_sessions();
            }
        })
    }
}

/// Request/response entry point over a [`Registry`].
#[derive(Clone)]
pub struct Facade {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Facade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facade").finish_non_exhaustive()
    }
}

impl Facade {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    // ── Conversation.continue ───────────────────────────────────────────

    /// Ingest one conversational turn and optionally recommend.
    ///
    /// The conversational part always succeeds once validation passes; a
    /// failing recommendation pipeline degrades to an empty list.
    pub async fn continue_conversation(
        &self,
        req: ConversationRequest,
    ) -> Result<ConversationReply> {
        let char_count = req.message.chars().count();
        if char_count == 0 {
            return Err(CoreError::Validation("message must not be empty".into()));
        }
        if char_count > MAX_MESSAGE_LEN {
            return Err(CoreError::Validation(format!(
                "message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let registry = &self.registry;
        let session_id = req
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut reading = req.reading.clone().unwrap_or_default();
        if req.input_type == InputKind::Chip && reading.mood.is_none() {
            // A chip tap names the mood directly.
            let mood = req.message.trim().to_lowercase();
            let (valence, arousal) = mood_to_va(&mood);
            reading.mood = Some(mood);
            reading.valence = valence;
            reading.arousal = arousal;
            reading.confidence = 1.0;
        }

        let bot_response = compose_reply(&reading, req.emotional_support_mode);

        // CCM: append the turn.
        let ctx_entry = registry.contexts.get_or_insert_with(&session_id, || {
            ConversationContext::new(&session_id, &req.user_id, registry.config.context.window_size)
        });
        let (turn_number, context_entities) = {
            let mut ctx = ctx_entry.lock().unwrap_or_else(|e| e.into_inner());
            let turn = ctx.add_turn(TurnInput {
                user_text: req.message.clone(),
                bot_text: bot_response.clone(),
                detected_mood: reading.mood.clone(),
                valence: reading.valence,
                arousal: reading.arousal,
                intensity: reading.intensity,
                confidence: reading.confidence,
                entities: reading.entities.clone(),
                recommended_song_ids: Vec::new(),
            });
            let entities = ContextEntities {
                artists: ctx.accumulated_artists().iter().cloned().collect(),
                genres: ctx.accumulated_genres().iter().cloned().collect(),
            };
            (turn.turn_number, entities)
        };

        // ETT: extend the trajectory.
        let trajectory_entry = registry
            .trajectories
            .get_or_insert_with(&req.user_id, TrajectoryTracker::new);
        let trend = {
            let mut tracker = trajectory_entry.lock().unwrap_or_else(|e| e.into_inner());
            tracker.add_point(
                reading.valence,
                reading.arousal,
                turn_number,
                reading.mood.clone(),
            );
            tracker.current_trend()
        };

        // SRC: refresh the emotional component.
        let reward_entry = registry.rewards.get_or_insert_with(&session_id, || {
            SessionReward::new(&session_id, &req.user_id, registry.config.reward.clone())
        });
        {
            let mut reward = reward_entry.lock().unwrap_or_else(|e| e.into_inner());
            reward.update_emotional_state(reading.valence, reading.arousal, trend);
        }

        let clarity_score = if req.input_type == InputKind::Chip {
            1.0
        } else {
            reading.confidence
        };
        let should_recommend = !req.emotional_support_mode
            && (req.input_type == InputKind::Chip
                || (reading.mood.is_some() && clarity_score >= 0.5));

        let recommendations = if req.include_recommendations && should_recommend {
            let adaptive = AdaptiveRequest {
                mood: reading.mood.clone(),
                valence: Some(reading.valence),
                arousal: Some(reading.arousal),
                limit: req
                    .max_recommendations
                    .unwrap_or(registry.config.scoring.default_limit)
                    .clamp(1, registry.config.scoring.max_limit),
                ..AdaptiveRequest::for_user(&req.user_id)
            };
            match self.adaptive_recommendation(adaptive).await {
                Ok(response) => response.recommendations,
                Err(e) => {
                    warn!(error = %e, "recommendation failed during conversation turn");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(ConversationReply {
            session_id,
            turn_number,
            bot_response,
            detected_mood: reading.mood,
            emotional_trend: trend,
            clarity_score,
            should_recommend,
            recommendations,
            context_entities,
        })
    }

    // ── Recommendation.adaptive ─────────────────────────────────────────

    /// Adaptive recommendations blending cold-start and personalized
    /// scoring by the user's history depth.
    ///
    /// Catalog failures and deadline overruns degrade to an empty list
    /// with `strategy_used = "none"`; session state already mutated by
    /// earlier steps is retained.
    pub async fn adaptive_recommendation(
        &self,
        req: AdaptiveRequest,
    ) -> Result<AdaptiveResponse> {
        let registry = &self.registry;
        if req.limit == 0 || req.limit > registry.config.scoring.max_limit {
            return Err(CoreError::Validation(format!(
                "limit must be within 1..={}",
                registry.config.scoring.max_limit
            )));
        }
        if !(0.0..=1.0).contains(&req.diversity_factor) {
            return Err(CoreError::Validation(
                "diversity_factor must be within [0, 1]".into(),
            ));
        }

        let started = Instant::now();
        let pw = if req.apply_cold_start {
            registry.cold_start.personalization_weight(&req.user_id)
        } else {
            1.0
        };
        let cold_start_active = pw < 1.0;

        let pipeline = self.recommendation_pipeline(&req, pw);
        let outcome = match req.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, pipeline).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CoreError::UpstreamTimeout(
                    "recommendation deadline exceeded".into(),
                )),
            },
            None => pipeline.await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((recommendations, strategy_used, diversity_applied)) => Ok(AdaptiveResponse {
                recommendations,
                strategy_used,
                personalization_weight: pw,
                cold_start_active,
                diversity_applied,
                processing_time_ms: elapsed_ms,
            }),
            Err(e) if e.is_upstream() => {
                // No bandit or weight update happens on a failed request;
                // already-appended session state stays.
                warn!(user_id = %req.user_id, error = %e, "recommendation degraded");
                Ok(AdaptiveResponse {
                    recommendations: Vec::new(),
                    strategy_used: "none".to_owned(),
                    personalization_weight: pw,
                    cold_start_active,
                    diversity_applied: false,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn recommendation_pipeline(
        &self,
        req: &AdaptiveRequest,
        pw: f64,
    ) -> Result<(Vec<Recommendation>, String, bool)> {
        let registry = &self.registry;

        let centroid = req.mood.as_deref().map(mood_to_va);
        let target_valence = clamp_va(
            req.valence
                .or(centroid.map(|(v, _)| v))
                .unwrap_or(0.0),
        );
        let mut target_arousal = clamp_va(
            req.arousal
                .or(req.energy_level)
                .or(centroid.map(|(_, a)| a))
                .unwrap_or(0.0),
        );

        let mut modifiers = ContextModifiers::default();
        if req.use_context_memory {
            if let Some(entry) = registry.contexts.latest_for_user(&req.user_id) {
                let ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
                modifiers = ctx.context_modifiers();
            }
        }
        if req.use_emotional_trajectory {
            if let Some(entry) = registry.trajectories.get(&req.user_id) {
                let tracker = entry.lock().unwrap_or_else(|e| e.into_inner());
                modifiers.comfort_music_boost = tracker.comfort_music_boost();
                target_arousal = clamp_va(target_arousal + tracker.energy_adjustment());
            }
        }

        // Pure cold path: nothing personalized to blend yet.
        if pw <= 0.0 {
            let (songs, strategy, _) = registry
                .cold_start
                .recommend(
                    &req.user_id,
                    req.mood.as_deref(),
                    req.limit,
                    Some(req.diversity_factor),
                )
                .await?;
            let diversity_applied = req.mood.is_some();
            let recommendations = finish_recommendations(
                songs.into_iter().map(Recommendation::from).collect(),
                req,
            );
            return Ok((recommendations, strategy.to_owned(), diversity_applied));
        }

        // Personalized scoring. Weights load through the persistence seam
        // before any store lock is taken.
        let weights = registry.weights.get_weights(&req.user_id);
        let outcome = registry
            .scoring
            .score_songs(ScoreRequest {
                user_id: req.user_id.clone(),
                target_mood: req.mood.clone(),
                target_valence,
                target_arousal,
                modifiers,
                weights,
                strategy: None,
                limit: req.limit,
            })
            .await?;
        let strategy = outcome.strategy_used;
        registry.remember_strategy(&req.user_id, strategy);
        debug!(user_id = %req.user_id, strategy = %strategy, "personalized scoring complete");

        let personal: Vec<Recommendation> =
            outcome.songs.into_iter().map(Recommendation::from).collect();

        if pw >= 1.0 {
            let recommendations = finish_recommendations(personal, req);
            return Ok((
                recommendations,
                strategy.as_str().to_owned(),
                strategy != Strategy::Diversity,
            ));
        }

        // Transition band: blend personalized picks with cold ones.
        let (cold_songs, _, _) = registry
            .cold_start
            .recommend(
                &req.user_id,
                req.mood.as_deref(),
                req.limit,
                Some(req.diversity_factor),
            )
            .await?;
        let cold: Vec<Recommendation> =
            cold_songs.into_iter().map(Recommendation::from).collect();
        let (blended, blend_weights) =
            registry
                .transition
                .blend(&req.user_id, cold, personal, req.limit);
        debug!(
            user_id = %req.user_id,
            personalization_weight = blend_weights.personalization_weight,
            "blended cold and personalized recommendations"
        );
        let recommendations = finish_recommendations(blended, req);
        Ok((recommendations, strategy.as_str().to_owned(), true))
    }

    // ── Learning.weights ────────────────────────────────────────────────

    /// Apply a weight adjustment: learned from feedback, explicit, or a
    /// reset to defaults.
    pub fn learning_weights(&self, req: WeightsRequest) -> Result<WeightsResponse> {
        let registry = &self.registry;
        match req.adjustment_type {
            WeightAdjustmentKind::Feedback => {
                let label = req.feedback_type.as_deref().ok_or_else(|| {
                    CoreError::Validation("feedback_type is required for feedback adjustments".into())
                })?;
                let feedback = Feedback::parse(label).ok_or_else(|| {
                    CoreError::Validation(format!("unknown feedback_type: {label}"))
                })?;
                let outcome = registry.weights.adjust_weights(
                    &req.user_id,
                    feedback,
                    &req.song_features,
                    req.song_id,
                );
                Ok(WeightsResponse {
                    success: true,
                    adjustment_magnitude: outcome.magnitude(),
                    updated_weights: outcome.weights,
                })
            }
            WeightAdjustmentKind::Explicit => {
                if req.explicit_weights.is_empty() {
                    return Err(CoreError::Validation(
                        "explicit_weights must not be empty".into(),
                    ));
                }
                let bounds = &registry.config.weights;
                for (feature, &weight) in &req.explicit_weights {
                    if !crate::weights::is_known_feature(feature) {
                        return Err(CoreError::Validation(format!(
                            "unknown feature: {feature}"
                        )));
                    }
                    if weight < bounds.weight_min || weight > bounds.weight_max {
                        return Err(CoreError::Validation(format!(
                            "weight for {feature} outside [{}, {}]",
                            bounds.weight_min, bounds.weight_max
                        )));
                    }
                }
                let mut magnitude = 0.0;
                for (feature, &weight) in &req.explicit_weights {
                    let outcome =
                        registry
                            .weights
                            .set_weight(&req.user_id, feature, weight, "explicit")?;
                    magnitude += outcome.magnitude();
                }
                Ok(WeightsResponse {
                    success: true,
                    updated_weights: registry.weights.get_weights(&req.user_id),
                    adjustment_magnitude: magnitude,
                })
            }
            WeightAdjustmentKind::Reset => {
                let before = registry.weights.get_weights(&req.user_id);
                let after = registry.weights.reset_weights(&req.user_id);
                let magnitude = before
                    .iter()
                    .map(|(feature, &w)| (w - after.get(feature).copied().unwrap_or(w)).abs())
                    .sum();
                Ok(WeightsResponse {
                    success: true,
                    updated_weights: after,
                    adjustment_magnitude: magnitude,
                })
            }
        }
    }

    // ── Feedback.reward ─────────────────────────────────────────────────

    /// Record song feedback: session reward first, then weight learning,
    /// then the bandit update attributed to the last served strategy.
    pub fn feedback_reward(&self, req: FeedbackRequest) -> Result<FeedbackResponse> {
        let registry = &self.registry;
        let feedback = Feedback::parse(&req.feedback_type).ok_or_else(|| {
            CoreError::Validation(format!("unknown feedback_type: {}", req.feedback_type))
        })?;
        if req.play_duration_seconds < 0.0 || req.song_duration_seconds < 0.0 {
            return Err(CoreError::Validation(
                "durations must be non-negative".into(),
            ));
        }

        let listen_pct = if req.song_duration_seconds > 0.0 {
            (req.play_duration_seconds / req.song_duration_seconds).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let recommendation_score = req.recommendation_score.unwrap_or(0.5);

        let session_id = match &req.session_id {
            Some(session_id) => session_id.clone(),
            None => registry
                .contexts
                .latest_for_user(&req.user_id)
                .map(|entry| {
                    let ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
                    ctx.session_id.clone()
                })
                .unwrap_or_else(|| format!("user-{}", req.user_id)),
        };

        // Turn-scoped feedback must land inside the window; an evicted
        // turn rejects the whole request without touching bandit/weights.
        if let Some(turn_number) = req.turn_number {
            let recorded = registry
                .contexts
                .get(&session_id)
                .map(|entry| {
                    let mut ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
                    ctx.record_feedback(turn_number, feedback)
                })
                .unwrap_or(false);
            if !recorded {
                return Ok(FeedbackResponse {
                    success: false,
                    reason: Some(format!(
                        "turn {turn_number} is outside the session window"
                    )),
                    engagement_score: 0.0,
                    satisfaction_score: 0.0,
                    emotional_improvement: 0.0,
                    total_reward: 0.0,
                });
            }
        }

        let reward_entry = registry.rewards.get_or_insert_with(&session_id, || {
            SessionReward::new(&session_id, &req.user_id, registry.config.reward.clone())
        });
        let (engagement, satisfaction, emotional, total, bandit_reward) = {
            let mut reward = reward_entry.lock().unwrap_or_else(|e| e.into_inner());
            reward.record_feedback(req.song_id, feedback, listen_pct, recommendation_score);
            (
                reward.engagement_score(),
                reward.satisfaction_score(),
                reward.emotional_improvement(),
                reward.session_reward(),
                reward.bandit_reward(),
            )
        };

        let adjustment =
            registry
                .weights
                .adjust_weights(&req.user_id, feedback, &req.song_features, Some(req.song_id));
        debug!(
            user_id = %req.user_id,
            song_id = req.song_id,
            feedback = %feedback,
            adjusted = adjustment.adjustments.len(),
            "feedback processed"
        );

        registry.feedback.record(&req.user_id);

        if let Some(strategy) = registry.recall_strategy(&req.user_id) {
            registry.scoring.update_bandit(strategy, bandit_reward);
        }

        Ok(FeedbackResponse {
            success: true,
            reason: None,
            engagement_score: engagement,
            satisfaction_score: satisfaction,
            emotional_improvement: emotional,
            total_reward: total,
        })
    }

    // ── Session.status ──────────────────────────────────────────────────

    /// Full session status for a user. Callers may only inspect
    /// themselves; unknown users get empty structures.
    pub fn session_status(&self, caller_id: &str, user_id: &str) -> Result<SessionStatus> {
        if caller_id != user_id {
            return Err(CoreError::Forbidden(format!(
                "caller {caller_id} may not read sessions of {user_id}"
            )));
        }
        let registry = &self.registry;

        let context_memory = registry.contexts.latest_for_user(user_id).map(|entry| {
            let ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
            ctx.context_features()
        });

        let emotional_trajectory = registry.trajectories.get(user_id).map(|entry| {
            let tracker = entry.lock().unwrap_or_else(|e| e.into_inner());
            tracker.analysis()
        });

        let session_rewards = registry
            .contexts
            .latest_for_user(user_id)
            .and_then(|entry| {
                let session_id = {
                    let ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
                    ctx.session_id.clone()
                };
                registry.rewards.get(&session_id)
            })
            .map(|entry| {
                let reward = entry.lock().unwrap_or_else(|e| e.into_inner());
                reward.breakdown()
            });

        let feedback_count = registry.feedback.feedback_count(user_id);
        let personalization_weight = registry.cold_start.personalization_weight(user_id);

        Ok(SessionStatus {
            user_id: user_id.to_owned(),
            context_memory,
            emotional_trajectory,
            session_rewards,
            personalization_weights: registry.weights.get_weights(user_id),
            cold_start: ColdStartStatus {
                feedback_count,
                personalization_weight,
                cold_start_active: personalization_weight < 1.0,
            },
        })
    }

    // ── Session management ──────────────────────────────────────────────

    /// Active session ids, optionally filtered by user.
    #[must_use]
    pub fn list_active_sessions(&self, user_id: Option<&str>) -> Vec<String> {
        self.registry.contexts.sessions_for(user_id)
    }

    /// Drop a session's context and reward state.
    pub fn delete_session(&self, session_id: &str) -> bool {
        let removed = self.registry.contexts.remove(session_id);
        self.registry.rewards.remove(session_id);
        removed
    }

    /// Final reward breakdown for a session.
    pub fn finalize_session(&self, session_id: &str) -> Result<RewardBreakdown> {
        let entry = self
            .registry
            .rewards
            .get(session_id)
            .ok_or_else(|| CoreError::NotFound(format!("no reward state for {session_id}")))?;
        let reward = entry.lock().unwrap_or_else(|e| e.into_inner());
        Ok(reward.breakdown())
    }
}

/// Trim or extend explanations per the request's options.
fn finish_recommendations(
    mut recommendations: Vec<Recommendation>,
    req: &AdaptiveRequest,
) -> Vec<Recommendation> {
    for rec in &mut recommendations {
        if !req.include_explanations {
            rec.explanation.clear();
        } else if req.explanation_verbosity == ExplanationVerbosity::Detailed {
            rec.explanation = format!(
                "{} (strategy: {}, score {:.2})",
                rec.explanation, rec.strategy, rec.score
            );
        }
    }
    recommendations
}

/// Short acknowledgment reply for a conversational turn.
///
/// Reply generation proper belongs to the LLM layer outside the core;
/// this fallback keeps conversational turns self-contained.
fn compose_reply(reading: &MoodReading, support_mode: bool) -> String {
    match (&reading.mood, support_mode) {
        (Some(mood), true) => format!(
            "That sounds like a lot to carry. I'm here with you. Tell me more about feeling {mood}."
        ),
        (Some(mood), false) => {
            format!("Sounds like you're feeling {mood}. Want me to line up some songs for that?")
        }
        (None, true) => "I'm listening. Take your time.".to_owned(),
        (None, false) => {
            "Tell me a bit more about how you're feeling and I'll find something that fits."
                .to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::catalog::{CatalogSong, StaticCatalog};

    fn facade() -> Facade {
        let songs: Vec<CatalogSong> = (0..30)
            .map(|i| CatalogSong {
                song_id: i,
                name: format!("song-{i}"),
                artist: format!("artist-{i}"),
                genre: None,
                mood: Some("calm".to_owned()),
                valence: 0.5,
                energy: -0.5,
                tempo: 115.0,
                popularity: 80.0,
                like_count: 0,
            })
            .collect();
        let registry = Registry::seeded(
            CoreConfig::default(),
            Arc::new(StaticCatalog::new(songs)),
            7,
        );
        Facade::new(Arc::new(registry))
    }

    fn message_request(message: &str) -> ConversationRequest {
        ConversationRequest {
            session_id: None,
            user_id: "u-1".to_owned(),
            message: message.to_owned(),
            input_type: InputKind::Text,
            reading: None,
            include_recommendations: false,
            max_recommendations: None,
            emotional_support_mode: false,
        }
    }

    #[tokio::test]
    async fn message_length_bounds() {
        let facade = facade();
        let err = facade
            .continue_conversation(message_request(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let ok = facade
            .continue_conversation(message_request(&"x".repeat(1000)))
            .await;
        assert!(ok.is_ok());

        let err = facade
            .continue_conversation(message_request(&"x".repeat(1001)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn chip_input_maps_to_centroid() {
        let facade = facade();
        let reply = facade
            .continue_conversation(ConversationRequest {
                input_type: InputKind::Chip,
                ..message_request("Calm")
            })
            .await
            .unwrap();
        assert_eq!(reply.detected_mood.as_deref(), Some("calm"));
        assert_eq!(reply.clarity_score, 1.0);
        assert!(reply.should_recommend);
        assert!(reply.bot_response.contains("calm"));
    }

    #[tokio::test]
    async fn support_mode_suppresses_recommendations() {
        let facade = facade();
        let reply = facade
            .continue_conversation(ConversationRequest {
                emotional_support_mode: true,
                input_type: InputKind::Chip,
                include_recommendations: true,
                ..message_request("sad")
            })
            .await
            .unwrap();
        assert!(!reply.should_recommend);
        assert!(reply.recommendations.is_empty());
    }

    #[tokio::test]
    async fn adaptive_limit_bounds() {
        let facade = facade();
        let err = facade
            .adaptive_recommendation(AdaptiveRequest {
                limit: 0,
                ..AdaptiveRequest::for_user("u-1")
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = facade
            .adaptive_recommendation(AdaptiveRequest {
                limit: 51,
                ..AdaptiveRequest::for_user("u-1")
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let ok = facade
            .adaptive_recommendation(AdaptiveRequest {
                limit: 50,
                ..AdaptiveRequest::for_user("u-1")
            })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn session_status_enforces_identity() {
        let facade = facade();
        let err = facade.session_status("mallory", "u-1").unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let status = facade.session_status("ghost", "ghost").unwrap();
        assert!(status.context_memory.is_none());
        assert!(status.emotional_trajectory.is_none());
        assert!(status.session_rewards.is_none());
        assert_eq!(status.cold_start.feedback_count, 0);
        assert!(status.cold_start.cold_start_active);
    }

    #[tokio::test]
    async fn unknown_feedback_type_is_rejected() {
        let facade = facade();
        let err = facade
            .feedback_reward(FeedbackRequest {
                user_id: "u-1".to_owned(),
                session_id: None,
                song_id: 1,
                feedback_type: "adore".to_owned(),
                turn_number: None,
                play_duration_seconds: 10.0,
                song_duration_seconds: 100.0,
                recommendation_score: None,
                song_features: Default::default(),
            })
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn compose_reply_variants() {
        let mut reading = MoodReading::default();
        assert!(compose_reply(&reading, false).contains("Tell me"));
        assert!(compose_reply(&reading, true).contains("listening"));
        reading.mood = Some("nostalgic".to_owned());
        assert!(compose_reply(&reading, false).contains("nostalgic"));
        assert!(compose_reply(&reading, true).contains("nostalgic"));
    }
}
