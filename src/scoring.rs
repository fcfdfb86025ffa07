//! Context-aware song scoring.
//!
//! Combines the candidate's audio features, the caller's target emotion,
//! per-user weights, conversation-context modifiers and the bandit-selected
//! strategy into a bounded final score with a human-readable explanation.
//!
//! Scoring order per song:
//!
//! 1. base components, each multiplied by its user weight
//! 2. context modifiers (mood stability, comfort boost, diversity boost)
//! 3. strategy-specific adjustments
//! 4. normalization: `final = min(1, Σ components / (1.5 · Σ weights))`

use crate::bandit::{Strategy, ThompsonBandit};
use crate::catalog::{CatalogAdapter, CatalogSong};
use crate::config::{BanditConfig, ScoringConfig};
use crate::context::ContextModifiers;
use crate::emotion::clamp_unit;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Reference tempo for the comfort window (bpm).
const TEMPO_CENTER: f64 = 120.0;
/// Width of the tempo comfort window (bpm).
const TEMPO_SPREAD: f64 = 80.0;

/// Post-modifier score components for one song. A closed set; the
/// exploration bonus only exists under the exploration strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub mood_match: f64,
    pub valence_alignment: f64,
    pub energy_alignment: f64,
    pub emotional_resonance: f64,
    pub tempo_comfort: f64,
    pub popularity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploration_bonus: Option<f64>,
}

impl ScoreComponents {
    /// Sum of all present components.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.mood_match
            + self.valence_alignment
            + self.energy_alignment
            + self.emotional_resonance
            + self.tempo_comfort
            + self.popularity
            + self.exploration_bonus.unwrap_or(0.0)
    }

    fn named(&self) -> Vec<(&'static str, f64)> {
        let mut named = vec![
            ("mood_match", self.mood_match),
            ("valence_alignment", self.valence_alignment),
            ("energy_alignment", self.energy_alignment),
            ("emotional_resonance", self.emotional_resonance),
            ("tempo_comfort", self.tempo_comfort),
            ("popularity", self.popularity),
        ];
        if let Some(bonus) = self.exploration_bonus {
            named.push(("exploration_bonus", bonus));
        }
        named
    }

    /// The two components with the largest post-modifier values.
    #[must_use]
    pub fn top_two(&self) -> Vec<(&'static str, f64)> {
        let mut named = self.named();
        named.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        named.truncate(2);
        named
    }
}

/// A song with its calculated score and explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSong {
    pub song_id: i64,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    pub valence: f64,
    pub energy: f64,
    pub tempo: f64,
    /// Normalized score, `[0, 1]`.
    pub final_score: f64,
    /// Component sum before normalization.
    pub raw_score: f64,
    pub components: ScoreComponents,
    pub strategy: Strategy,
    pub explanation: String,
}

/// Parameters for one scoring run.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub user_id: String,
    pub target_mood: Option<String>,
    pub target_valence: f64,
    pub target_arousal: f64,
    pub modifiers: ContextModifiers,
    /// Per-user feature weights (defaults when the user has none).
    pub weights: BTreeMap<String, f64>,
    /// Force a strategy instead of letting the bandit pick.
    pub strategy: Option<Strategy>,
    pub limit: usize,
}

/// Result of a scoring run.
#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub songs: Vec<ScoredSong>,
    pub strategy_used: Strategy,
    /// Thompson samples per strategy; a forced strategy reports 1.0 on
    /// itself and 0.0 elsewhere.
    pub samples: BTreeMap<Strategy, f64>,
}

/// Context-aware scoring engine with Thompson-Sampling strategy selection.
pub struct ScoringEngine {
    catalog: Arc<dyn CatalogAdapter>,
    bandit: ThompsonBandit,
    config: ScoringConfig,
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScoringEngine {
    /// Create an engine with an entropy-seeded bandit.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogAdapter>,
        config: ScoringConfig,
        bandit_config: &BanditConfig,
    ) -> Self {
        Self {
            catalog,
            bandit: ThompsonBandit::new(bandit_config.prior_alpha, bandit_config.prior_beta),
            config,
        }
    }

    /// Create an engine with a seeded bandit, for deterministic tests.
    #[must_use]
    pub fn seeded(
        catalog: Arc<dyn CatalogAdapter>,
        config: ScoringConfig,
        bandit_config: &BanditConfig,
        seed: u64,
    ) -> Self {
        Self {
            catalog,
            bandit: ThompsonBandit::seeded(
                bandit_config.prior_alpha,
                bandit_config.prior_beta,
                seed,
            ),
            config,
        }
    }

    /// The strategy bandit.
    #[must_use]
    pub fn bandit(&self) -> &ThompsonBandit {
        &self.bandit
    }

    /// Forward a reward to the strategy bandit.
    pub fn update_bandit(&self, strategy: Strategy, reward: f64) {
        self.bandit.update(strategy, reward);
    }

    /// Score and rank candidate songs.
    ///
    /// Fetches roughly `3 × limit` candidates, scores each one, sorts by
    /// final score and applies the artist-diversity filter (unless the
    /// diversity strategy is active, which ranks plainly).
    pub async fn score_songs(&self, req: ScoreRequest) -> Result<ScoreOutcome> {
        let (strategy, samples) = match req.strategy {
            Some(forced) => {
                let mut samples: BTreeMap<Strategy, f64> =
                    Strategy::ALL.iter().map(|&s| (s, 0.0)).collect();
                samples.insert(forced, 1.0);
                (forced, samples)
            }
            None => self.bandit.sample(),
        };

        let approx = req.limit.saturating_mul(self.config.candidate_multiplier);
        let candidates = self
            .catalog
            .fetch_candidates(req.target_mood.as_deref(), approx)
            .await?;

        tracing::debug!(
            user_id = %req.user_id,
            strategy = %strategy,
            candidates = candidates.len(),
            "scoring candidates"
        );

        if candidates.is_empty() {
            return Ok(ScoreOutcome {
                songs: Vec::new(),
                strategy_used: strategy,
                samples,
            });
        }

        let mut seen_ids = HashSet::new();
        let mut scored: Vec<ScoredSong> = candidates
            .into_iter()
            .filter(|song| seen_ids.insert(song.song_id))
            .map(|song| self.score_single(&song, strategy, &req))
            .collect();

        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let songs = if strategy == Strategy::Diversity {
            scored.truncate(req.limit);
            scored
        } else {
            apply_diversity_filter(scored, req.limit)
        };

        Ok(ScoreOutcome {
            songs,
            strategy_used: strategy,
            samples,
        })
    }

    fn score_single(&self, song: &CatalogSong, strategy: Strategy, req: &ScoreRequest) -> ScoredSong {
        let weight = |name: &str, fallback: f64| -> f64 {
            req.weights.get(name).copied().unwrap_or(fallback)
        };

        let mood_match_base = match (&req.target_mood, &song.mood) {
            (Some(target), Some(mood)) => {
                if mood.to_lowercase().contains(&target.to_lowercase()) {
                    1.0
                } else {
                    0.3
                }
            }
            _ => 0.5,
        };

        let valence_diff = (req.target_valence - song.valence).abs();
        let energy_diff = (req.target_arousal - song.energy).abs();
        let va_distance = (valence_diff.powi(2) + energy_diff.powi(2)).sqrt();

        let mut components = ScoreComponents {
            mood_match: mood_match_base * weight("mood_match", 1.0),
            valence_alignment: (1.0 - valence_diff).max(0.0) * weight("valence_alignment", 1.0),
            energy_alignment: (1.0 - energy_diff).max(0.0) * weight("energy_alignment", 1.0),
            emotional_resonance: (1.0 - va_distance / 2.0).max(0.0)
                * weight("emotional_resonance", 1.0),
            tempo_comfort: clamp_unit(1.0 - (song.tempo - TEMPO_CENTER).abs() / TEMPO_SPREAD)
                * weight("tempo_comfort", 1.0),
            popularity: song.popularity / 100.0 * weight("popularity", 0.5),
            exploration_bonus: None,
        };

        // Context modifiers, in contract order.
        components.mood_match *= req.modifiers.mood_stability_weight;
        components.emotional_resonance *= req.modifiers.mood_stability_weight;

        if req.modifiers.comfort_music_boost > 0.0 && song.energy < 0.5 && song.valence > 0.0 {
            components.emotional_resonance += req.modifiers.comfort_music_boost;
        }

        if strategy == Strategy::Diversity {
            components.popularity *= 1.0 + req.modifiers.diversity_boost;
        }

        // Strategy-specific adjustments.
        match strategy {
            Strategy::Emotion => {
                components.emotional_resonance *= 1.5;
                components.mood_match *= 1.3;
            }
            Strategy::Content => {
                components.valence_alignment *= 1.3;
                components.energy_alignment *= 1.3;
            }
            Strategy::Exploration => {
                components.mood_match *= 0.7;
                components.valence_alignment *= 0.7;
                components.energy_alignment *= 0.7;
                components.emotional_resonance *= 0.7;
                components.tempo_comfort *= 0.7;
                components.popularity *= 0.7;
                components.exploration_bonus = Some(self.bandit.uniform(0.2, 0.5));
            }
            Strategy::Collaborative | Strategy::Diversity => {}
        }

        let raw_score = components.total();
        let max_possible = req.weights.values().sum::<f64>() * 1.5;
        let final_score = if max_possible > 0.0 {
            (raw_score / max_possible).min(1.0)
        } else {
            0.0
        };

        let explanation =
            build_explanation(req.target_mood.as_deref(), &components.top_two());

        ScoredSong {
            song_id: song.song_id,
            name: song.name.clone(),
            artist: song.artist.clone(),
            genre: song.genre.clone(),
            mood: song.mood.clone(),
            valence: song.valence,
            energy: song.energy,
            tempo: song.tempo,
            final_score,
            raw_score,
            components,
            strategy,
            explanation,
        }
    }
}

/// Canned phrase for a score component.
fn component_phrase(component: &str) -> &'static str {
    match component {
        "mood_match" => "matches your mood",
        "emotional_resonance" => "resonates emotionally",
        "valence_alignment" => "has the right feeling",
        "energy_alignment" => "matches your energy level",
        "tempo_comfort" => "has a comfortable tempo",
        "popularity" => "is popular with others",
        "exploration_bonus" => "could be a nice discovery",
        _ => "fits your preferences",
    }
}

fn build_explanation(target_mood: Option<&str>, top_factors: &[(&'static str, f64)]) -> String {
    let phrase = top_factors
        .first()
        .map(|&(name, _)| component_phrase(name))
        .unwrap_or("fits your preferences");
    match target_mood {
        Some(mood) => format!("This {mood} track {phrase}"),
        None => format!("This track {phrase}"),
    }
}

/// Keep the ranking but avoid early artist repeats.
///
/// Walking the ranked list, a song whose artist already appears in the
/// selection is skipped while fewer than three songs are selected. Any
/// shortfall is filled from the remaining ranked list in order.
fn apply_diversity_filter(ranked: Vec<ScoredSong>, limit: usize) -> Vec<ScoredSong> {
    let mut selected: Vec<ScoredSong> = Vec::with_capacity(limit);
    let mut seen_artists: HashSet<String> = HashSet::new();
    let mut passed_over: Vec<ScoredSong> = Vec::new();

    for song in ranked {
        if selected.len() >= limit {
            break;
        }
        if seen_artists.contains(&song.artist) && selected.len() < 3 {
            passed_over.push(song);
            continue;
        }
        seen_artists.insert(song.artist.clone());
        selected.push(song);
    }

    // Fill remaining slots from the songs the artist rule skipped.
    for song in passed_over {
        if selected.len() >= limit {
            break;
        }
        selected.push(song);
    }

    selected
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::weights::default_weights;
    use async_trait::async_trait;

    /// Returns every song regardless of the target mood, for tests that
    /// pin down scoring behavior across mismatched labels.
    struct PassthroughCatalog(Vec<CatalogSong>);

    #[async_trait]
    impl CatalogAdapter for PassthroughCatalog {
        async fn fetch_candidates(
            &self,
            _target_mood: Option<&str>,
            approx_limit: usize,
        ) -> Result<Vec<CatalogSong>> {
            Ok(self.0.iter().take(approx_limit).cloned().collect())
        }
    }

    fn song(id: i64, artist: &str, mood: Option<&str>, valence: f64, energy: f64) -> CatalogSong {
        CatalogSong {
            song_id: id,
            name: format!("song-{id}"),
            artist: artist.to_owned(),
            genre: None,
            mood: mood.map(str::to_owned),
            valence,
            energy,
            tempo: 120.0,
            popularity: 50.0,
            like_count: 0,
        }
    }

    fn engine(songs: Vec<CatalogSong>) -> ScoringEngine {
        ScoringEngine::seeded(
            Arc::new(StaticCatalog::new(songs)),
            ScoringConfig::default(),
            &BanditConfig::default(),
            42,
        )
    }

    fn request(strategy: Option<Strategy>) -> ScoreRequest {
        ScoreRequest {
            user_id: "u-1".to_owned(),
            target_mood: None,
            target_valence: 0.0,
            target_arousal: 0.0,
            modifiers: ContextModifiers::default(),
            weights: default_weights(),
            strategy,
            limit: 10,
        }
    }

    #[tokio::test]
    async fn emotion_strategy_favors_va_match() {
        let mut a = song(1, "artist-a", Some("calm"), 0.5, -0.5);
        a.popularity = 80.0;
        let mut b = song(2, "artist-b", Some("happy"), 0.8, 0.6);
        b.tempo = 140.0;
        b.popularity = 60.0;

        let engine = ScoringEngine::seeded(
            Arc::new(PassthroughCatalog(vec![a, b])),
            ScoringConfig::default(),
            &BanditConfig::default(),
            42,
        );
        let outcome = engine
            .score_songs(ScoreRequest {
                target_mood: Some("calm".to_owned()),
                target_valence: 0.5,
                target_arousal: -0.5,
                strategy: Some(Strategy::Emotion),
                ..request(None)
            })
            .await
            .unwrap();

        assert_eq!(outcome.strategy_used, Strategy::Emotion);
        assert_eq!(outcome.songs[0].song_id, 1);

        let top = &outcome.songs[0];
        // Perfect VA match boosted by 1.5, exact mood label by 1.3.
        assert!((top.components.emotional_resonance - 1.5).abs() < 1e-9);
        assert!((top.components.mood_match - 1.3).abs() < 1e-9);
        assert!(top.explanation.contains("calm"));

        let runner_up = &outcome.songs[1];
        assert!((runner_up.components.mood_match - 0.39).abs() < 1e-9);
        assert!(runner_up.final_score < top.final_score);
    }

    #[tokio::test]
    async fn forced_strategy_reports_unit_sample() {
        let engine = engine(vec![song(1, "a", None, 0.0, 0.0)]);
        let outcome = engine
            .score_songs(request(Some(Strategy::Content)))
            .await
            .unwrap();
        assert_eq!(outcome.samples[&Strategy::Content], 1.0);
        assert_eq!(outcome.samples[&Strategy::Emotion], 0.0);
    }

    #[tokio::test]
    async fn final_scores_are_bounded_and_unique_ids() {
        let songs: Vec<CatalogSong> = (0..40)
            .map(|i| song(i, &format!("artist-{}", i % 4), None, 0.9, 0.9))
            .collect();
        let engine = engine(songs);
        let outcome = engine.score_songs(request(None)).await.unwrap();

        assert!(outcome.songs.len() <= 10);
        let mut ids = HashSet::new();
        for s in &outcome.songs {
            assert!((0.0..=1.0).contains(&s.final_score));
            assert!(ids.insert(s.song_id), "duplicate song id {}", s.song_id);
        }
    }

    #[tokio::test]
    async fn empty_catalog_yields_empty_outcome() {
        let engine = engine(Vec::new());
        let outcome = engine.score_songs(request(None)).await.unwrap();
        assert!(outcome.songs.is_empty());
    }

    #[tokio::test]
    async fn exploration_bonus_stays_in_range() {
        let engine = engine(vec![song(1, "a", None, 0.0, 0.0)]);
        for _ in 0..20 {
            let outcome = engine
                .score_songs(request(Some(Strategy::Exploration)))
                .await
                .unwrap();
            let bonus = outcome.songs[0].components.exploration_bonus.unwrap();
            assert!((0.2..0.5).contains(&bonus), "bonus {bonus} out of range");
        }
    }

    #[tokio::test]
    async fn comfort_boost_lifts_calm_positive_songs() {
        let calm = song(1, "a", None, 0.6, 0.2);
        let tense = song(2, "b", None, -0.4, 0.9);
        let engine = engine(vec![calm, tense]);

        let mut modifiers = ContextModifiers::default();
        modifiers.comfort_music_boost = 0.25;
        let outcome = engine
            .score_songs(ScoreRequest {
                modifiers,
                strategy: Some(Strategy::Collaborative),
                ..request(None)
            })
            .await
            .unwrap();

        let boosted = outcome.songs.iter().find(|s| s.song_id == 1).unwrap();
        let unboosted = outcome.songs.iter().find(|s| s.song_id == 2).unwrap();

        // Boosted: resonance includes +0.25 on top of the base component.
        let base_resonance = (1.0 - (0.6_f64.powi(2) + 0.2_f64.powi(2)).sqrt() / 2.0).max(0.0);
        assert!(
            (boosted.components.emotional_resonance - (base_resonance + 0.25)).abs() < 1e-9
        );
        let tense_resonance =
            (1.0 - ((0.4_f64).powi(2) + (0.9_f64).powi(2)).sqrt() / 2.0).max(0.0);
        assert!((unboosted.components.emotional_resonance - tense_resonance).abs() < 1e-9);
    }

    #[tokio::test]
    async fn diversity_strategy_boosts_popularity_component() {
        let engine = engine(vec![song(1, "a", None, 0.0, 0.0)]);
        let mut modifiers = ContextModifiers::default();
        modifiers.diversity_boost = 0.3;
        let outcome = engine
            .score_songs(ScoreRequest {
                modifiers,
                strategy: Some(Strategy::Diversity),
                ..request(None)
            })
            .await
            .unwrap();
        // popularity 0.5 * weight 0.5 * 1.3
        assert!((outcome.songs[0].components.popularity - 0.325).abs() < 1e-9);
    }

    #[tokio::test]
    async fn mood_absent_scores_half() {
        let engine = engine(vec![song(1, "a", None, 0.0, 0.0)]);
        let outcome = engine
            .score_songs(ScoreRequest {
                target_mood: Some("calm".to_owned()),
                strategy: Some(Strategy::Collaborative),
                ..request(None)
            })
            .await
            .unwrap();
        assert!((outcome.songs[0].components.mood_match - 0.5).abs() < 1e-9);
    }

    #[test]
    fn diversity_filter_avoids_early_artist_repeats() {
        let mut ranked = Vec::new();
        for i in 0..6 {
            let mut s = song(i, if i < 3 { "same" } else { "other" }, None, 0.0, 0.0);
            s.tempo = 120.0;
            ranked.push(ScoredSong {
                song_id: s.song_id,
                name: s.name,
                artist: s.artist,
                genre: None,
                mood: None,
                valence: 0.0,
                energy: 0.0,
                tempo: 120.0,
                final_score: 1.0 - i as f64 * 0.1,
                raw_score: 0.0,
                components: ScoreComponents::default(),
                strategy: Strategy::Content,
                explanation: String::new(),
            });
        }

        let selected = apply_diversity_filter(ranked, 4);
        assert_eq!(selected.len(), 4);
        // Songs 1 and 2 (artist "same", repeats) are skipped while the
        // selection is small; song 0, then the "other" artist block.
        assert_eq!(selected[0].song_id, 0);
        assert_eq!(selected[1].song_id, 3);

        // No duplicates even after the shortfall fill.
        let mut ids = HashSet::new();
        for s in &selected {
            assert!(ids.insert(s.song_id));
        }
    }

    #[test]
    fn top_two_prefers_largest_components() {
        let components = ScoreComponents {
            mood_match: 1.3,
            emotional_resonance: 1.5,
            valence_alignment: 0.4,
            ..ScoreComponents::default()
        };
        let top = components.top_two();
        assert_eq!(top[0].0, "emotional_resonance");
        assert_eq!(top[1].0, "mood_match");
    }

    #[test]
    fn explanation_mentions_mood_and_factor() {
        let text = build_explanation(Some("calm"), &[("emotional_resonance", 1.5)]);
        assert_eq!(text, "This calm track resonates emotionally");
        let text = build_explanation(None, &[("popularity", 0.4)]);
        assert_eq!(text, "This track is popular with others");
    }
}
