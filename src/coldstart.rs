//! Cold-start recommendations and the transition to personalization.
//!
//! A user with fewer than 10 recorded feedbacks is *cold*: personalized
//! scoring has nothing to learn from yet. This module serves such users
//! from unpersonalized strategies (global popularity, mood-cluster
//! proximity in VA-space, or a hybrid of both) and blends cold and
//! personalized lists as the user's history grows. Personalization ramps
//! linearly and completes at 30 feedbacks.

use crate::catalog::{CatalogAdapter, CatalogSong};
use crate::config::ColdStartConfig;
use crate::emotion::{MOOD_CENTROIDS, va_distance};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Bonus granted to an unseen artist during diversity sampling.
const ARTIST_DIVERSITY_BONUS: f64 = 0.2;
/// Per-rank score decay for position-ranked lists.
const RANK_DECAY: f64 = 0.05;
/// Floor for position-ranked scores.
const SCORE_FLOOR: f64 = 0.1;

/// Feedback-history seam consumed by cold-start decisions.
///
/// Deployments back this with their feedback storage; the in-memory
/// default is enough for a single process.
pub trait FeedbackSource: Send + Sync {
    /// Count one feedback for the user.
    fn record(&self, user_id: &str);
    /// Total feedbacks recorded for the user.
    fn feedback_count(&self, user_id: &str) -> u64;
}

/// Volatile per-user feedback counter.
#[derive(Debug, Default)]
pub struct InMemoryFeedbackLog {
    counts: Mutex<HashMap<String, u64>>,
}

impl InMemoryFeedbackLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a user's count, for tests and backfills.
    pub fn set(&self, user_id: &str, count: u64) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.insert(user_id.to_owned(), count);
    }
}

impl FeedbackSource for InMemoryFeedbackLog {
    fn record(&self, user_id: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        *counts.entry(user_id.to_owned()).or_insert(0) += 1;
    }

    fn feedback_count(&self, user_id: &str) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(user_id).copied().unwrap_or(0)
    }
}

/// Song recommended via a cold-start strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartSong {
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
}

impl ColdStartSong {
    fn from_catalog(song: &CatalogSong, score: f64, strategy: &str, explanation: String) -> Self {
        Self {
            song_id: song.song_id,
            name: song.name.clone(),
            artist: song.artist.clone(),
            genre: song.genre.clone(),
            mood: song.mood.clone(),
            score,
            strategy: strategy.to_owned(),
            explanation,
        }
    }
}

/// Blend proportions reported alongside a blended list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub personalization_weight: f64,
    pub cold_start_weight: f64,
}

/// Aggregate listening profile used to assess a brand-new song.
#[derive(Debug, Clone, Default)]
pub struct ListenerProfile {
    pub avg_valence: f64,
    pub avg_energy: f64,
    pub preferred_genres: BTreeSet<String>,
}

/// Serves users with insufficient feedback history.
pub struct ColdStartHandler {
    catalog: Arc<dyn CatalogAdapter>,
    feedback: Arc<dyn FeedbackSource>,
    config: ColdStartConfig,
}

impl std::fmt::Debug for ColdStartHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColdStartHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ColdStartHandler {
    /// Create a handler over the catalog and feedback-history seams.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogAdapter>,
        feedback: Arc<dyn FeedbackSource>,
        config: ColdStartConfig,
    ) -> Self {
        Self {
            catalog,
            feedback,
            config,
        }
    }

    /// True when the user's feedback history is below the cold threshold.
    #[must_use]
    pub fn is_cold_start(&self, user_id: &str) -> bool {
        self.feedback.feedback_count(user_id) < self.config.cold_start_threshold
    }

    /// Linear ramp from 0 (no history) to 1 (transition complete).
    #[must_use]
    pub fn personalization_weight(&self, user_id: &str) -> f64 {
        let count = self.feedback.feedback_count(user_id);
        (count as f64 / self.config.transition_complete_at as f64).min(1.0)
    }

    /// Cold-start recommendations for a user.
    ///
    /// A known target mood selects the hybrid strategy; otherwise the
    /// popularity baseline applies. Fully personalized users get an empty
    /// list with strategy `"none"`.
    pub async fn recommend(
        &self,
        user_id: &str,
        mood: Option<&str>,
        limit: usize,
        diversity_factor: Option<f64>,
    ) -> Result<(Vec<ColdStartSong>, &'static str, f64)> {
        let pw = self.personalization_weight(user_id);
        if pw >= 1.0 {
            return Ok((Vec::new(), "none", pw));
        }

        let diversity = diversity_factor.unwrap_or(self.config.diversity_factor);
        let (songs, strategy) = match mood {
            Some(mood) => (
                self.hybrid(mood, limit, diversity).await?,
                "cold_start_hybrid",
            ),
            None => (
                self.popularity_baseline(limit).await?,
                "cold_start_popularity",
            ),
        };
        tracing::debug!(user_id, strategy, served = songs.len(), "cold-start recommendations");
        Ok((songs, strategy, pw))
    }

    /// Top songs by global popularity, scores decaying by rank.
    pub async fn popularity_baseline(&self, limit: usize) -> Result<Vec<ColdStartSong>> {
        let mut songs = self.catalog.fetch_candidates(None, limit * 2).await?;
        songs.sort_by(|a, b| {
            b.popularity
                .partial_cmp(&a.popularity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.like_count.cmp(&a.like_count))
        });

        Ok(songs
            .iter()
            .take(limit)
            .enumerate()
            .map(|(rank, song)| {
                ColdStartSong::from_catalog(
                    song,
                    rank_score(rank),
                    "popularity_baseline",
                    "Trending song that many users love".to_owned(),
                )
            })
            .collect())
    }

    /// Songs near the mood's VA centroid, diversity-sampled.
    pub async fn mood_cluster(
        &self,
        mood: &str,
        limit: usize,
        diversity_factor: f64,
    ) -> Result<Vec<ColdStartSong>> {
        let needle = mood.to_lowercase();
        let (effective_mood, centroid) = MOOD_CENTROIDS
            .iter()
            .find(|(name, _, _)| *name == needle)
            .map(|&(name, v, a)| (name, (v, a)))
            .unwrap_or(("neutral", (0.0, 0.0)));

        let candidates = self
            .catalog
            .fetch_candidates(Some(effective_mood), limit * 3)
            .await?;

        let mut ranked: Vec<(CatalogSong, f64)> = candidates
            .into_iter()
            .filter_map(|song| {
                let distance = va_distance(song.valence, song.energy, centroid.0, centroid.1);
                if distance < self.config.va_threshold || song.mood.is_some() {
                    let score = (1.0 - distance).max(SCORE_FLOOR);
                    Some((song, score))
                } else {
                    None
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(self.diversity_sample(ranked, limit, diversity_factor, effective_mood))
    }

    /// Greedy maximin sampling: trade raw score against artist novelty.
    fn diversity_sample(
        &self,
        candidates: Vec<(CatalogSong, f64)>,
        k: usize,
        diversity_factor: f64,
        mood: &str,
    ) -> Vec<ColdStartSong> {
        let explanation = |mood: &str| format!("A {mood} track that matches your current mood");

        if candidates.is_empty() {
            return Vec::new();
        }
        if candidates.len() <= k {
            return candidates
                .iter()
                .map(|(song, score)| {
                    ColdStartSong::from_catalog(
                        song,
                        *score,
                        "mood_cluster_bootstrap",
                        explanation(mood),
                    )
                })
                .collect();
        }

        let d = diversity_factor.clamp(0.0, 1.0);
        let mut remaining = candidates;
        let mut selected = vec![remaining.remove(0)];
        let mut seen_artists: HashSet<String> = HashSet::new();
        seen_artists.insert(selected[0].0.artist.clone());

        while selected.len() < k && !remaining.is_empty() {
            let mut best_index = 0;
            let mut best_score = f64::NEG_INFINITY;
            for (index, (song, score)) in remaining.iter().enumerate() {
                let artist_bonus = if seen_artists.contains(&song.artist) {
                    0.0
                } else {
                    ARTIST_DIVERSITY_BONUS
                };
                let diversity_score = score * (1.0 - d) + artist_bonus * d;
                if diversity_score > best_score {
                    best_score = diversity_score;
                    best_index = index;
                }
            }
            let picked = remaining.remove(best_index);
            seen_artists.insert(picked.0.artist.clone());
            selected.push(picked);
        }

        selected
            .iter()
            .map(|(song, score)| {
                ColdStartSong::from_catalog(
                    song,
                    *score,
                    "mood_cluster_bootstrap",
                    explanation(mood),
                )
            })
            .collect()
    }

    /// Hybrid strategy: 60% mood-cluster picks, 40% popularity picks,
    /// interleaved (cluster first) and re-scored by final position.
    pub async fn hybrid(
        &self,
        mood: &str,
        limit: usize,
        diversity_factor: f64,
    ) -> Result<Vec<ColdStartSong>> {
        let n_cluster = (limit as f64 * 0.6) as usize;
        let n_popular = limit - n_cluster;

        let mut cluster = self.mood_cluster(mood, n_cluster, diversity_factor).await?;
        let mut popular = self.popularity_baseline(n_popular).await?;

        for song in &mut cluster {
            song.strategy = "cold_start_hybrid".to_owned();
        }
        for song in &mut popular {
            song.strategy = "cold_start_hybrid".to_owned();
            song.explanation = format!("Popular {mood} track that others have enjoyed");
        }

        let mut result: Vec<ColdStartSong> = Vec::with_capacity(limit);
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut cluster_iter = cluster.into_iter();
        let mut popular_iter = popular.into_iter();
        loop {
            let mut advanced = false;
            if result.len() < limit {
                if let Some(song) = next_unique(&mut cluster_iter, &mut seen_ids) {
                    result.push(song);
                    advanced = true;
                }
            }
            if result.len() < limit {
                if let Some(song) = next_unique(&mut popular_iter, &mut seen_ids) {
                    result.push(song);
                    advanced = true;
                }
            }
            if result.len() >= limit || !advanced {
                break;
            }
        }

        for (rank, song) in result.iter_mut().enumerate() {
            song.score = rank_score(rank);
        }
        Ok(result)
    }

    /// Assess a brand-new song with no feedback of its own.
    ///
    /// Blends content similarity to the listener's profile with artist
    /// popularity, a genre match bonus and a flat exploration bonus.
    #[must_use]
    pub fn assess_new_song(
        &self,
        song: &CatalogSong,
        artist_popularity: f64,
        profile: Option<&ListenerProfile>,
    ) -> f64 {
        let mut score = 0.0;

        if let Some(profile) = profile {
            let valence_diff = (song.valence - profile.avg_valence).abs();
            let energy_diff = (song.energy - profile.avg_energy).abs();
            let content_sim = (1.0 - (valence_diff + energy_diff) / 2.0).max(0.0);
            score += 0.5 * content_sim;
        }

        score += 0.3 * artist_popularity.clamp(0.0, 1.0);

        if let (Some(profile), Some(genre)) = (profile, &song.genre) {
            if profile.preferred_genres.contains(genre) {
                score += 0.2;
            }
        }

        // Flat exploration bonus for fresh catalog entries.
        score += 0.1;
        score.min(1.0)
    }
}

/// Score for a list position: 1.0, 0.95, 0.90, … floored at 0.1.
fn rank_score(rank: usize) -> f64 {
    (1.0 - rank as f64 * RANK_DECAY).max(SCORE_FLOOR)
}

/// Draw the next song from `iter` not already in `seen`.
fn next_unique(
    iter: &mut std::vec::IntoIter<ColdStartSong>,
    seen: &mut HashSet<i64>,
) -> Option<ColdStartSong> {
    iter.by_ref().find(|song| seen.insert(song.song_id))
}

/// Blends cold-start and personalized lists as history accumulates.
pub struct TransitionManager {
    handler: Arc<ColdStartHandler>,
}

impl std::fmt::Debug for TransitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionManager").finish_non_exhaustive()
    }
}

impl TransitionManager {
    #[must_use]
    pub fn new(handler: Arc<ColdStartHandler>) -> Self {
        Self { handler }
    }

    /// Blend personalized and cold recommendations by the user's
    /// personalization weight: `⌊limit·pw⌋` personalized picks first,
    /// the remainder from the cold list.
    pub fn blend<T>(
        &self,
        user_id: &str,
        cold: Vec<T>,
        personal: Vec<T>,
        limit: usize,
    ) -> (Vec<T>, BlendWeights) {
        let pw = self.handler.personalization_weight(user_id);
        let weights = BlendWeights {
            personalization_weight: pw,
            cold_start_weight: 1.0 - pw,
        };

        if pw >= 1.0 {
            return (personal.into_iter().take(limit).collect(), weights);
        }
        if pw <= 0.0 {
            return (cold.into_iter().take(limit).collect(), weights);
        }

        let n_personal = (limit as f64 * pw) as usize;
        let mut blended: Vec<T> = personal.into_iter().take(n_personal).collect();
        let remainder = limit - blended.len();
        blended.extend(cold.into_iter().take(remainder));
        (blended, weights)
    }
}
