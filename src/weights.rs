//! Per-user feature weights learned from feedback.
//!
//! Weights multiply scoring components and are nudged by gradient-style
//! updates on every non-neutral feedback:
//!
//! ```text
//! Δ = δ_feedback · η · x_f  −  λ · (w_f − 1.0)
//! ```
//!
//! with `η = 0.05`, `λ = 0.01` (L2 decay toward 1.0) and clamping to
//! `[0.1, 2.0]`. Persistence goes through the [`WeightStore`] seam; the
//! in-memory cache stays authoritative for the process lifetime, so a
//! failing store degrades durability but never correctness.

use crate::config::LearningConfig;
use crate::error::{CoreError, Result};
use crate::reward::Feedback;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Feature names and their default weights.
///
/// The defaults seed the cold path and must not drift.
pub const DEFAULT_WEIGHTS: &[(&str, f64)] = &[
    ("mood_match", 1.0),
    ("emotional_resonance", 1.0),
    ("valence_alignment", 1.0),
    ("energy_alignment", 1.0),
    ("artist_preference", 1.0),
    ("genre_preference", 1.0),
    ("tempo_comfort", 1.0),
    ("popularity", 0.5),
    ("recency", 0.3),
];

/// Smallest weight change worth recording as an adjustment.
const MIN_RECORDED_DELTA: f64 = 1e-4;

/// The default weight map.
#[must_use]
pub fn default_weights() -> BTreeMap<String, f64> {
    DEFAULT_WEIGHTS
        .iter()
        .map(|&(name, weight)| (name.to_owned(), weight))
        .collect()
}

/// True when `feature` is one of the known scoring features.
#[must_use]
pub fn is_known_feature(feature: &str) -> bool {
    DEFAULT_WEIGHTS.iter().any(|&(name, _)| name == feature)
}

/// Record of one weight change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub timestamp: DateTime<Utc>,
    pub feature: String,
    pub old_weight: f64,
    pub new_weight: f64,
    pub delta: f64,
    pub reason: String,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub song_id: Option<i64>,
}

/// Result of a feedback-driven adjustment pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentOutcome {
    pub user_id: String,
    pub weights: BTreeMap<String, f64>,
    pub adjustments: Vec<WeightAdjustment>,
    pub message: String,
}

impl AdjustmentOutcome {
    /// Sum of absolute weight changes in this pass.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.adjustments.iter().map(|a| a.delta.abs()).sum()
    }
}

/// Summary statistics over a user's weights and adjustment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightStatistics {
    pub user_id: String,
    pub current_weights: BTreeMap<String, f64>,
    /// Three highest-weighted features, descending.
    pub most_important: Vec<(String, f64)>,
    /// Three lowest-weighted features, descending.
    pub least_important: Vec<(String, f64)>,
    pub total_adjustments: usize,
    pub avg_deviation_from_default: f64,
    /// How far the profile has drifted from defaults, `[0, 1]`.
    pub personalization_score: f64,
}

// ── Persistence seam ────────────────────────────────────────────────────

/// Storage seam for weights and their adjustment log.
///
/// `save_weights` is last-writer-wins; `append_adjustment` is append-only.
pub trait WeightStore: Send + Sync {
    fn load_weights(&self, user_id: &str) -> Result<Option<BTreeMap<String, f64>>>;
    fn save_weights(&self, user_id: &str, weights: &BTreeMap<String, f64>) -> Result<()>;
    fn append_adjustment(&self, user_id: &str, adjustment: &WeightAdjustment) -> Result<()>;
    /// Most-recent-first adjustment history.
    fn load_history(&self, user_id: &str, limit: usize) -> Result<Vec<WeightAdjustment>>;
}

/// Volatile store; the default when no durable backend is attached.
#[derive(Debug, Default)]
pub struct InMemoryWeightStore {
    weights: Mutex<HashMap<String, BTreeMap<String, f64>>>,
    adjustments: Mutex<HashMap<String, Vec<WeightAdjustment>>>,
}

impl InMemoryWeightStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WeightStore for InMemoryWeightStore {
    fn load_weights(&self, user_id: &str) -> Result<Option<BTreeMap<String, f64>>> {
        let weights = self.weights.lock().unwrap_or_else(|e| e.into_inner());
        Ok(weights.get(user_id).cloned())
    }

    fn save_weights(&self, user_id: &str, weights: &BTreeMap<String, f64>) -> Result<()> {
        let mut map = self.weights.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(user_id.to_owned(), weights.clone());
        Ok(())
    }

    fn append_adjustment(&self, user_id: &str, adjustment: &WeightAdjustment) -> Result<()> {
        let mut map = self.adjustments.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(user_id.to_owned())
            .or_default()
            .push(adjustment.clone());
        Ok(())
    }

    fn load_history(&self, user_id: &str, limit: usize) -> Result<Vec<WeightAdjustment>> {
        let map = self.adjustments.lock().unwrap_or_else(|e| e.into_inner());
        let mut history: Vec<WeightAdjustment> =
            map.get(user_id).cloned().unwrap_or_default();
        history.reverse();
        history.truncate(limit);
        Ok(history)
    }
}

// ── SQLite store ────────────────────────────────────────────────────────

/// SQLite-backed weight store.
///
/// Thread-safe via an internal `Mutex<Connection>`; all access is
/// serialized, which is plenty for weight-update traffic.
pub struct SqliteWeightStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteWeightStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWeightStore").finish_non_exhaustive()
    }
}

impl SqliteWeightStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CoreError::Upstream(format!("failed to open weight store: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS user_weights (
                user_id      TEXT PRIMARY KEY,
                weights_json TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS weight_adjustments (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       TEXT NOT NULL,
                feature       TEXT NOT NULL,
                old_weight    REAL NOT NULL,
                new_weight    REAL NOT NULL,
                delta         REAL NOT NULL,
                reason        TEXT NOT NULL,
                feedback_type TEXT,
                song_id       INTEGER,
                created_at    TEXT NOT NULL
            );",
        )
        .map_err(|e| CoreError::Upstream(format!("failed to apply weight schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl WeightStore for SqliteWeightStore {
    fn load_weights(&self, user_id: &str) -> Result<Option<BTreeMap<String, f64>>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row: Option<String> = conn
            .query_row(
                "SELECT weights_json FROM user_weights WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(CoreError::Upstream(format!(
                    "failed to load weights: {other}"
                ))),
            })?;
        match row {
            Some(json) => {
                let weights = serde_json::from_str(&json).map_err(|e| {
                    CoreError::Upstream(format!("corrupt weights for {user_id}: {e}"))
                })?;
                Ok(Some(weights))
            }
            None => Ok(None),
        }
    }

    fn save_weights(&self, user_id: &str, weights: &BTreeMap<String, f64>) -> Result<()> {
        let json = serde_json::to_string(weights)
            .map_err(|e| CoreError::Internal(format!("failed to serialize weights: {e}")))?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO user_weights (user_id, weights_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 weights_json = excluded.weights_json,
                 updated_at = excluded.updated_at",
            params![user_id, json, Utc::now().to_rfc3339()],
        )
        .map_err(|e| CoreError::Upstream(format!("failed to save weights: {e}")))?;
        Ok(())
    }

    fn append_adjustment(&self, user_id: &str, adjustment: &WeightAdjustment) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO weight_adjustments
                 (user_id, feature, old_weight, new_weight, delta, reason,
                  feedback_type, song_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                adjustment.feature,
                adjustment.old_weight,
                adjustment.new_weight,
                adjustment.delta,
                adjustment.reason,
                adjustment.feedback.map(Feedback::as_str),
                adjustment.song_id,
                adjustment.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::Upstream(format!("failed to append adjustment: {e}")))?;
        Ok(())
    }

    fn load_history(&self, user_id: &str, limit: usize) -> Result<Vec<WeightAdjustment>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT feature, old_weight, new_weight, delta, reason,
                        feedback_type, song_id, created_at
                 FROM weight_adjustments
                 WHERE user_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )
            .map_err(|e| CoreError::Upstream(format!("failed to prepare history query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                let feedback: Option<String> = row.get(5)?;
                let created_at: String = row.get(7)?;
                Ok(WeightAdjustment {
                    timestamp: DateTime::parse_from_rfc3339(&created_at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    feature: row.get(0)?,
                    old_weight: row.get(1)?,
                    new_weight: row.get(2)?,
                    delta: row.get(3)?,
                    reason: row.get(4)?,
                    feedback: feedback.as_deref().map(Feedback::parse_lossy),
                    song_id: row.get(6)?,
                })
            })
            .map_err(|e| CoreError::Upstream(format!("failed to query history: {e}")))?;
        let mut history = Vec::new();
        for row in rows {
            history.push(
                row.map_err(|e| CoreError::Upstream(format!("failed to read history row: {e}")))?,
            );
        }
        Ok(history)
    }
}

// ── Adapter ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct UserWeightState {
    weights: BTreeMap<String, f64>,
    history: Vec<WeightAdjustment>,
    loaded: bool,
}

/// Adaptive per-user weight manager.
///
/// Per-user state sits behind its own lock; the outer map lock is only
/// held for lookup/creation, and no lock is held across a store call.
pub struct WeightAdapter {
    store: Arc<dyn WeightStore>,
    config: LearningConfig,
    users: Mutex<HashMap<String, Arc<Mutex<UserWeightState>>>>,
}

impl std::fmt::Debug for WeightAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WeightAdapter {
    /// Create an adapter over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn WeightStore>, config: LearningConfig) -> Self {
        Self {
            store,
            config,
            users: Mutex::new(HashMap::new()),
        }
    }

    fn clamp(&self, weight: f64) -> f64 {
        weight.clamp(self.config.weight_min, self.config.weight_max)
    }

    fn user_entry(&self, user_id: &str) -> Arc<Mutex<UserWeightState>> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users
            .entry(user_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(UserWeightState::default())))
            .clone()
    }

    /// Ensure the entry has weights, lazy-loading from the store once.
    fn ensure_loaded(&self, user_id: &str, entry: &Arc<Mutex<UserWeightState>>) {
        {
            let state = entry.lock().unwrap_or_else(|e| e.into_inner());
            if state.loaded {
                return;
            }
        }
        // Store read happens with no lock held.
        let stored = match self.store.load_weights(user_id) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "weight store load failed; using defaults");
                None
            }
        };
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        if !state.loaded {
            let mut weights = default_weights();
            if let Some(stored) = stored {
                for (feature, weight) in stored {
                    if is_known_feature(&feature) {
                        weights.insert(feature, self.clamp(weight));
                    }
                }
            }
            state.weights = weights;
            state.loaded = true;
        }
    }

    /// Current weights for a user (defaults when nothing is stored).
    #[must_use]
    pub fn get_weights(&self, user_id: &str) -> BTreeMap<String, f64> {
        let entry = self.user_entry(user_id);
        self.ensure_loaded(user_id, &entry);
        let state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.weights.clone()
    }

    /// Adjust all known features from one piece of song feedback.
    ///
    /// `song_features` maps feature name to the song's intensity on that
    /// feature, `[0, 1]`; missing features default to 0.5. Neutral
    /// feedback is a no-op and reports as such.
    pub fn adjust_weights(
        &self,
        user_id: &str,
        feedback: Feedback,
        song_features: &BTreeMap<String, f64>,
        song_id: Option<i64>,
    ) -> AdjustmentOutcome {
        let entry = self.user_entry(user_id);
        self.ensure_loaded(user_id, &entry);

        let base_delta = feedback.weight_delta();
        if base_delta == 0.0 {
            let state = entry.lock().unwrap_or_else(|e| e.into_inner());
            return AdjustmentOutcome {
                user_id: user_id.to_owned(),
                weights: state.weights.clone(),
                adjustments: Vec::new(),
                message: "no adjustment needed for neutral feedback".to_owned(),
            };
        }

        let (weights, adjustments) = {
            let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
            let mut adjustments = Vec::new();
            let features: Vec<String> = state.weights.keys().cloned().collect();
            for feature in features {
                let current = state.weights[&feature];
                let intensity = song_features
                    .get(&feature)
                    .copied()
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0);

                let gradient = base_delta * self.config.learning_rate * intensity;
                let regularization = -self.config.weight_decay * (current - 1.0);
                let updated = self.clamp(current + gradient + regularization);

                if (updated - current).abs() > MIN_RECORDED_DELTA {
                    let adjustment = WeightAdjustment {
                        timestamp: Utc::now(),
                        feature: feature.clone(),
                        old_weight: current,
                        new_weight: updated,
                        delta: updated - current,
                        reason: format!("{feedback} feedback"),
                        feedback: Some(feedback),
                        song_id,
                    };
                    state.history.push(adjustment.clone());
                    adjustments.push(adjustment);
                    state.weights.insert(feature, updated);
                }
            }
            (state.weights.clone(), adjustments)
        };

        // Persist outside the per-user lock; cache stays authoritative.
        self.persist(user_id, &weights, &adjustments);

        tracing::debug!(
            user_id,
            feedback = %feedback,
            adjusted = adjustments.len(),
            "weights adjusted"
        );
        AdjustmentOutcome {
            user_id: user_id.to_owned(),
            weights,
            message: format!(
                "adjusted {} weights from {feedback} feedback",
                adjustments.len()
            ),
            adjustments,
        }
    }

    /// Set one weight directly. The value is clamped onto the valid
    /// range; an unknown feature name is a validation error.
    pub fn set_weight(
        &self,
        user_id: &str,
        feature: &str,
        weight: f64,
        reason: &str,
    ) -> Result<AdjustmentOutcome> {
        if !is_known_feature(feature) {
            return Err(CoreError::Validation(format!(
                "unknown feature: {feature}"
            )));
        }

        let entry = self.user_entry(user_id);
        self.ensure_loaded(user_id, &entry);

        let (weights, adjustments) = {
            let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
            let old_weight = state.weights.get(feature).copied().unwrap_or(1.0);
            let new_weight = self.clamp(weight);
            let adjustment = WeightAdjustment {
                timestamp: Utc::now(),
                feature: feature.to_owned(),
                old_weight,
                new_weight,
                delta: new_weight - old_weight,
                reason: reason.to_owned(),
                feedback: None,
                song_id: None,
            };
            state.history.push(adjustment.clone());
            state.weights.insert(feature.to_owned(), new_weight);
            (state.weights.clone(), vec![adjustment])
        };

        self.persist(user_id, &weights, &adjustments);
        Ok(AdjustmentOutcome {
            user_id: user_id.to_owned(),
            weights,
            adjustments,
            message: format!("set {feature}"),
        })
    }

    /// Restore a user's weights to the defaults.
    pub fn reset_weights(&self, user_id: &str) -> BTreeMap<String, f64> {
        let entry = self.user_entry(user_id);
        let weights = {
            let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
            state.weights = default_weights();
            state.loaded = true;
            state.weights.clone()
        };
        self.persist(user_id, &weights, &[]);
        tracing::info!(user_id, "weights reset to defaults");
        weights
    }

    /// Most-recent-first adjustment history.
    #[must_use]
    pub fn history(&self, user_id: &str, limit: usize) -> Vec<WeightAdjustment> {
        let entry = self.user_entry(user_id);
        let state = entry.lock().unwrap_or_else(|e| e.into_inner());
        let mut history: Vec<WeightAdjustment> = state.history.clone();
        history.reverse();
        history.truncate(limit);
        history
    }

    /// Summary statistics over the user's profile.
    #[must_use]
    pub fn statistics(&self, user_id: &str) -> WeightStatistics {
        let weights = self.get_weights(user_id);
        let defaults = default_weights();

        let mut ranked: Vec<(String, f64)> =
            weights.iter().map(|(k, &v)| (k.clone(), v)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let deviations: Vec<f64> = weights
            .iter()
            .map(|(feature, &weight)| (weight - defaults.get(feature).copied().unwrap_or(1.0)).abs())
            .collect();
        let avg_deviation = if deviations.is_empty() {
            0.0
        } else {
            deviations.iter().sum::<f64>() / deviations.len() as f64
        };

        let entry = self.user_entry(user_id);
        let total_adjustments = entry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .len();

        WeightStatistics {
            user_id: user_id.to_owned(),
            most_important: ranked.iter().take(3).cloned().collect(),
            least_important: ranked[ranked.len().saturating_sub(3)..].to_vec(),
            current_weights: weights,
            total_adjustments,
            avg_deviation_from_default: avg_deviation,
            personalization_score: (avg_deviation * 2.0).min(1.0),
        }
    }

    fn persist(
        &self,
        user_id: &str,
        weights: &BTreeMap<String, f64>,
        adjustments: &[WeightAdjustment],
    ) {
        if let Err(e) = self.store.save_weights(user_id, weights) {
            tracing::warn!(user_id, error = %e, "failed to persist weights");
        }
        for adjustment in adjustments {
            if let Err(e) = self.store.append_adjustment(user_id, adjustment) {
                tracing::warn!(user_id, error = %e, "failed to persist adjustment");
            }
        }
    }
}
